use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::ACCEPT;
use tracing::debug;

use super::{sse::parse_sse_events, BridgeApi, BridgeError, EventStream, OutgoingMessage};

/// HTTP relay: `POST /message` for sending, `GET /events` (SSE) for receiving.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    base_url: String,
    client: reqwest::Client,
    // no timeout, the event stream is long lived
    stream_client: reqwest::Client,
}

impl HttpBridge {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            stream_client,
        })
    }
}

#[async_trait]
impl BridgeApi for HttpBridge {
    async fn send(&self, message: OutgoingMessage) -> Result<(), BridgeError> {
        debug!(to = %message.to, ttl = message.ttl.as_secs(), "sending bridge message");
        self.client
            .post(format!("{}/message", self.base_url))
            .query(&[
                ("client_id", message.from),
                ("to", message.to),
                ("ttl", message.ttl.as_secs().to_string()),
            ])
            .body(BASE64_STANDARD.encode(&message.body))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn listen(
        &self,
        client_ids: &[String],
        last_event_id: Option<&str>,
    ) -> Result<EventStream, BridgeError> {
        let mut query = vec![("client_id", client_ids.join(","))];
        if let Some(id) = last_event_id {
            query.push(("last_event_id", id.to_string()));
        }

        let response = self
            .stream_client
            .get(format!("{}/events", self.base_url))
            .query(&query)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        Ok(Box::pin(parse_sse_events(response.bytes_stream())))
    }
}
