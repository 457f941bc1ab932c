use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::{
    dto::Manifest,
    error::{Result, TonConnectError},
};

/// Fetches dapp manifests. Every failure collapses into
/// [`TonConnectError::ManifestUnavailable`].
#[derive(Debug, Clone)]
pub struct ManifestClient {
    client: reqwest::Client,
}

impl ManifestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TonConnectError::ManifestUnavailable(e.into()))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<Manifest> {
        debug!(%url, "fetching manifest");
        self.fetch_inner(url).await.map_err(|e| {
            warn!(%url, error = %e, "manifest unavailable");
            TonConnectError::ManifestUnavailable(e)
        })
    }

    async fn fetch_inner(&self, url: &str) -> anyhow::Result<Manifest> {
        let manifest: Manifest = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if manifest.url.is_empty() || manifest.name.is_empty() {
            return Err(anyhow!("manifest is missing url or name"));
        }
        url::Url::parse(&manifest.url)?;

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn client() -> ManifestClient {
        ManifestClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_decodes_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tonconnect-manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://dapp.example",
                "name": "Demo Dapp",
                "iconUrl": "https://dapp.example/icon.png",
                "termsOfUseUrl": "https://dapp.example/terms"
            })))
            .mount(&server)
            .await;

        let manifest = client()
            .fetch(&format!("{}/tonconnect-manifest.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(manifest.name, "Demo Dapp");
        assert_eq!(manifest.terms_of_use_url.as_deref(), Some("https://dapp.example/terms"));
        assert_eq!(manifest.privacy_policy_url, None);
    }

    #[tokio::test]
    async fn server_error_is_manifest_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TonConnectError::ManifestUnavailable(_)));
    }

    #[tokio::test]
    async fn undecodable_body_is_manifest_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TonConnectError::ManifestUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_manifest_unavailable() {
        let err = client()
            .fetch("http://127.0.0.1:9/manifest.json")
            .await
            .unwrap_err();
        assert!(matches!(err, TonConnectError::ManifestUnavailable(_)));
    }
}
