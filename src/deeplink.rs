//! Connect deeplinks.
//!
//! Two surface forms are accepted:
//!
//! ```text
//! tc://?v=2&id=<client id>&r=<urlencoded ConnectRequest json>[&ret=back]
//! https://<host>/ton-connect?v=2&id=...&r=...
//! ```
//!
//! The universal form is rewritten into the custom scheme form and parsed again.

use url::{form_urlencoded, Url};

use crate::{
    dto::ConnectRequest,
    error::{Result, TonConnectError},
};

pub const SUPPORTED_VERSION: u8 = 2;
const UNIVERSAL_LINK_SEGMENT: &str = "ton-connect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParameters {
    pub version: u8,
    /// Relay id of the dapp side.
    pub client_id: String,
    pub request: ConnectRequest,
    /// `ret` query item: `back`, `none` or a url to return to.
    pub return_strategy: Option<String>,
}

pub fn parse(uri: &str) -> Result<ConnectParameters> {
    let url = Url::parse(uri.trim()).map_err(|e| incorrect(format!("{e}")))?;

    match url.scheme() {
        "https" | "http" => {
            let is_connect_path = url
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                == Some(UNIVERSAL_LINK_SEGMENT);
            if !is_connect_path {
                return Err(incorrect(format!("not a connect link: {}", url.path())));
            }
            let query = url.query().unwrap_or_default();
            parse(&format!("tc://?{query}"))
        }
        _ => parse_custom_scheme(&url),
    }
}

fn parse_custom_scheme(url: &Url) -> Result<ConnectParameters> {
    let mut version = None;
    let mut client_id = None;
    let mut request = None;
    let mut return_strategy = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "v" => version = Some(value.into_owned()),
            "id" => client_id = Some(value.into_owned()),
            "r" => request = Some(value.into_owned()),
            "ret" => return_strategy = Some(value.into_owned()),
            _ => {}
        }
    }

    let version = version
        .ok_or_else(|| incorrect("missing v"))?
        .parse::<u8>()
        .map_err(|e| incorrect(format!("version: {e}")))?;
    if version != SUPPORTED_VERSION {
        return Err(incorrect(format!("unsupported version {version}")));
    }

    let client_id = client_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| incorrect("missing id"))?;

    let request = request.ok_or_else(|| incorrect("missing r"))?;
    let request: ConnectRequest = serde_json::from_str(&request)
        .map_err(|e| incorrect(format!("request payload: {e}")))?;

    Ok(ConnectParameters {
        version,
        client_id,
        request,
        return_strategy,
    })
}

/// Inverse of [`parse`], always producing the custom scheme form.
pub fn build(params: &ConnectParameters) -> Result<String> {
    let request = serde_json::to_string(&params.request)?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("v", &params.version.to_string())
        .append_pair("id", &params.client_id)
        .append_pair("r", &request);
    if let Some(ret) = &params.return_strategy {
        query.append_pair("ret", ret);
    }

    Ok(format!("tc://?{}", query.finish()))
}

fn incorrect(reason: impl Into<String>) -> TonConnectError {
    TonConnectError::IncorrectUrl(reason.into())
}
