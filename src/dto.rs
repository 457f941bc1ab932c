use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// `r` parameter of a connect deeplink.
///
/// ```json
/// {
///   "manifestUrl": "https://dapp.example/tonconnect-manifest.json",
///   "items": [{ "name": "ton_addr" }, { "name": "ton_proof", "payload": "E5B4ARS6..." }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "manifestUrl")]
    pub manifest_url: String,
    #[serde(default)]
    pub items: Vec<ConnectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum ConnectItem {
    #[serde(rename = "ton_addr")]
    TonAddr,
    #[serde(rename = "ton_proof")]
    TonProof { payload: String },
    /// Any item kind this wallet does not know. Skipped in the reply.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TonNetwork {
    #[serde(rename = "-239")]
    Mainnet,
    #[serde(rename = "-3")]
    Testnet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub url: String,
    pub name: String,
    #[serde(rename = "iconUrl")]
    pub icon_url: String,
    #[serde(rename = "termsOfUseUrl", alias = "termsUrl", default)]
    pub terms_of_use_url: Option<String>,
    #[serde(rename = "privacyPolicyUrl", alias = "privacyUrl", default)]
    pub privacy_policy_url: Option<String>,
}

/// Domain the proof is bound to. `lengthBytes` is always derived from `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonDomain {
    #[serde(rename = "lengthBytes")]
    length_bytes: u32,
    value: String,
}

impl TonDomain {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            length_bytes: value.len() as u32,
            value,
        }
    }

    pub fn length_bytes(&self) -> u32 {
        self.length_bytes
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// ```json
/// {
///   "timestamp": 1668094767, // unix epoch seconds
///   "domain": { "lengthBytes": 21, "value": "ton-connect.github.io" },
///   "signature": "28tWSg8RDB3P/iIYupySINq1o3F5xLodndzNFHOtdi16Z+MuII8LAPnHLT3E6WTB27//qY4psU5Rf5/aJaIIAA==",
///   "payload": "E5B4ARS6CdOI2b5e1jz0jnS-x-a3DgfNXprrg_3pec0="
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonProof {
    pub timestamp: u64,
    pub domain: TonDomain,
    pub signature: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum ConnectItemReply {
    #[serde(rename = "ton_addr")]
    TonAddr {
        address: String,
        network: TonNetwork,
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(rename = "walletStateInit")]
        wallet_state_init: String,
    },
    #[serde(rename = "ton_proof")]
    TonProof { proof: TonProof },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Feature {
    SendTransaction {
        #[serde(rename = "maxMessages")]
        max_messages: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub app_name: String,
    pub app_version: String,
    pub max_protocol_version: u8,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectEventPayload {
    pub items: Vec<ConnectItemReply>,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Events the wallet pushes to a dapp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalletEvent {
    Connect { id: u64, payload: ConnectEventPayload },
    ConnectError { id: u64, payload: WalletError },
    Disconnect { id: u64, payload: EmptyPayload },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Text(String),
    Number(u64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(id) => f.write_str(id),
            Self::Number(id) => write!(f, "{id}"),
        }
    }
}

/// Decrypted request from a dapp, `params` entries are JSON encoded strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    pub address: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(rename = "stateInit", default, skip_serializing_if = "Option::is_none")]
    pub state_init: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTransactionRequest {
    pub messages: Vec<TransferMessage>,
    #[serde(rename = "valid_until", alias = "validUntil", default)]
    pub valid_until: Option<u64>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub network: Option<TonNetwork>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WalletResponse {
    Success {
        id: RequestId,
        result: serde_json::Value,
    },
    Error {
        id: RequestId,
        error: WalletError,
    },
}

/// Data field of an inbound relay SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub from: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn domain_length_counts_utf8_bytes() {
        for value in ["ton-connect.github.io", "пример.рф", "例子.测试", "🦀.example", ""] {
            let domain = TonDomain::new(value);
            assert_eq!(domain.length_bytes() as usize, value.as_bytes().len());
        }
        assert_eq!(TonDomain::new("пример.рф").length_bytes(), 17);
    }

    #[test]
    fn unknown_connect_items_are_tolerated() {
        let request: ConnectRequest = serde_json::from_value(json!({
            "manifestUrl": "https://dapp.example/manifest.json",
            "items": [{"name": "ton_addr"}, {"name": "ton_future"}]
        }))
        .unwrap();
        assert_eq!(request.items, vec![ConnectItem::TonAddr, ConnectItem::Unsupported]);
    }

    #[test]
    fn connect_event_wire_shape() {
        let event = WalletEvent::Connect {
            id: 1700000000,
            payload: ConnectEventPayload {
                items: vec![ConnectItemReply::TonProof {
                    proof: TonProof {
                        timestamp: 1668094767,
                        domain: TonDomain::new("ton-connect.github.io"),
                        signature: "c2ln".to_string(),
                        payload: "xyz".to_string(),
                    },
                }],
                device: DeviceInfo {
                    platform: "linux".to_string(),
                    app_name: "tonconnect-wallet".to_string(),
                    app_version: "0.1.0".to_string(),
                    max_protocol_version: 2,
                    features: vec![Feature::SendTransaction { max_messages: 4 }],
                },
            },
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "connect",
                "id": 1700000000,
                "payload": {
                    "items": [{
                        "name": "ton_proof",
                        "proof": {
                            "timestamp": 1668094767,
                            "domain": {"lengthBytes": 21, "value": "ton-connect.github.io"},
                            "signature": "c2ln",
                            "payload": "xyz"
                        }
                    }],
                    "device": {
                        "platform": "linux",
                        "appName": "tonconnect-wallet",
                        "appVersion": "0.1.0",
                        "maxProtocolVersion": 2,
                        "features": [{"name": "SendTransaction", "maxMessages": 4}]
                    }
                }
            })
        );
    }

    #[test]
    fn disconnect_event_has_empty_payload() {
        let event = WalletEvent::Disconnect {
            id: 7,
            payload: EmptyPayload::default(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "disconnect", "id": 7, "payload": {}})
        );
    }

    #[test]
    fn send_transaction_params_parse() {
        let request: AppRequest = serde_json::from_value(json!({
            "method": "sendTransaction",
            "params": [r#"{"messages":[{"address":"0:ab","amount":"1000"}],"valid_until":1700000000,"from":"0:cd"}"#],
            "id": "4"
        }))
        .unwrap();
        assert_eq!(request.id, RequestId::Text("4".to_string()));

        let params: SendTransactionRequest = serde_json::from_str(&request.params[0]).unwrap();
        assert_eq!(params.messages[0].amount, "1000");
        assert_eq!(params.valid_until, Some(1700000000));
        assert_eq!(params.from.as_deref(), Some("0:cd"));
    }

    #[test]
    fn network_ids() {
        assert_eq!(serde_json::to_value(TonNetwork::Mainnet).unwrap(), json!("-239"));
        assert_eq!(
            serde_json::from_value::<TonNetwork>(json!("-3")).unwrap(),
            TonNetwork::Testnet
        );
    }
}
