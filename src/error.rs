pub use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::BridgeError;

#[derive(Debug, Error)]
pub enum TonConnectError {
    #[error("incorrect connect url: {0}")]
    IncorrectUrl(String),
    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(anyhow::Error),
    #[error("wallet cannot connect to dapps")]
    UnsupportedWallet,
    #[error("signing denied: {0}")]
    SigningDenied(anyhow::Error),
    #[error("another request is already being processed for this wallet")]
    AlreadyProcessing,
    #[error(transparent)]
    Transport(#[from] BridgeError),
    #[error("bad request: {0}")]
    BadRequest(anyhow::Error),
    #[error("no session for client {0}")]
    UnknownSession(String),
    #[error("declined by user")]
    Declined,
    #[error("superseded or cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
    #[error("wallet contract error: {0}")]
    Contract(anyhow::Error),
}

impl TonConnectError {
    /// `true` for the offline flavour of a transport failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport(BridgeError::Connectivity(_)))
    }

    /// Error as the dapp sees it on the wire.
    pub fn to_wallet_error(&self) -> WalletError {
        let code = match self {
            Self::IncorrectUrl(_) | Self::BadRequest(_) | Self::AlreadyProcessing => {
                WalletErrorCode::BadRequest
            }
            Self::ManifestUnavailable(_) => WalletErrorCode::ManifestNotFound,
            Self::UnknownSession(_) => WalletErrorCode::UnknownApp,
            Self::Declined => WalletErrorCode::UserDeclined,
            Self::UnsupportedWallet
            | Self::SigningDenied(_)
            | Self::Transport(_)
            | Self::Cancelled
            | Self::Storage(_)
            | Self::Contract(_) => WalletErrorCode::Unknown,
        };

        WalletError {
            code,
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for TonConnectError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.into())
    }
}

/// TonConnect error codes shared by connect and request responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletErrorCode {
    Unknown,
    BadRequest,
    ManifestNotFound,
    ManifestContentError,
    UnknownApp,
    UserDeclined,
    MethodNotSupported,
}

impl WalletErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::BadRequest => 1,
            Self::ManifestNotFound => 2,
            Self::ManifestContentError => 3,
            Self::UnknownApp => 100,
            Self::UserDeclined => 300,
            Self::MethodNotSupported => 400,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1 => Self::BadRequest,
            2 => Self::ManifestNotFound,
            3 => Self::ManifestContentError,
            100 => Self::UnknownApp,
            300 => Self::UserDeclined,
            400 => Self::MethodNotSupported,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for WalletErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

impl<'de> Deserialize<'de> for WalletErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u16::deserialize(deserializer).map(Self::from_u16)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletError {
    pub code: WalletErrorCode,
    pub message: String,
}

pub type Result<T, E = TonConnectError> = std::result::Result<T, E>;
