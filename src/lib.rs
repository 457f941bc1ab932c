//! Wallet side of the TonConnect protocol: connect deeplinks, `ton_proof`
//! signing, encrypted sessions over the HTTP bridge and dapp requests.

pub mod address;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod deeplink;
pub mod dispatcher;
pub mod dto;
pub mod error;
pub mod interfaces;
pub mod manifest;
pub mod proof;
pub mod registry;
pub mod response;
pub mod session_crypto;
pub mod utils;
pub mod vault;

#[cfg(test)]
mod test_utils;

pub use address::WalletAddress;
pub use bridge::{BridgeConnectionState, BridgeTransport, BridgeUpdate, HttpBridge};
pub use config::Config;
pub use controller::ConnectionController;
pub use dispatcher::RequestDispatcher;
pub use error::{Result, TonConnectError};
pub use interfaces::{ApprovalUi, KeyVault, Wallet, WalletContract, WalletKind, WalletServices};
pub use registry::{SessionRecord, SessionRegistry};
