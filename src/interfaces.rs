//! Collaborators supplied by the host wallet.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    address::WalletAddress,
    dto::{Manifest, SendTransactionRequest, TonNetwork},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletKind {
    Regular,
    WatchOnly,
    Lockup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: WalletAddress,
    pub network: TonNetwork,
    pub kind: WalletKind,
}

impl Wallet {
    /// Watch-only and lockup wallets cannot take part in TonConnect.
    pub fn can_connect(&self) -> bool {
        self.kind == WalletKind::Regular
    }
}

/// Keychain backed storage of private keys and small secret blobs.
#[async_trait]
pub trait KeyVault: Send + Sync {
    async fn public_key(&self, address: &WalletAddress) -> anyhow::Result<[u8; 32]>;

    /// Ed25519 signature over `message`. Fails when the wallet holds no key.
    async fn sign(&self, address: &WalletAddress, message: &[u8]) -> anyhow::Result<[u8; 64]>;

    async fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn store(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Transfer prepared by the wallet contract, waiting for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    /// Bytes the key signs (the cell hash of the transfer body).
    pub signing_message: Vec<u8>,
    /// Serialized body, opaque to this crate.
    pub body: Vec<u8>,
}

/// Cell codec and wallet contract logic.
#[async_trait]
pub trait WalletContract: Send + Sync {
    /// BOC of the wallet's state init, encoded as the dapp expects it.
    async fn state_init(&self, wallet: &Wallet) -> anyhow::Result<String>;

    async fn build_transfer(
        &self,
        wallet: &Wallet,
        request: &SendTransactionRequest,
    ) -> anyhow::Result<UnsignedTransfer>;

    /// Attaches the signature, broadcasts and returns the signed external message BOC.
    async fn send_signed(
        &self,
        wallet: &Wallet,
        transfer: UnsignedTransfer,
        signature: [u8; 64],
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionApproval {
    pub wallet: WalletAddress,
    pub manifest: Manifest,
    pub proof_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionApproval {
    pub wallet: WalletAddress,
    pub manifest: Manifest,
    pub request: SendTransactionRequest,
}

/// User consent. Either call may stay pending forever; callers race it
/// against their own cancellation.
#[async_trait]
pub trait ApprovalUi: Send + Sync {
    async fn approve_connection(&self, request: &ConnectionApproval) -> bool;

    async fn approve_transaction(&self, request: &TransactionApproval) -> bool;
}

/// The host collaborators, shared by the connect flow and the request dispatcher.
#[derive(Clone)]
pub struct WalletServices {
    pub vault: Arc<dyn KeyVault>,
    pub contract: Arc<dyn WalletContract>,
    pub approval: Arc<dyn ApprovalUi>,
}
