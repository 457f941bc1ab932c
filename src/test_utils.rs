//! Fakes shared by the flow tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{
    address::WalletAddress,
    bridge::{BridgeApi, BridgeError, BridgeEvent, EventStream, OutgoingMessage},
    dto::{BridgeMessage, SendTransactionRequest, TonNetwork},
    interfaces::{
        ApprovalUi, ConnectionApproval, KeyVault, TransactionApproval, UnsignedTransfer, Wallet,
        WalletContract, WalletKind, WalletServices,
    },
    session_crypto::SessionKeyPair,
    vault::MemoryKeyVault,
};

pub const STATE_INIT: &str = "te6cckEBAwEAoAACATQCAQDe/wAg3SCCAUyXuiGCATOcvbqx";

/// Relay that records what is sent and never delivers anything.
#[derive(Default)]
pub struct RecordingBridge {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub fail_sends: AtomicBool,
}

impl RecordingBridge {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl BridgeApi for RecordingBridge {
    async fn send(&self, message: OutgoingMessage) -> Result<(), BridgeError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::Status(503));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn listen(&self, _: &[String], _: Option<&str>) -> Result<EventStream, BridgeError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

#[derive(Default)]
pub struct FakeContract {
    pub broadcasts: AtomicUsize,
}

#[async_trait]
impl WalletContract for FakeContract {
    async fn state_init(&self, _: &Wallet) -> anyhow::Result<String> {
        Ok(STATE_INIT.to_string())
    }

    async fn build_transfer(
        &self,
        _: &Wallet,
        request: &SendTransactionRequest,
    ) -> anyhow::Result<UnsignedTransfer> {
        Ok(UnsignedTransfer {
            signing_message: serde_json::to_vec(request)?,
            body: Vec::new(),
        })
    }

    async fn send_signed(
        &self,
        _: &Wallet,
        _: UnsignedTransfer,
        signature: [u8; 64],
    ) -> anyhow::Result<String> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(BASE64_STANDARD.encode(signature))
    }
}

/// Approval UI answering with fixed decisions, optionally held until released.
pub struct ScriptedApproval {
    pub connect: AtomicBool,
    pub transaction: AtomicBool,
    connect_gate: Option<Semaphore>,
    transaction_gate: Option<Semaphore>,
    pub connection_requests: AtomicUsize,
    pub transaction_requests: AtomicUsize,
}

impl ScriptedApproval {
    pub fn approving() -> Self {
        Self {
            connect: AtomicBool::new(true),
            transaction: AtomicBool::new(true),
            connect_gate: None,
            transaction_gate: None,
            connection_requests: AtomicUsize::new(0),
            transaction_requests: AtomicUsize::new(0),
        }
    }

    pub fn gated() -> Self {
        Self {
            connect_gate: Some(Semaphore::new(0)),
            transaction_gate: Some(Semaphore::new(0)),
            ..Self::approving()
        }
    }

    pub fn release_connection(&self) {
        if let Some(gate) = &self.connect_gate {
            gate.add_permits(1);
        }
    }

    pub fn release_transaction(&self) {
        if let Some(gate) = &self.transaction_gate {
            gate.add_permits(1);
        }
    }
}

async fn pass(gate: &Option<Semaphore>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl ApprovalUi for ScriptedApproval {
    async fn approve_connection(&self, _: &ConnectionApproval) -> bool {
        self.connection_requests.fetch_add(1, Ordering::SeqCst);
        pass(&self.connect_gate).await;
        self.connect.load(Ordering::SeqCst)
    }

    async fn approve_transaction(&self, _: &TransactionApproval) -> bool {
        self.transaction_requests.fetch_add(1, Ordering::SeqCst);
        pass(&self.transaction_gate).await;
        self.transaction.load(Ordering::SeqCst)
    }
}

pub struct Fixture {
    pub wallet: Wallet,
    pub vault: Arc<MemoryKeyVault>,
    pub contract: Arc<FakeContract>,
    pub approval: Arc<ScriptedApproval>,
    pub relay: Arc<RecordingBridge>,
}

impl Fixture {
    pub fn new(approval: ScriptedApproval) -> Self {
        let address = WalletAddress::new(0, [0x11; 32]);
        let vault = Arc::new(MemoryKeyVault::new());
        vault.insert_key(address, [0x22; 32]);
        Self {
            wallet: Wallet {
                address,
                network: TonNetwork::Mainnet,
                kind: WalletKind::Regular,
            },
            vault,
            contract: Arc::new(FakeContract::default()),
            approval: Arc::new(approval),
            relay: Arc::new(RecordingBridge::default()),
        }
    }

    pub fn services(&self) -> WalletServices {
        WalletServices {
            vault: Arc::clone(&self.vault) as Arc<dyn KeyVault>,
            contract: Arc::clone(&self.contract) as Arc<dyn WalletContract>,
            approval: Arc::clone(&self.approval) as Arc<dyn ApprovalUi>,
        }
    }
}

/// The dapp end of a session.
pub struct TestDapp {
    pub key_pair: SessionKeyPair,
}

impl TestDapp {
    pub fn new() -> Self {
        Self {
            key_pair: SessionKeyPair::generate(),
        }
    }

    pub fn client_id(&self) -> String {
        self.key_pair.client_id()
    }

    pub fn request(&self, wallet_client_id: &str, request: serde_json::Value) -> BridgeEvent {
        let sealed = self
            .key_pair
            .encrypt(request.to_string().as_bytes(), wallet_client_id)
            .expect("encrypt");
        BridgeEvent {
            event_id: None,
            message: BridgeMessage {
                from: self.client_id(),
                message: BASE64_STANDARD.encode(sealed),
            },
        }
    }

    pub fn read(&self, message: &OutgoingMessage) -> serde_json::Value {
        assert_eq!(message.to, self.client_id());
        let plain = self
            .key_pair
            .decrypt(&message.body, &message.from)
            .expect("decrypt");
        serde_json::from_slice(&plain).expect("json")
    }
}
