//! Routing of inbound relay events to typed dapp requests.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use base64::prelude::*;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    address::{AddressParseError, WalletAddress},
    bridge::{BridgeEvent, BridgeTransport, OutgoingMessage},
    dto::{AppRequest, EmptyPayload, RequestId, SendTransactionRequest, WalletResponse},
    error::{Result, TonConnectError},
    interfaces::{TransactionApproval, Wallet, WalletServices},
    registry::{SessionRecord, SessionRegistry},
    session_crypto::SessionKeyMaterial,
    utils::unix_now,
};

const SEND_TRANSACTION: &str = "sendTransaction";
const DISCONNECT: &str = "disconnect";

/// Per wallet "sign in flight" flags.
#[derive(Debug, Clone, Default)]
pub struct SigningGuard {
    in_flight: Arc<Mutex<HashSet<WalletAddress>>>,
}

impl SigningGuard {
    /// `None` while another sign for `wallet` is running.
    pub fn try_acquire(&self, wallet: WalletAddress) -> Option<SigningPermit> {
        if !self.in_flight.lock().insert(wallet) {
            return None;
        }
        Some(SigningPermit {
            guard: self.clone(),
            wallet,
        })
    }

    pub fn is_signing(&self, wallet: &WalletAddress) -> bool {
        self.in_flight.lock().contains(wallet)
    }
}

#[derive(Debug)]
pub struct SigningPermit {
    guard: SigningGuard,
    wallet: WalletAddress,
}

impl Drop for SigningPermit {
    fn drop(&mut self) {
        self.guard.in_flight.lock().remove(&self.wallet);
    }
}

#[derive(Debug)]
pub enum Dispatched {
    /// Unknown method, nothing done.
    Ignored,
    Disconnected(SessionRecord),
    /// Approval, signing and reply run in this task; it resolves to the signed BOC.
    Signing(JoinHandle<Result<String>>),
}

pub struct RequestDispatcher {
    services: WalletServices,
    registry: Arc<SessionRegistry>,
    bridge: BridgeTransport,
    max_messages: u32,
    message_ttl: Duration,
    wallets: RwLock<HashMap<WalletAddress, (Wallet, CancellationToken)>>,
    // dapp client id -> session, rebuilt from the registry on restore
    sessions: RwLock<HashMap<String, SessionRecord>>,
    signing: SigningGuard,
}

impl RequestDispatcher {
    pub fn new(
        services: WalletServices,
        registry: Arc<SessionRegistry>,
        bridge: BridgeTransport,
        max_messages: u32,
        message_ttl: Duration,
    ) -> Self {
        Self {
            services,
            registry,
            bridge,
            max_messages,
            message_ttl,
            wallets: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            signing: SigningGuard::default(),
        }
    }

    pub fn signing_guard(&self) -> &SigningGuard {
        &self.signing
    }

    pub fn add_wallet(&self, wallet: Wallet) {
        self.wallets
            .write()
            .entry(wallet.address)
            .or_insert_with(|| (wallet, CancellationToken::new()));
    }

    /// Cancels the wallet's pending approvals and forgets its sessions.
    pub fn remove_wallet(&self, address: &WalletAddress) {
        if let Some((_, token)) = self.wallets.write().remove(address) {
            token.cancel();
        }
        self.sessions
            .write()
            .retain(|_, record| record.wallet_address != *address);
    }

    pub fn track(&self, record: SessionRecord) {
        let mut sessions = self.sessions.write();
        // a reconnect of the same dapp replaces the old session
        sessions.retain(|_, existing| {
            existing.wallet_address != record.wallet_address
                || existing.manifest.url != record.manifest.url
        });
        sessions.insert(record.client_id().to_string(), record);
    }

    pub fn forget(&self, client_id: &str) {
        self.sessions.write().remove(client_id);
    }

    /// Relay ids to subscribe to, one per tracked session.
    pub fn own_client_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .map(SessionRecord::own_client_id)
            .collect()
    }

    /// Loads `wallet`'s sessions from the registry into the index.
    pub async fn restore(&self, wallet: &Wallet) -> Result<usize> {
        self.add_wallet(wallet.clone());
        let records = self.registry.records(&wallet.address).await?;
        let count = records.len();
        for record in records {
            self.track(record);
        }
        info!(wallet = %wallet.address, count, "sessions restored");
        Ok(count)
    }

    /// Consumes inbound relay events until `cancel` fires. Every event gets its
    /// own task, so a slow relay reply never stalls the queue.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<BridgeEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("bridge event feed closed");
                return;
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.dispatch(event).await {
                    warn!(error = %e, "dropping bridge event");
                }
            });
        }
    }

    pub async fn dispatch(self: &Arc<Self>, event: BridgeEvent) -> Result<Dispatched> {
        let from = event.message.from;
        let record = self
            .sessions
            .read()
            .get(&from)
            .cloned()
            .ok_or_else(|| TonConnectError::UnknownSession(from.clone()))?;

        let sealed = BASE64_STANDARD
            .decode(&event.message.message)
            .map_err(|e| TonConnectError::BadRequest(e.into()))?;
        let plain = record
            .session
            .decrypt(&sealed)
            .map_err(TonConnectError::BadRequest)?;
        let request: AppRequest = serde_json::from_slice(&plain)?;
        debug!(
            method = %request.method,
            id = %request.id,
            dapp = %record.manifest.url,
            "dapp request"
        );

        match request.method.as_str() {
            SEND_TRANSACTION => self.begin_send_transaction(record, request).await,
            DISCONNECT => self.dapp_disconnect(record, request.id).await,
            other => {
                warn!(method = other, "ignoring unsupported dapp method");
                Ok(Dispatched::Ignored)
            }
        }
    }

    async fn dapp_disconnect(&self, record: SessionRecord, id: RequestId) -> Result<Dispatched> {
        self.registry
            .remove_client(&record.wallet_address, record.client_id())
            .await?;
        self.forget(record.client_id());
        self.bridge.start(self.own_client_ids());

        let response = WalletResponse::Success {
            id,
            result: serde_json::to_value(EmptyPayload::default())?,
        };
        let sent = send_sealed(&self.bridge, &record.session, self.message_ttl, &response).await;
        if let Err(e) = sent {
            warn!(error = %e, "disconnect acknowledgement not delivered");
        }
        info!(dapp = %record.manifest.url, "dapp disconnected");
        Ok(Dispatched::Disconnected(record))
    }

    async fn begin_send_transaction(
        self: &Arc<Self>,
        record: SessionRecord,
        request: AppRequest,
    ) -> Result<Dispatched> {
        let id = request.id.clone();
        let checked = self.check_send_transaction(&record, &request);
        let (wallet, cancel, params) = match checked {
            Ok(checked) => checked,
            Err(e) => {
                self.reply_error(&record, id, &e).await;
                return Err(e);
            }
        };

        let Some(permit) = self.signing.try_acquire(wallet.address) else {
            let e = TonConnectError::AlreadyProcessing;
            warn!(wallet = %wallet.address, "rejecting concurrent sign request");
            self.reply_error(&record, id, &e).await;
            return Err(e);
        };

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _permit = permit;
            let result = this.sign_and_send(&record, &wallet, params, cancel).await;
            let response = match &result {
                Ok(boc) => WalletResponse::Success {
                    id,
                    result: serde_json::Value::String(boc.clone()),
                },
                Err(e) => {
                    warn!(error = %e, wallet = %wallet.address, "sendTransaction failed");
                    WalletResponse::Error {
                        id,
                        error: e.to_wallet_error(),
                    }
                }
            };
            let sent =
                send_sealed(&this.bridge, &record.session, this.message_ttl, &response).await;
            if let Err(e) = sent {
                warn!(error = %e, "sendTransaction response not delivered");
            }
            result
        });

        Ok(Dispatched::Signing(task))
    }

    fn check_send_transaction(
        &self,
        record: &SessionRecord,
        request: &AppRequest,
    ) -> Result<(Wallet, CancellationToken, SendTransactionRequest)> {
        let (wallet, token) = self
            .wallets
            .read()
            .get(&record.wallet_address)
            .cloned()
            .ok_or_else(|| {
                TonConnectError::BadRequest(anyhow!("wallet {} is not held", record.wallet_address))
            })?;

        let raw = request
            .params
            .first()
            .ok_or_else(|| TonConnectError::BadRequest(anyhow!("missing sendTransaction params")))?;
        let params: SendTransactionRequest = serde_json::from_str(raw)?;

        if let Some(from) = &params.from {
            let from: WalletAddress = from
                .parse()
                .map_err(|e: AddressParseError| TonConnectError::BadRequest(e.into()))?;
            if from != wallet.address {
                return Err(TonConnectError::BadRequest(anyhow!(
                    "from {from} does not match connected wallet {}",
                    wallet.address
                )));
            }
        }

        if params.messages.is_empty() || params.messages.len() > self.max_messages as usize {
            return Err(TonConnectError::BadRequest(anyhow!(
                "expected 1..={} messages, got {}",
                self.max_messages,
                params.messages.len()
            )));
        }

        if let Some(valid_until) = params.valid_until {
            let now = unix_now().map_err(TonConnectError::BadRequest)?;
            if valid_until < now {
                return Err(TonConnectError::BadRequest(anyhow!(
                    "request expired at {valid_until}"
                )));
            }
        }

        Ok((wallet, token.child_token(), params))
    }

    async fn sign_and_send(
        &self,
        record: &SessionRecord,
        wallet: &Wallet,
        request: SendTransactionRequest,
        cancel: CancellationToken,
    ) -> Result<String> {
        let approval = TransactionApproval {
            wallet: wallet.address,
            manifest: record.manifest.clone(),
            request,
        };
        let approved = tokio::select! {
            _ = cancel.cancelled() => return Err(TonConnectError::Cancelled),
            approved = self.services.approval.approve_transaction(&approval) => approved,
        };
        if !approved {
            info!(wallet = %wallet.address, "transaction declined");
            return Err(TonConnectError::Declined);
        }

        let contract = &self.services.contract;
        let transfer = contract
            .build_transfer(wallet, &approval.request)
            .await
            .map_err(TonConnectError::Contract)?;
        let signature = self
            .services
            .vault
            .sign(&wallet.address, &transfer.signing_message)
            .await
            .map_err(TonConnectError::SigningDenied)?;
        let boc = contract
            .send_signed(wallet, transfer, signature)
            .await
            .map_err(TonConnectError::Contract)?;

        info!(wallet = %wallet.address, dapp = %record.manifest.url, "transaction sent");
        Ok(boc)
    }

    async fn reply_error(&self, record: &SessionRecord, id: RequestId, error: &TonConnectError) {
        let response = WalletResponse::Error {
            id,
            error: error.to_wallet_error(),
        };
        let sent = send_sealed(&self.bridge, &record.session, self.message_ttl, &response).await;
        if let Err(e) = sent {
            warn!(error = %e, "error response not delivered");
        }
    }
}

/// Encrypts `payload` for the session's dapp and posts it to the relay.
pub(crate) async fn send_sealed<T: Serialize>(
    bridge: &BridgeTransport,
    session: &SessionKeyMaterial,
    ttl: Duration,
    payload: &T,
) -> Result<()> {
    let plain = serde_json::to_vec(payload)?;
    let body = session.encrypt(&plain).map_err(TonConnectError::BadRequest)?;
    bridge
        .send(OutgoingMessage {
            from: session.own_client_id(),
            to: session.client_id.clone(),
            ttl,
            body,
        })
        .await?;
    Ok(())
}
