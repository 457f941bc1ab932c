//! End-to-end connect and disconnect flows.
//!
//! ```text
//! deeplink ─▶ parse ─▶ open session ─▶ fetch manifest ─▶ approval ─▶ sign proof
//!          ─▶ build connect event ─▶ send via bridge ─▶ record session ─▶ restart bridge
//! ```
//!
//! A second connect for the same wallet and manifest url supersedes the one
//! in flight: the older attempt is cancelled and never records a session.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    address::WalletAddress,
    bridge::BridgeTransport,
    config::Config,
    deeplink::{self, ConnectParameters},
    dispatcher::{send_sealed, RequestDispatcher},
    dto::{ConnectItem, EmptyPayload, Manifest, WalletEvent},
    error::{Result, TonConnectError},
    interfaces::{ConnectionApproval, Wallet, WalletServices},
    manifest::ManifestClient,
    proof,
    registry::{SessionRecord, SessionRegistry},
    response::{self, WalletInfo},
    session_crypto::{self, SessionKeyMaterial},
    utils::unix_now,
};

type AttemptKey = (WalletAddress, String);

pub struct ConnectionController {
    config: Config,
    services: WalletServices,
    manifests: ManifestClient,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<RequestDispatcher>,
    bridge: BridgeTransport,
    attempts: Mutex<HashMap<AttemptKey, (u64, CancellationToken)>>,
    next_attempt: AtomicU64,
}

impl ConnectionController {
    pub fn new(
        config: Config,
        services: WalletServices,
        manifests: ManifestClient,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<RequestDispatcher>,
        bridge: BridgeTransport,
    ) -> Self {
        Self {
            config,
            services,
            manifests,
            registry,
            dispatcher,
            bridge,
            attempts: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Loads the wallet's sessions and (re)subscribes the bridge to them.
    pub async fn restore(&self, wallet: &Wallet) -> Result<usize> {
        let count = self.dispatcher.restore(wallet).await?;
        self.bridge.start(self.dispatcher.own_client_ids());
        Ok(count)
    }

    pub async fn connect(&self, wallet: &Wallet, uri: &str) -> Result<SessionRecord> {
        let params = deeplink::parse(uri)?;
        self.connect_with(wallet, &params).await
    }

    pub async fn connect_with(
        &self,
        wallet: &Wallet,
        params: &ConnectParameters,
    ) -> Result<SessionRecord> {
        if !wallet.can_connect() {
            return Err(TonConnectError::UnsupportedWallet);
        }

        let key = (wallet.address, params.request.manifest_url.clone());
        let (attempt, token) = self.begin_attempt(&key);

        let result = tokio::select! {
            _ = token.cancelled() => Err(TonConnectError::Cancelled),
            result = self.handshake(wallet, params) => result,
        };
        let result = match result {
            Ok(record) if !token.is_cancelled() => self.commit(wallet, record).await,
            Ok(_) => Err(TonConnectError::Cancelled),
            Err(e) => Err(e),
        };

        self.end_attempt(&key, attempt);
        if let Err(e) = &result {
            warn!(wallet = %wallet.address, dapp = %key.1, error = %e, "connect failed");
        }
        result
    }

    /// Wallet initiated disconnect of one dapp. `false` when it was not connected.
    pub async fn disconnect(&self, wallet: &WalletAddress, manifest_url: &str) -> Result<bool> {
        let Some(record) = self.registry.remove(wallet, manifest_url).await? else {
            return Ok(false);
        };
        self.dispatcher.forget(record.client_id());
        self.notify_disconnect(&record).await;
        self.bridge.start(self.dispatcher.own_client_ids());
        Ok(true)
    }

    /// Logout: pending connects of `wallet` are cancelled, every dapp is told
    /// and forgotten.
    pub async fn disconnect_all(&self, wallet: &WalletAddress) -> Result<usize> {
        self.cancel_attempts(wallet);
        let records = self.registry.disconnect_all(wallet).await?;
        self.dispatcher.remove_wallet(wallet);
        for record in &records {
            self.notify_disconnect(record).await;
        }
        self.bridge.start(self.dispatcher.own_client_ids());
        Ok(records.len())
    }

    async fn handshake(
        &self,
        wallet: &Wallet,
        params: &ConnectParameters,
    ) -> Result<SessionRecord> {
        let session = session_crypto::open(&params.client_id);

        let result = self.negotiate(wallet, params, &session).await;
        let (event, manifest) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.send_connect_error(&session, &e).await;
                return Err(e);
            }
        };

        send_sealed(&self.bridge, &session, self.config.message_ttl, &event).await?;
        info!(wallet = %wallet.address, dapp = %manifest.url, "connect event sent");

        Ok(SessionRecord {
            wallet_address: wallet.address,
            manifest,
            session,
            connected_at: unix_now().map_err(TonConnectError::Storage)?,
        })
    }

    async fn negotiate(
        &self,
        wallet: &Wallet,
        params: &ConnectParameters,
        session: &SessionKeyMaterial,
    ) -> Result<(WalletEvent, Manifest)> {
        let manifest = self.manifests.fetch(&params.request.manifest_url).await?;

        let proof_payload = params.request.items.iter().find_map(|item| match item {
            ConnectItem::TonProof { payload } => Some(payload.as_str()),
            _ => None,
        });

        let approval = ConnectionApproval {
            wallet: wallet.address,
            manifest: manifest.clone(),
            proof_requested: proof_payload.is_some(),
        };
        if !self.services.approval.approve_connection(&approval).await {
            info!(dapp = %manifest.url, "connection declined");
            return Err(TonConnectError::Declined);
        }

        let proof = match proof_payload {
            Some(payload) => {
                let domain = proof_domain(&manifest)?;
                let vault = self.services.vault.as_ref();
                Some(proof::sign(&wallet.address, &domain, payload, vault).await?)
            }
            None => None,
        };

        let info = WalletInfo {
            address: wallet.address.to_raw(),
            network: wallet.network,
            public_key: self
                .services
                .vault
                .public_key(&wallet.address)
                .await
                .map_err(TonConnectError::SigningDenied)?,
            state_init: self
                .services
                .contract
                .state_init(wallet)
                .await
                .map_err(TonConnectError::Contract)?,
        };

        let event = response::build(
            unix_now().map_err(TonConnectError::Storage)?,
            &params.request.items,
            &info,
            proof.as_ref(),
            &self.config.device_info(),
        );
        info!(
            dapp = %manifest.url,
            own_client_id = %session.own_client_id(),
            "connection approved"
        );
        Ok((event, manifest))
    }

    async fn commit(&self, wallet: &Wallet, record: SessionRecord) -> Result<SessionRecord> {
        self.registry.add(record.clone()).await?;
        self.dispatcher.add_wallet(wallet.clone());
        self.dispatcher.track(record.clone());
        self.bridge.start(self.dispatcher.own_client_ids());
        Ok(record)
    }

    async fn send_connect_error(&self, session: &SessionKeyMaterial, error: &TonConnectError) {
        let id = unix_now().unwrap_or_default();
        let event = response::build_error(id, error.to_wallet_error());
        if let Err(e) = send_sealed(&self.bridge, session, self.config.message_ttl, &event).await {
            warn!(error = %e, "connect error not delivered");
        }
    }

    async fn notify_disconnect(&self, record: &SessionRecord) {
        let event = WalletEvent::Disconnect {
            id: unix_now().unwrap_or_default(),
            payload: EmptyPayload::default(),
        };
        let ttl = self.config.message_ttl;
        if let Err(e) = send_sealed(&self.bridge, &record.session, ttl, &event).await {
            warn!(error = %e, dapp = %record.manifest.url, "disconnect event not delivered");
        }
    }

    fn begin_attempt(&self, key: &AttemptKey) -> (u64, CancellationToken) {
        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let previous = self
            .attempts
            .lock()
            .insert(key.clone(), (attempt, token.clone()));
        if let Some((_, previous)) = previous {
            info!(dapp = %key.1, "superseding connect in flight");
            previous.cancel();
        }
        (attempt, token)
    }

    fn cancel_attempts(&self, wallet: &WalletAddress) {
        for ((address, dapp), (_, token)) in self.attempts.lock().iter() {
            if address == wallet {
                info!(dapp = %dapp, "cancelling connect of logged out wallet");
                token.cancel();
            }
        }
    }

    fn end_attempt(&self, key: &AttemptKey, attempt: u64) {
        let mut attempts = self.attempts.lock();
        if attempts.get(key).map(|(current, _)| *current) == Some(attempt) {
            attempts.remove(key);
        }
    }
}

/// Host of the dapp's own url, which is what the proof is bound to.
fn proof_domain(manifest: &Manifest) -> Result<String> {
    let url = url::Url::parse(&manifest.url)
        .map_err(|e| TonConnectError::ManifestUnavailable(e.into()))?;
    url.host_str().map(str::to_string).ok_or_else(|| {
        TonConnectError::ManifestUnavailable(anyhow!("manifest url {} has no host", manifest.url))
    })
}
