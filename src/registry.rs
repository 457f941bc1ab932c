//! Durable record of connected dapps, one collection per wallet.
//!
//! Records live in the [`KeyVault`] because they contain session secrets.
//! Mutations of one wallet's collection are serialized by a per-wallet lock;
//! different wallets never wait on each other.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    address::WalletAddress,
    dto::Manifest,
    error::{Result, TonConnectError},
    interfaces::KeyVault,
    session_crypto::SessionKeyMaterial,
};

const STORAGE_PREFIX: &str = "tonconnect.sessions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub wallet_address: WalletAddress,
    pub manifest: Manifest,
    pub session: SessionKeyMaterial,
    pub connected_at: u64,
}

impl SessionRecord {
    /// Relay id of the dapp.
    pub fn client_id(&self) -> &str {
        &self.session.client_id
    }

    /// Relay id the wallet listens on for this dapp.
    pub fn own_client_id(&self) -> String {
        self.session.own_client_id()
    }

    fn same_dapp(&self, other: &SessionRecord) -> bool {
        self.wallet_address == other.wallet_address && self.manifest.url == other.manifest.url
    }
}

pub struct SessionRegistry {
    vault: Arc<dyn KeyVault>,
    locks: Mutex<HashMap<WalletAddress, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new(vault: Arc<dyn KeyVault>) -> Self {
        Self {
            vault,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn records(&self, wallet: &WalletAddress) -> Result<Vec<SessionRecord>> {
        let bytes = self
            .vault
            .load(&storage_key(wallet))
            .await
            .map_err(TonConnectError::Storage)?;

        match bytes {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| TonConnectError::Storage(e.into()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Inserts `record`, replacing any record for the same wallet and manifest url.
    pub async fn add(&self, record: SessionRecord) -> Result<()> {
        let wallet = record.wallet_address;
        let lock = self.wallet_lock(&wallet);
        let _guard = lock.lock().await;

        let mut records = self.records(&wallet).await?;
        let before = records.len();
        records.retain(|existing| !existing.same_dapp(&record));
        if records.len() != before {
            debug!(wallet = %wallet, dapp = %record.manifest.url, "replacing session record");
        }
        info!(wallet = %wallet, dapp = %record.manifest.url, "session recorded");
        records.push(record);

        self.save(&wallet, &records).await
    }

    pub async fn remove(
        &self,
        wallet: &WalletAddress,
        manifest_url: &str,
    ) -> Result<Option<SessionRecord>> {
        self.remove_where(wallet, |record| record.manifest.url == manifest_url)
            .await
    }

    /// Removes the record talking to the dapp relay id `client_id`.
    pub async fn remove_client(
        &self,
        wallet: &WalletAddress,
        client_id: &str,
    ) -> Result<Option<SessionRecord>> {
        self.remove_where(wallet, |record| record.client_id() == client_id)
            .await
    }

    /// Drops every record of `wallet`, e.g. on logout or wallet deletion.
    pub async fn disconnect_all(&self, wallet: &WalletAddress) -> Result<Vec<SessionRecord>> {
        let lock = self.wallet_lock(wallet);
        let _guard = lock.lock().await;

        let records = self.records(wallet).await?;
        self.vault
            .delete(&storage_key(wallet))
            .await
            .map_err(TonConnectError::Storage)?;
        info!(wallet = %wallet, count = records.len(), "all sessions removed");
        Ok(records)
    }

    async fn remove_where(
        &self,
        wallet: &WalletAddress,
        matches: impl Fn(&SessionRecord) -> bool,
    ) -> Result<Option<SessionRecord>> {
        let lock = self.wallet_lock(wallet);
        let _guard = lock.lock().await;

        let mut records = self.records(wallet).await?;
        let Some(index) = records.iter().position(matches) else {
            return Ok(None);
        };
        let removed = records.remove(index);
        self.save(wallet, &records).await?;
        info!(wallet = %wallet, dapp = %removed.manifest.url, "session removed");
        Ok(Some(removed))
    }

    async fn save(&self, wallet: &WalletAddress, records: &[SessionRecord]) -> Result<()> {
        let bytes = serde_json::to_vec(records).map_err(|e| TonConnectError::Storage(e.into()))?;
        self.vault
            .store(&storage_key(wallet), bytes)
            .await
            .map_err(TonConnectError::Storage)
    }

    fn wallet_lock(&self, wallet: &WalletAddress) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(*wallet).or_default())
    }
}

fn storage_key(wallet: &WalletAddress) -> String {
    format!("{STORAGE_PREFIX}.{}", wallet.to_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{session_crypto, vault::MemoryKeyVault};

    const DAPP_ID: &str = "230f1e4df32364888a5dbd92a410266fcb974b73e30ff3e546a654fc8ee2c953";

    fn manifest(url: &str) -> Manifest {
        Manifest {
            url: url.to_string(),
            name: "Dapp".to_string(),
            icon_url: format!("{url}/icon.png"),
            terms_of_use_url: None,
            privacy_policy_url: None,
        }
    }

    fn record(wallet: WalletAddress, url: &str) -> SessionRecord {
        SessionRecord {
            wallet_address: wallet,
            manifest: manifest(url),
            session: session_crypto::open(DAPP_ID),
            connected_at: 1,
        }
    }

    fn registry() -> (Arc<MemoryKeyVault>, SessionRegistry) {
        let vault = Arc::new(MemoryKeyVault::new());
        let registry = SessionRegistry::new(Arc::clone(&vault) as Arc<dyn KeyVault>);
        (vault, registry)
    }

    #[tokio::test]
    async fn same_dapp_twice_keeps_one_record() {
        let (_, registry) = registry();
        let wallet = WalletAddress::new(0, [1; 32]);

        registry.add(record(wallet, "https://a.example")).await.unwrap();
        let second = record(wallet, "https://a.example");
        registry.add(second.clone()).await.unwrap();

        let records = registry.records(&wallet).await.unwrap();
        assert_eq!(records, vec![second]);
    }

    #[tokio::test]
    async fn different_dapps_and_wallets_are_separate() {
        let (_, registry) = registry();
        let first = WalletAddress::new(0, [1; 32]);
        let second = WalletAddress::new(0, [2; 32]);

        registry.add(record(first, "https://a.example")).await.unwrap();
        registry.add(record(first, "https://b.example")).await.unwrap();
        registry.add(record(second, "https://a.example")).await.unwrap();

        assert_eq!(registry.records(&first).await.unwrap().len(), 2);
        assert_eq!(registry.records(&second).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_survive_a_new_registry() {
        let (vault, registry) = registry();
        let wallet = WalletAddress::new(0, [1; 32]);
        let added = record(wallet, "https://a.example");
        registry.add(added.clone()).await.unwrap();

        let reopened = SessionRegistry::new(vault as Arc<dyn KeyVault>);
        let records = reopened.records(&wallet).await.unwrap();
        assert_eq!(records, vec![added.clone()]);
        assert_eq!(records[0].own_client_id(), added.own_client_id());
    }

    #[tokio::test]
    async fn remove_and_disconnect_all() {
        let (_, registry) = registry();
        let wallet = WalletAddress::new(0, [1; 32]);
        registry.add(record(wallet, "https://a.example")).await.unwrap();
        registry.add(record(wallet, "https://b.example")).await.unwrap();

        let removed = registry.remove(&wallet, "https://a.example").await.unwrap();
        assert_eq!(removed.unwrap().manifest.url, "https://a.example");
        assert!(registry.remove(&wallet, "https://a.example").await.unwrap().is_none());

        let all = registry.disconnect_all(&wallet).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(registry.records(&wallet).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_by_dapp_client_id() {
        let (_, registry) = registry();
        let wallet = WalletAddress::new(0, [1; 32]);
        registry.add(record(wallet, "https://a.example")).await.unwrap();

        assert!(registry.remove_client(&wallet, "ffff").await.unwrap().is_none());
        assert!(registry.remove_client(&wallet, DAPP_ID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_adds_lose_nothing() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let wallet = WalletAddress::new(0, [1; 32]);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .add(record(wallet, &format!("https://{i}.example")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.records(&wallet).await.unwrap().len(), 16);
    }
}
