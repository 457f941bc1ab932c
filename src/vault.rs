//! In-process [`KeyVault`] holding ed25519 keys in memory.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;

use crate::{address::WalletAddress, interfaces::KeyVault};

#[derive(Default)]
pub struct MemoryKeyVault {
    keys: Mutex<HashMap<WalletAddress, SigningKey>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, address: WalletAddress, seed: [u8; 32]) {
        self.keys.lock().insert(address, SigningKey::from_bytes(&seed));
    }

    pub fn remove_key(&self, address: &WalletAddress) {
        self.keys.lock().remove(address);
    }
}

#[async_trait]
impl KeyVault for MemoryKeyVault {
    async fn public_key(&self, address: &WalletAddress) -> anyhow::Result<[u8; 32]> {
        self.keys
            .lock()
            .get(address)
            .map(|key| key.verifying_key().to_bytes())
            .ok_or_else(|| anyhow!("no key for {address}"))
    }

    async fn sign(&self, address: &WalletAddress, message: &[u8]) -> anyhow::Result<[u8; 64]> {
        self.keys
            .lock()
            .get(address)
            .map(|key| key.sign(message).to_bytes())
            .ok_or_else(|| anyhow!("no private key for {address}, watch-only wallet?"))
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.blobs.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use super::*;

    #[tokio::test]
    async fn signs_with_inserted_key() {
        let vault = MemoryKeyVault::new();
        let address = WalletAddress::new(0, [1; 32]);
        vault.insert_key(address, [7; 32]);

        let public = vault.public_key(&address).await.unwrap();
        let signature = vault.sign(&address, b"msg").await.unwrap();
        VerifyingKey::from_bytes(&public)
            .unwrap()
            .verify(b"msg", &Signature::from_bytes(&signature))
            .unwrap();
    }

    #[tokio::test]
    async fn refuses_unknown_wallet() {
        let vault = MemoryKeyVault::new();
        assert!(vault.sign(&WalletAddress::new(0, [2; 32]), b"msg").await.is_err());
    }

    #[tokio::test]
    async fn blob_storage() {
        let vault = MemoryKeyVault::new();
        assert_eq!(vault.load("k").await.unwrap(), None);
        vault.store("k", vec![1, 2]).await.unwrap();
        assert_eq!(vault.load("k").await.unwrap(), Some(vec![1, 2]));
        vault.delete("k").await.unwrap();
        assert_eq!(vault.load("k").await.unwrap(), None);
    }
}
