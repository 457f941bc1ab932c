//! Ephemeral session keys and the authenticated box used on the relay.
//!
//! Wire layout of an encrypted message: `nonce (24 bytes) || box`, where the
//! box is X25519 + XSalsa20-Poly1305 between the wallet's session secret and
//! the dapp's session public key. Relay ids are the hex encoded public keys.

use std::fmt::{self, Debug};

use anyhow::anyhow;
use crypto_box::{
    aead::{generic_array::GenericArray, Aead, AeadCore, OsRng},
    PublicKey, SalsaBox, SecretKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::decode_hex32;

const NONCE_LENGTH: usize = 24;

pub struct SessionKeyPair {
    secret: SecretKey,
}

impl SessionKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::generate(&mut OsRng),
        }
    }

    /// Own relay id.
    pub fn client_id(&self) -> String {
        hex::encode(self.secret.public_key().as_bytes())
    }

    pub fn encrypt(&self, plaintext: &[u8], receiver_client_id: &str) -> anyhow::Result<Vec<u8>> {
        let salsa_box = SalsaBox::new(&peer_key(receiver_client_id)?, &self.secret);
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = salsa_box
            .encrypt(&nonce, plaintext)
            .map_err(|_| anyhow!("encryption failed"))?;

        let mut message = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        message.extend_from_slice(&nonce);
        message.extend_from_slice(&ciphertext);
        Ok(message)
    }

    pub fn decrypt(&self, message: &[u8], sender_client_id: &str) -> anyhow::Result<Vec<u8>> {
        if message.len() <= NONCE_LENGTH {
            return Err(anyhow!(
                "message too short, got {} bytes",
                message.len()
            ));
        }
        let (nonce, ciphertext) = message.split_at(NONCE_LENGTH);
        let salsa_box = SalsaBox::new(&peer_key(sender_client_id)?, &self.secret);
        salsa_box
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("decryption failed"))
    }

    fn to_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    fn from_hex(value: &str) -> Result<Self, String> {
        Ok(Self {
            secret: SecretKey::from(decode_hex32(value)?),
        })
    }
}

impl Clone for SessionKeyPair {
    fn clone(&self) -> Self {
        Self {
            secret: SecretKey::from(self.secret.to_bytes()),
        }
    }
}

impl PartialEq for SessionKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.secret.public_key() == other.secret.public_key()
    }
}

impl Eq for SessionKeyPair {}

// the secret half never ends up in logs
impl Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyPair")
            .field("public", &self.client_id())
            .field("secret", &"xxxxx".to_string())
            .finish()
    }
}

impl Serialize for SessionKeyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionKeyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Key material for one connect attempt, bound to the dapp's relay id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyMaterial {
    pub key_pair: SessionKeyPair,
    pub client_id: String,
}

impl SessionKeyMaterial {
    pub fn own_client_id(&self) -> String {
        self.key_pair.client_id()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.key_pair.encrypt(plaintext, &self.client_id)
    }

    pub fn decrypt(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.key_pair.decrypt(message, &self.client_id)
    }
}

/// Opens a fresh session towards `client_id`. Nothing is shared between calls.
pub fn open(client_id: &str) -> SessionKeyMaterial {
    SessionKeyMaterial {
        key_pair: SessionKeyPair::generate(),
        client_id: client_id.to_string(),
    }
}

fn peer_key(client_id: &str) -> anyhow::Result<PublicKey> {
    let bytes = decode_hex32(client_id).map_err(|e| anyhow!("client id {client_id:?}: {e}"))?;
    Ok(PublicKey::from(bytes))
}
