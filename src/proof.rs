//! `ton_proof` construction.
//!
//! ```text
//! message = "ton-proof-item-v2/"
//!           || workchain    (4 bytes, big endian)
//!           || address hash (32 bytes)
//!           || domain len   (4 bytes, little endian)
//!           || domain       (utf-8)
//!           || timestamp    (8 bytes, little endian)
//!           || payload      (utf-8)
//!
//! signed  = sha256(0xffff || "ton-connect" || sha256(message))
//! ```

use anyhow::anyhow;
use base64::prelude::*;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::{
    address::WalletAddress,
    dto::{TonDomain, TonProof},
    error::{Result, TonConnectError},
    interfaces::KeyVault,
    utils::unix_now,
};

const TON_PROOF_PREFIX: &str = "ton-proof-item-v2/";
const TON_CONNECT_PREFIX: &str = "ton-connect";

pub fn signature_message(
    address: &WalletAddress,
    domain: &TonDomain,
    timestamp: u64,
    payload: &str,
) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::new();
    msg.extend_from_slice(TON_PROOF_PREFIX.as_bytes());
    msg.extend_from_slice(&address.workchain.to_be_bytes());
    msg.extend_from_slice(&address.hash_part);
    msg.extend_from_slice(&domain.length_bytes().to_le_bytes());
    msg.extend_from_slice(domain.value().as_bytes());
    msg.extend_from_slice(&timestamp.to_le_bytes());
    msg.extend_from_slice(payload.as_bytes());
    msg
}

/// The 32 bytes that actually get signed.
pub fn signing_digest(
    address: &WalletAddress,
    domain: &TonDomain,
    timestamp: u64,
    payload: &str,
) -> [u8; 32] {
    let msg_hash = Sha256::digest(signature_message(address, domain, timestamp, payload));

    let mut full_msg: Vec<u8> = vec![0xff, 0xff];
    full_msg.extend_from_slice(TON_CONNECT_PREFIX.as_bytes());
    full_msg.extend_from_slice(&msg_hash);

    Sha256::digest(full_msg).into()
}

/// Signs a proof for `domain` with a timestamp taken right now.
pub async fn sign(
    address: &WalletAddress,
    domain: &str,
    payload: &str,
    vault: &dyn KeyVault,
) -> Result<TonProof> {
    let domain = TonDomain::new(domain);
    let timestamp = unix_now().map_err(TonConnectError::SigningDenied)?;
    let digest = signing_digest(address, &domain, timestamp, payload);

    let signature = vault
        .sign(address, &digest)
        .await
        .map_err(TonConnectError::SigningDenied)?;

    Ok(TonProof {
        timestamp,
        domain,
        signature: BASE64_STANDARD.encode(signature),
        payload: payload.to_string(),
    })
}

/// Checks `proof` the way a dapp backend does.
pub fn verify(
    address: &WalletAddress,
    proof: &TonProof,
    public_key: &[u8; 32],
) -> anyhow::Result<()> {
    if proof.domain.length_bytes() as usize != proof.domain.value().len() {
        return Err(anyhow!(
            "domain length mismatched against provided length_bytes of {}",
            proof.domain.length_bytes()
        ));
    }

    let digest = signing_digest(address, &proof.domain, proof.timestamp, &proof.payload);
    let pubkey = VerifyingKey::from_bytes(public_key)?;
    let signature_bytes: [u8; 64] = BASE64_STANDARD
        .decode(&proof.signature)?
        .try_into()
        .map_err(|_| anyhow!("expected 64 byte long signature"))?;

    pubkey.verify(&digest, &Signature::from_bytes(&signature_bytes))?;
    Ok(())
}
