use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;

/// Current unix time in seconds.
pub fn unix_now() -> anyhow::Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|n| n.as_secs())
        .map_err(|_| anyhow!("time went backwards 🤷"))
}

/// Decodes a 64 character hex string into 32 bytes.
pub fn decode_hex32(value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("invalid length, got {}, expected 32", b.len()))
}
