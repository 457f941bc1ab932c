use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::decode_hex32;

/// Wallet address in raw form, `<workchain>:<64 hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress {
    pub workchain: i32,
    pub hash_part: [u8; 32],
}

impl WalletAddress {
    pub fn new(workchain: i32, hash_part: [u8; 32]) -> Self {
        Self {
            workchain,
            hash_part,
        }
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash_part))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid raw address {address:?}: {reason}")]
pub struct AddressParseError {
    address: String,
    reason: String,
}

impl FromStr for WalletAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| AddressParseError {
            address: s.to_string(),
            reason,
        };

        let (workchain, hash) = s
            .split_once(':')
            .ok_or_else(|| fail("missing workchain separator".to_string()))?;
        let workchain = workchain
            .parse::<i32>()
            .map_err(|e| fail(format!("workchain: {e}")))?;
        let hash_part = decode_hex32(hash).map_err(|e| fail(format!("hash: {e}")))?;

        Ok(Self::new(workchain, hash_part))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.to_raw())
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_raw())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
