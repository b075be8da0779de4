use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// Origin-chain identifier for on-chain proof references.
pub type ChainId = u64;

/// Transaction reference on the origin chain.
pub type TxRef = [u8; 32];

pub const ADDRESS_LEN: usize = 20;

/// 20-byte participant identity.
///
/// Addresses are either supplied externally (for entities observed on
/// other systems) or derived from an Ed25519 verifying key via
/// [`Address::from_verifying_key`]. Serialized as lowercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// The last 20 bytes of `Sha256(pubkey)`.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[32 - ADDRESS_LEN..]);
        Self(bytes)
    }

    /// Parse a 40-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, RegistryError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).map_err(|_| RegistryError::InvalidIdentity)?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, RegistryError> {
        if bytes.len() != ADDRESS_LEN {
            return Err(RegistryError::InvalidIdentity);
        }
        let mut inner = [0u8; ADDRESS_LEN];
        inner.copy_from_slice(bytes);
        Ok(Self(inner))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Address::from_hex(&encoded).map_err(|_| D::Error::custom("expected 40 hex characters"))
    }
}
