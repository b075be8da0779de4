//! Referral-attribution registry.
//!
//! Independent parties (rewards providers and rewards consumers)
//! establish mutual agreements, and a privileged registrar
//! batch-submits claims that an end user was referred to a provider by
//! a consumer, each claim backed by one of three proof schemes. The
//! registry turns that stream of untrusted, possibly duplicate,
//! possibly malformed claims into an authoritative record of "who
//! referred whom to what, once".
//!
//! The building blocks:
//!
//! * [`identity`] — 20-byte participant addresses and on-chain proof
//!   reference types.
//! * [`access`] — role-gated authorization and the trusted-relayer
//!   effective-actor resolution.
//! * [`directory`] — the entity directory and the directed agreement
//!   graph between providers and consumers.
//! * [`proof`] — claim digests and the three proof schemes: on-chain
//!   reference, directly signed message, delegated account policy.
//! * [`ledger`] — the append-only referral record with O(1) duplicate
//!   detection along both write-path axes.
//! * [`registry`] — the facade that wires it all together: batch
//!   ingestion with per-item skip semantics, the event log, and
//!   merkle-rooted snapshots.

pub mod access;
pub mod directory;
pub mod identity;
pub mod ledger;
pub mod proof;
pub mod registry;

mod error;

pub use error::{BatchOutcome, RegistryError, SkipReason};
pub use registry::{Registry, RegistryEvent, RegistrySnapshot};

pub(crate) mod serde_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&hex::encode(value.as_ref()))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        T::try_from(bytes).map_err(|_| D::Error::custom("unexpected byte length"))
    }
}
