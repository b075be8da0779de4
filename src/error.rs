use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Address;
use crate::proof::ReferralClaim;

/// Canonical error type for call-rejecting failures.
///
/// Every variant here aborts the whole call with no state change.
/// Per-item batch rejections are never errors; they surface as
/// [`BatchOutcome::Skipped`] values instead.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The zero address (or otherwise malformed identity) was supplied
    /// where a real participant id is required.
    #[error("invalid identity")]
    InvalidIdentity,

    /// Entity already present in the directory.
    #[error("entity {entity} already registered")]
    EntityExists { entity: Address },

    /// An operation referenced an entity the directory has never seen.
    #[error("entity {entity} is not registered")]
    EntityNotRegistered { entity: Address },

    /// The (provider, consumer) agreement edge already exists.
    #[error("agreement between provider {provider} and consumer {consumer} already exists")]
    AgreementExists { provider: Address, consumer: Address },

    /// Consumer-initiated formation against a provider that requires
    /// explicit approval.
    #[error("provider {provider} requires approval before agreements can be formed")]
    ApprovalRequired { provider: Address },

    /// An operation reserved to the entity itself was attempted by a
    /// different actor.
    #[error("only entity {entity} may change its own settings")]
    SelfOnly { entity: Address },

    /// Caller lacks the role a privileged operation demands.
    #[error("actor {actor} does not hold role {role}")]
    MissingRole { role: crate::access::Role, actor: Address },

    /// Granting a role membership that is already present.
    #[error("actor {actor} already holds role {role}")]
    RoleAlreadyGranted { role: crate::access::Role, actor: Address },

    /// Revoking a role membership that does not exist.
    #[error("actor {actor} does not hold role {role}, nothing to revoke")]
    RoleNotHeld { role: crate::access::Role, actor: Address },

    /// Adding a relayer that is already trusted.
    #[error("relayer {relayer} already trusted")]
    RelayerExists { relayer: Address },

    /// Removing a relayer that was never trusted.
    #[error("relayer {relayer} is not trusted")]
    RelayerNotFound { relayer: Address },

    /// A relayed payload was too short to carry the sender suffix, or
    /// the stripped payload failed to decode as a claim batch.
    #[error("malformed relayed payload: {0}")]
    MalformedPayload(String),
}

/// Why a single batch item was skipped rather than recorded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Provider or consumer is not in the entity directory.
    EntityNotFound,
    /// No agreement edge between the claimed provider and consumer.
    AgreementNotFound,
    /// The (user, provider) pair is already referred, or the on-chain
    /// proof reference has already been consumed.
    UserAlreadyReferred,
    /// The accompanying proof failed verification.
    InvalidSignature,
}

/// Per-item result of a batch ingestion call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Registered { claim: ReferralClaim },
    Skipped { claim: ReferralClaim, reason: SkipReason },
}

impl BatchOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, BatchOutcome::Registered { .. })
    }
}
