use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::{Address, ChainId, TxRef};
use crate::proof::ProofKind;

/// An accepted, proven referral fact. Append-only: never updated,
/// never deleted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Referral {
    pub user: Address,
    pub provider: Address,
    pub consumer: Address,
    pub proof_kind: ProofKind,
    /// Provenance of on-chain-reference proofs; `None` for both
    /// signed-message modes.
    pub proof_ref: Option<ProofReference>,
}

/// Where an on-chain-reference proof came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProofReference {
    pub chain_id: ChainId,
    #[serde(with = "crate::serde_hex")]
    pub tx_ref: TxRef,
}

/// The authoritative referral record, indexed for O(1) duplicate
/// detection along both axes the write path needs: once by
/// (user, provider) and once by consumed on-chain proof reference.
///
/// Intentionally thin: `record` performs no validation, so all write
/// policy funnels through the batch ingestor and stays independently
/// testable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReferralLedger {
    by_user_provider: BTreeMap<(Address, Address), Referral>,
    consumed_proofs: BTreeSet<(ChainId, TxRef)>,
}

impl ReferralLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_referred(&self, user: &Address, provider: &Address) -> bool {
        self.by_user_provider.contains_key(&(*user, *provider))
    }

    pub fn is_proof_consumed(&self, chain_id: ChainId, tx_ref: &TxRef) -> bool {
        self.consumed_proofs.contains(&(chain_id, *tx_ref))
    }

    /// The consumer credited with referring `user` to `provider`, if
    /// any. This is the attribution read the KPI pipelines consume.
    pub fn attributed_consumer(&self, user: &Address, provider: &Address) -> Option<Address> {
        self.by_user_provider
            .get(&(*user, *provider))
            .map(|r| r.consumer)
    }

    /// Unconditional insert. Callers must have already checked both
    /// uniqueness invariants.
    pub fn record(&mut self, referral: Referral) {
        if let Some(proof_ref) = &referral.proof_ref {
            self.consumed_proofs
                .insert((proof_ref.chain_id, proof_ref.tx_ref));
        }
        self.by_user_provider
            .insert((referral.user, referral.provider), referral);
    }

    pub fn len(&self) -> usize {
        self.by_user_provider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user_provider.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Referral> {
        self.by_user_provider.values()
    }
}
