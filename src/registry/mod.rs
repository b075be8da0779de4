use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::{AccessControl, RelayRegistry, Role};
use crate::directory::{AgreementGraph, EntityDirectory, EntityRecord};
use crate::error::{BatchOutcome, RegistryError, SkipReason};
use crate::identity::{Address, ChainId, TxRef};
use crate::ledger::{ProofReference, Referral, ReferralLedger};
use crate::proof::{ProofCheck, ProofVerifier, ReferralClaim, ReferralProof, SignaturePolicy};

/// Everything the registry announces to the outside world, in order of
/// occurrence. Skipped batch items appear here as well as in the
/// per-call report, so downstream readers get the full ingestion
/// history without holding on to call results.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    EntityRegistered {
        entity: Address,
        requires_approval: bool,
    },
    ApprovalRequirementChanged {
        entity: Address,
        requires_approval: bool,
    },
    AgreementFormed {
        provider: Address,
        consumer: Address,
    },
    RoleGranted {
        role: Role,
        actor: Address,
    },
    RoleRevoked {
        role: Role,
        actor: Address,
    },
    RelayerAdded {
        relayer: Address,
    },
    RelayerRemoved {
        relayer: Address,
    },
    ReferralRegistered {
        user: Address,
        provider: Address,
        consumer: Address,
    },
    ReferralSkipped {
        user: Address,
        provider: Address,
        reason: SkipReason,
    },
}

/// Point-in-time copy of all persisted state plus a merkle root over
/// it, for external tamper-evidence checks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub entities: BTreeMap<Address, EntityRecord>,
    pub agreements: Vec<(Address, Address)>,
    pub referrals: Vec<Referral>,
    pub events: Vec<RegistryEvent>,
    #[serde(with = "crate::serde_hex")]
    pub merkle_root: [u8; 32],
}

/// The referral-attribution registry.
///
/// Single-owner state machine: every mutating call takes `&mut self`
/// and runs to completion, so "first claim in a batch wins" is
/// deterministic. All ledger writes funnel through
/// [`Registry::submit_referrals`].
pub struct Registry {
    access: AccessControl,
    relayers: RelayRegistry,
    directory: EntityDirectory,
    agreements: AgreementGraph,
    ledger: ReferralLedger,
    verifier: ProofVerifier,
    events: Vec<RegistryEvent>,
}

impl Registry {
    pub fn new(admin: Address) -> Self {
        Self {
            access: AccessControl::new(admin),
            relayers: RelayRegistry::new(),
            directory: EntityDirectory::new(),
            agreements: AgreementGraph::new(),
            ledger: ReferralLedger::new(),
            verifier: ProofVerifier::new(),
            events: Vec::new(),
        }
    }

    // ---- role administration ----

    pub fn grant_role(
        &mut self,
        caller: Address,
        role: Role,
        actor: Address,
    ) -> Result<(), RegistryError> {
        self.access.grant(&caller, role, actor)?;
        self.events.push(RegistryEvent::RoleGranted { role, actor });
        Ok(())
    }

    pub fn revoke_role(
        &mut self,
        caller: Address,
        role: Role,
        actor: Address,
    ) -> Result<(), RegistryError> {
        self.access.revoke(&caller, role, actor)?;
        self.events.push(RegistryEvent::RoleRevoked { role, actor });
        Ok(())
    }

    pub fn has_role(&self, role: Role, actor: &Address) -> bool {
        self.access.has_role(role, actor)
    }

    pub fn add_relayer(&mut self, caller: Address, relayer: Address) -> Result<(), RegistryError> {
        self.access.require_role(Role::Admin, &caller)?;
        self.relayers.add(relayer)?;
        self.events.push(RegistryEvent::RelayerAdded { relayer });
        Ok(())
    }

    pub fn remove_relayer(
        &mut self,
        caller: Address,
        relayer: Address,
    ) -> Result<(), RegistryError> {
        self.access.require_role(Role::Admin, &caller)?;
        self.relayers.remove(relayer)?;
        self.events.push(RegistryEvent::RelayerRemoved { relayer });
        Ok(())
    }

    /// Wire up the signature policy of a programmable account.
    pub fn install_policy(&mut self, account: Address, policy: Box<dyn SignaturePolicy>) {
        self.verifier.install_policy(account, policy);
    }

    // ---- entity directory ----

    pub fn register_entity(
        &mut self,
        id: Address,
        requires_approval: bool,
    ) -> Result<(), RegistryError> {
        self.directory.register(id, requires_approval)?;
        self.events.push(RegistryEvent::EntityRegistered {
            entity: id,
            requires_approval,
        });
        Ok(())
    }

    pub fn set_approval_requirement(
        &mut self,
        caller: Address,
        entity: Address,
        requires_approval: bool,
    ) -> Result<(), RegistryError> {
        self.directory
            .set_approval_requirement(&caller, entity, requires_approval)?;
        self.events.push(RegistryEvent::ApprovalRequirementChanged {
            entity,
            requires_approval,
        });
        Ok(())
    }

    pub fn is_registered(&self, id: &Address) -> bool {
        self.directory.is_registered(id)
    }

    pub fn requires_approval(&self, id: &Address) -> bool {
        self.directory.requires_approval(id)
    }

    // ---- agreements ----

    pub fn form_as_consumer(
        &mut self,
        caller: Address,
        provider: Address,
    ) -> Result<(), RegistryError> {
        self.agreements
            .form_as_consumer(&self.directory, provider, caller)?;
        self.events.push(RegistryEvent::AgreementFormed {
            provider,
            consumer: caller,
        });
        Ok(())
    }

    pub fn form_as_provider(
        &mut self,
        caller: Address,
        consumer: Address,
    ) -> Result<(), RegistryError> {
        self.agreements
            .form_as_provider(&self.directory, caller, consumer)?;
        self.events.push(RegistryEvent::AgreementFormed {
            provider: caller,
            consumer,
        });
        Ok(())
    }

    pub fn agreement_exists(&self, provider: &Address, consumer: &Address) -> bool {
        self.agreements.exists(provider, consumer)
    }

    // ---- referral ingestion ----

    /// Batch-ingest referral claims.
    ///
    /// The registrar-role check is the single fatal condition: a batch
    /// from anyone else is rejected wholesale with no state change.
    /// Every other failure is per item — the claim is reported as
    /// skipped and the batch continues. Items are processed in
    /// submission order and observe ledger writes made by earlier
    /// items of the same batch, so duplicates inside one batch resolve
    /// to "first claim wins".
    pub fn submit_referrals(
        &mut self,
        caller: Address,
        batch: &[(ReferralClaim, ReferralProof)],
    ) -> Result<Vec<BatchOutcome>, RegistryError> {
        self.access.require_role(Role::Registrar, &caller)?;

        let mut outcomes = Vec::with_capacity(batch.len());
        for (claim, proof) in batch {
            match self.check_item(claim, proof) {
                Some(reason) => {
                    self.events.push(RegistryEvent::ReferralSkipped {
                        user: claim.user,
                        provider: claim.provider,
                        reason,
                    });
                    outcomes.push(BatchOutcome::Skipped {
                        claim: *claim,
                        reason,
                    });
                }
                None => {
                    let proof_ref = match proof {
                        ReferralProof::OnChain { chain_id, tx_ref } => Some(ProofReference {
                            chain_id: *chain_id,
                            tx_ref: *tx_ref,
                        }),
                        _ => None,
                    };
                    self.ledger.record(Referral {
                        user: claim.user,
                        provider: claim.provider,
                        consumer: claim.consumer,
                        proof_kind: proof.kind(),
                        proof_ref,
                    });
                    self.events.push(RegistryEvent::ReferralRegistered {
                        user: claim.user,
                        provider: claim.provider,
                        consumer: claim.consumer,
                    });
                    outcomes.push(BatchOutcome::Registered { claim: *claim });
                }
            }
        }
        Ok(outcomes)
    }

    /// Relayed batch ingestion: resolve the effective actor, then
    /// decode the stripped payload as a JSON claim batch.
    pub fn submit_relayed(
        &mut self,
        raw_caller: Address,
        payload: &[u8],
    ) -> Result<Vec<BatchOutcome>, RegistryError> {
        let (actor, stripped) = self.relayers.resolve_actor(raw_caller, payload)?;
        let batch: Vec<(ReferralClaim, ReferralProof)> = serde_json::from_slice(stripped)
            .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?;
        self.submit_referrals(actor, &batch)
    }

    fn check_item(&self, claim: &ReferralClaim, proof: &ReferralProof) -> Option<SkipReason> {
        if !self.directory.is_registered(&claim.provider)
            || !self.directory.is_registered(&claim.consumer)
        {
            return Some(SkipReason::EntityNotFound);
        }
        if !self.agreements.exists(&claim.provider, &claim.consumer) {
            return Some(SkipReason::AgreementNotFound);
        }
        if self.ledger.is_referred(&claim.user, &claim.provider) {
            return Some(SkipReason::UserAlreadyReferred);
        }
        if let ReferralProof::OnChain { chain_id, tx_ref } = proof {
            if self.ledger.is_proof_consumed(*chain_id, tx_ref) {
                return Some(SkipReason::UserAlreadyReferred);
            }
        }
        if self.verifier.verify(claim, proof) != ProofCheck::Valid {
            return Some(SkipReason::InvalidSignature);
        }
        None
    }

    // ---- reads ----

    pub fn is_referred(&self, user: &Address, provider: &Address) -> bool {
        self.ledger.is_referred(user, provider)
    }

    pub fn is_proof_consumed(&self, chain_id: ChainId, tx_ref: &TxRef) -> bool {
        self.ledger.is_proof_consumed(chain_id, tx_ref)
    }

    pub fn attributed_consumer(&self, user: &Address, provider: &Address) -> Option<Address> {
        self.ledger.attributed_consumer(user, provider)
    }

    pub fn referral_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let entities: BTreeMap<Address, EntityRecord> = self
            .directory
            .iter()
            .map(|(addr, record)| (*addr, record.clone()))
            .collect();
        let agreements: Vec<(Address, Address)> = self.agreements.iter().copied().collect();
        let referrals: Vec<Referral> = self.ledger.iter().cloned().collect();
        let merkle_root = compute_merkle_root(&entities, &agreements, &referrals);
        RegistrySnapshot {
            entities,
            agreements,
            referrals,
            events: self.events.clone(),
            merkle_root,
        }
    }
}

fn compute_merkle_root(
    entities: &BTreeMap<Address, EntityRecord>,
    agreements: &[(Address, Address)],
    referrals: &[Referral],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (id, record) in entities {
        let mut hasher = Sha256::new();
        hasher.update(b"entity");
        hasher.update(id.as_bytes());
        hasher.update([record.requires_approval as u8]);
        leaves.push(hasher.finalize().into());
    }
    for (provider, consumer) in agreements {
        let mut hasher = Sha256::new();
        hasher.update(b"agreement");
        hasher.update(provider.as_bytes());
        hasher.update(consumer.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    for referral in referrals {
        let mut hasher = Sha256::new();
        hasher.update(b"referral");
        hasher.update(referral.user.as_bytes());
        hasher.update(referral.provider.as_bytes());
        hasher.update(referral.consumer.as_bytes());
        if let Some(proof_ref) = &referral.proof_ref {
            hasher.update(proof_ref.chain_id.to_le_bytes());
            hasher.update(proof_ref.tx_ref);
        }
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"referral-registry-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
