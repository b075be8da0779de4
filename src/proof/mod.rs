use std::collections::BTreeMap;

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::identity::{Address, ChainId, TxRef};

/// The 4-byte value a [`SignaturePolicy`] must return for a signature
/// it accepts. Anything else is treated as a rejection.
pub const POLICY_MAGIC: [u8; 4] = *b"rvld";

/// A candidate referral fact: `user` was brought to `provider` by
/// `consumer`. What makes it credible is the accompanying proof.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralClaim {
    pub user: Address,
    pub provider: Address,
    pub consumer: Address,
}

impl ReferralClaim {
    /// Domain-separated digest that signed-message proofs commit to.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"referral-claim");
        hasher.update(self.user.as_bytes());
        hasher.update(self.provider.as_bytes());
        hasher.update(self.consumer.as_bytes());
        hasher.finalize().into()
    }
}

/// Evidence accompanying a claim, one of three trust models.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReferralProof {
    /// A previously observed, externally attested event is the
    /// evidence. Validity is structural; reuse is blocked by the
    /// ledger's consumed-proof index, not by signature math.
    OnChain {
        chain_id: ChainId,
        #[serde(with = "crate::serde_hex")]
        tx_ref: TxRef,
    },
    /// The user signed the claim digest with an ordinary keypair. The
    /// verifying key travels with the proof; the check that the key
    /// derives to `claim.user` closes the identity loop.
    Signed {
        #[serde(with = "crate::serde_hex")]
        public_key: [u8; 32],
        #[serde(with = "crate::serde_hex")]
        signature: Vec<u8>,
    },
    /// The user is a programmable account; validity is delegated
    /// entirely to the account's own signature policy.
    Delegated {
        #[serde(with = "crate::serde_hex")]
        signature: Vec<u8>,
    },
}

impl ReferralProof {
    pub fn kind(&self) -> ProofKind {
        match self {
            ReferralProof::OnChain { .. } => ProofKind::OnChain,
            ReferralProof::Signed { .. } => ProofKind::Signed,
            ReferralProof::Delegated { .. } => ProofKind::Delegated,
        }
    }
}

/// Which evidentiary basis a recorded referral used.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    OnChain,
    Signed,
    Delegated,
}

/// Verdict of proof verification. Pure: no side effects, no errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofCheck {
    Valid,
    Invalid,
}

/// Errors a programmable account's policy may raise. All of them map
/// to [`ProofCheck::Invalid`] for the item under check; none of them
/// can reject a batch.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("account policy rejected the signature: {0}")]
    Rejected(String),
    #[error("account policy failed to answer: {0}")]
    Unavailable(String),
}

/// Signature-validity capability of a programmable account.
///
/// Untrusted external computation: implementations may answer wrongly,
/// error out, or not exist for a given account. The verifier converts
/// every non-canonical outcome into `Invalid`.
pub trait SignaturePolicy {
    fn is_valid_signature(
        &self,
        digest: [u8; 32],
        signature: &[u8],
    ) -> Result<[u8; 4], PolicyError>;
}

/// Validates claims against their proofs. Stateless with respect to
/// the ledger; the only configuration is the set of installed
/// programmable-account policies.
#[derive(Default)]
pub struct ProofVerifier {
    policies: BTreeMap<Address, Box<dyn SignaturePolicy>>,
}

impl ProofVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the signature policy for a programmable
    /// account. Deployment-time wiring, not a gated registry call.
    pub fn install_policy(&mut self, account: Address, policy: Box<dyn SignaturePolicy>) {
        self.policies.insert(account, policy);
    }

    pub fn has_policy(&self, account: &Address) -> bool {
        self.policies.contains_key(account)
    }

    pub fn verify(&self, claim: &ReferralClaim, proof: &ReferralProof) -> ProofCheck {
        match proof {
            ReferralProof::OnChain { chain_id, tx_ref } => {
                if *chain_id != 0 && tx_ref.iter().any(|b| *b != 0) {
                    ProofCheck::Valid
                } else {
                    ProofCheck::Invalid
                }
            }
            ReferralProof::Signed {
                public_key,
                signature,
            } => Self::verify_signed(claim, public_key, signature),
            ReferralProof::Delegated { signature } => self.verify_delegated(claim, signature),
        }
    }

    fn verify_signed(claim: &ReferralClaim, public_key: &[u8; 32], signature: &[u8]) -> ProofCheck {
        let key = match VerifyingKey::from_bytes(public_key) {
            Ok(key) => key,
            Err(_) => return ProofCheck::Invalid,
        };
        let signature = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return ProofCheck::Invalid,
        };
        if key.verify_strict(&claim.digest(), &signature).is_err() {
            return ProofCheck::Invalid;
        }
        if Address::from_verifying_key(&key) != claim.user {
            return ProofCheck::Invalid;
        }
        ProofCheck::Valid
    }

    fn verify_delegated(&self, claim: &ReferralClaim, signature: &[u8]) -> ProofCheck {
        let policy = match self.policies.get(&claim.user) {
            Some(policy) => policy,
            None => return ProofCheck::Invalid,
        };
        match policy.is_valid_signature(claim.digest(), signature) {
            Ok(value) if value == POLICY_MAGIC => ProofCheck::Valid,
            Ok(_) | Err(_) => ProofCheck::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ADDRESS_LEN;

    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn addr(byte: u8) -> Address {
        Address::new([byte; ADDRESS_LEN])
    }

    fn signed_claim() -> (ReferralClaim, ReferralProof, SigningKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let claim = ReferralClaim {
            user: Address::from_verifying_key(&sk.verifying_key()),
            provider: addr(2),
            consumer: addr(3),
        };
        let signature = sk.sign(&claim.digest());
        let proof = ReferralProof::Signed {
            public_key: sk.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        };
        (claim, proof, sk)
    }

    struct AcceptAll;
    impl SignaturePolicy for AcceptAll {
        fn is_valid_signature(&self, _: [u8; 32], _: &[u8]) -> Result<[u8; 4], PolicyError> {
            Ok(POLICY_MAGIC)
        }
    }

    struct WrongMagic;
    impl SignaturePolicy for WrongMagic {
        fn is_valid_signature(&self, _: [u8; 32], _: &[u8]) -> Result<[u8; 4], PolicyError> {
            Ok(*b"nope")
        }
    }

    struct AlwaysErr;
    impl SignaturePolicy for AlwaysErr {
        fn is_valid_signature(&self, _: [u8; 32], _: &[u8]) -> Result<[u8; 4], PolicyError> {
            Err(PolicyError::Unavailable("account offline".into()))
        }
    }

    #[test]
    fn signed_proof_verifies_for_the_key_holder() {
        let verifier = ProofVerifier::new();
        let (claim, proof, _sk) = signed_claim();
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Valid);
    }

    #[test]
    fn signed_proof_fails_for_a_different_user() {
        let verifier = ProofVerifier::new();
        let (mut claim, proof, _sk) = signed_claim();
        claim.user = addr(9);
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);
    }

    #[test]
    fn tampered_claim_invalidates_the_signature() {
        let verifier = ProofVerifier::new();
        let (mut claim, proof, _sk) = signed_claim();
        claim.consumer = addr(9);
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);
    }

    #[test]
    fn malformed_signature_bytes_are_invalid_not_fatal() {
        let verifier = ProofVerifier::new();
        let (claim, _, sk) = signed_claim();
        let proof = ReferralProof::Signed {
            public_key: sk.verifying_key().to_bytes(),
            signature: vec![0u8; 3],
        };
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);
    }

    #[test]
    fn on_chain_proof_is_structurally_checked() {
        let verifier = ProofVerifier::new();
        let claim = ReferralClaim {
            user: addr(1),
            provider: addr(2),
            consumer: addr(3),
        };
        let good = ReferralProof::OnChain {
            chain_id: 1,
            tx_ref: [5u8; 32],
        };
        assert_eq!(verifier.verify(&claim, &good), ProofCheck::Valid);
        let zero_chain = ReferralProof::OnChain {
            chain_id: 0,
            tx_ref: [5u8; 32],
        };
        assert_eq!(verifier.verify(&claim, &zero_chain), ProofCheck::Invalid);
        let zero_ref = ReferralProof::OnChain {
            chain_id: 1,
            tx_ref: [0u8; 32],
        };
        assert_eq!(verifier.verify(&claim, &zero_ref), ProofCheck::Invalid);
    }

    #[test]
    fn delegated_proof_follows_the_account_policy() {
        let mut verifier = ProofVerifier::new();
        let claim = ReferralClaim {
            user: addr(1),
            provider: addr(2),
            consumer: addr(3),
        };
        let proof = ReferralProof::Delegated {
            signature: vec![0xaa; 64],
        };

        // no policy installed
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);

        verifier.install_policy(addr(1), Box::new(AcceptAll));
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Valid);

        verifier.install_policy(addr(1), Box::new(WrongMagic));
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);

        verifier.install_policy(addr(1), Box::new(AlwaysErr));
        assert_eq!(verifier.verify(&claim, &proof), ProofCheck::Invalid);
    }

    #[test]
    fn proof_json_round_trips_with_hex_fields() {
        let (_, proof, _) = signed_claim();
        let json = serde_json::to_string(&proof).unwrap();
        let back: ReferralProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }
}
