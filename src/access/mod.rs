use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::identity::{Address, ADDRESS_LEN};

/// The closed set of privileged roles the registry understands.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May grant/revoke roles and manage the trusted relayer set.
    Admin,
    /// May submit referral claim batches.
    Registrar,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Registrar => write!(f, "registrar"),
        }
    }
}

/// Role membership store. The sole gate for privileged operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessControl {
    members: BTreeMap<Role, BTreeSet<Address>>,
}

impl AccessControl {
    /// Seed the store with an initial admin; nothing else can grant
    /// roles without one.
    pub fn new(admin: Address) -> Self {
        let mut members: BTreeMap<Role, BTreeSet<Address>> = BTreeMap::new();
        members.entry(Role::Admin).or_default().insert(admin);
        Self { members }
    }

    pub fn has_role(&self, role: Role, actor: &Address) -> bool {
        self.members
            .get(&role)
            .map(|set| set.contains(actor))
            .unwrap_or(false)
    }

    pub fn require_role(&self, role: Role, actor: &Address) -> Result<(), RegistryError> {
        if self.has_role(role, actor) {
            Ok(())
        } else {
            Err(RegistryError::MissingRole { role, actor: *actor })
        }
    }

    pub fn grant(
        &mut self,
        caller: &Address,
        role: Role,
        actor: Address,
    ) -> Result<(), RegistryError> {
        self.require_role(Role::Admin, caller)?;
        if actor.is_zero() {
            return Err(RegistryError::InvalidIdentity);
        }
        let inserted = self.members.entry(role).or_default().insert(actor);
        if !inserted {
            return Err(RegistryError::RoleAlreadyGranted { role, actor });
        }
        Ok(())
    }

    pub fn revoke(
        &mut self,
        caller: &Address,
        role: Role,
        actor: Address,
    ) -> Result<(), RegistryError> {
        self.require_role(Role::Admin, caller)?;
        let removed = self
            .members
            .get_mut(&role)
            .map(|set| set.remove(&actor))
            .unwrap_or(false);
        if !removed {
            return Err(RegistryError::RoleNotHeld { role, actor });
        }
        Ok(())
    }
}

/// Trusted-relayer set and effective-actor resolution for delegated
/// submissions.
///
/// A trusted relayer appends the asserted sender's 20-byte address to
/// the end of the call payload; [`RelayRegistry::resolve_actor`] strips
/// it off and substitutes it for the raw caller before any
/// authorization or state check runs. There is no cryptographic check
/// that the relayer was actually authorized by that sender — honest
/// reporting is an operational property of the relayer, which is a
/// deliberate trust boundary inherited from the source design.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RelayRegistry {
    relayers: BTreeSet<Address>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_relayer(&self, addr: &Address) -> bool {
        self.relayers.contains(addr)
    }

    pub fn add(&mut self, relayer: Address) -> Result<(), RegistryError> {
        if relayer.is_zero() {
            return Err(RegistryError::InvalidIdentity);
        }
        if !self.relayers.insert(relayer) {
            return Err(RegistryError::RelayerExists { relayer });
        }
        Ok(())
    }

    pub fn remove(&mut self, relayer: Address) -> Result<(), RegistryError> {
        if !self.relayers.remove(&relayer) {
            return Err(RegistryError::RelayerNotFound { relayer });
        }
        Ok(())
    }

    /// Resolve the effective actor for a call.
    ///
    /// Direct calls pass through untouched. Calls from a trusted
    /// relayer carry the asserted sender as the payload's trailing 20
    /// bytes, which are stripped before further processing.
    pub fn resolve_actor<'a>(
        &self,
        raw_caller: Address,
        payload: &'a [u8],
    ) -> Result<(Address, &'a [u8]), RegistryError> {
        if !self.is_relayer(&raw_caller) {
            return Ok((raw_caller, payload));
        }
        if payload.len() < ADDRESS_LEN {
            return Err(RegistryError::MalformedPayload(format!(
                "relayed payload of {} bytes cannot carry a sender suffix",
                payload.len()
            )));
        }
        let (stripped, suffix) = payload.split_at(payload.len() - ADDRESS_LEN);
        let actor = Address::from_slice(suffix)?;
        Ok((actor, stripped))
    }
}
