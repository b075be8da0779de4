use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::identity::Address;

/// Registry of participant identities.
///
/// Entities are append-only: an id can be registered once and never
/// removed. The `requires_approval` flag controls whether counterparties
/// may unilaterally form agreements against the entity, and is mutable
/// only by the entity itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EntityDirectory {
    entities: BTreeMap<Address, EntityRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRecord {
    pub requires_approval: bool,
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: Address, requires_approval: bool) -> Result<(), RegistryError> {
        if id.is_zero() {
            return Err(RegistryError::InvalidIdentity);
        }
        if self.entities.contains_key(&id) {
            return Err(RegistryError::EntityExists { entity: id });
        }
        self.entities.insert(id, EntityRecord { requires_approval });
        Ok(())
    }

    /// Flip the approval flag. `caller` must be the entity itself.
    pub fn set_approval_requirement(
        &mut self,
        caller: &Address,
        entity: Address,
        requires_approval: bool,
    ) -> Result<(), RegistryError> {
        if *caller != entity {
            return Err(RegistryError::SelfOnly { entity });
        }
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(RegistryError::EntityNotRegistered { entity })?;
        record.requires_approval = requires_approval;
        Ok(())
    }

    pub fn is_registered(&self, id: &Address) -> bool {
        self.entities.contains_key(id)
    }

    /// `false` for unknown ids.
    pub fn requires_approval(&self, id: &Address) -> bool {
        self.entities
            .get(id)
            .map(|r| r.requires_approval)
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &EntityRecord)> {
        self.entities.iter()
    }
}

/// Directed agreement edges from provider to consumer.
///
/// Edges exist or they do not; there is no per-edge state and no
/// removal. Formation policy (who may create an edge, and when the
/// provider's approval flag applies) lives here so both entry points
/// share the endpoint checks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AgreementGraph {
    edges: BTreeSet<(Address, Address)>,
}

impl AgreementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer-initiated formation. Rejected when the provider has
    /// opted into explicit approval.
    pub fn form_as_consumer(
        &mut self,
        directory: &EntityDirectory,
        provider: Address,
        consumer: Address,
    ) -> Result<(), RegistryError> {
        self.check_endpoints(directory, provider, consumer)?;
        if directory.requires_approval(&provider) {
            return Err(RegistryError::ApprovalRequired { provider });
        }
        self.insert(provider, consumer)
    }

    /// Provider-initiated formation. A provider is always free to
    /// extend an agreement to any registered consumer.
    pub fn form_as_provider(
        &mut self,
        directory: &EntityDirectory,
        provider: Address,
        consumer: Address,
    ) -> Result<(), RegistryError> {
        self.check_endpoints(directory, provider, consumer)?;
        self.insert(provider, consumer)
    }

    pub fn exists(&self, provider: &Address, consumer: &Address) -> bool {
        self.edges.contains(&(*provider, *consumer))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Address, Address)> {
        self.edges.iter()
    }

    fn check_endpoints(
        &self,
        directory: &EntityDirectory,
        provider: Address,
        consumer: Address,
    ) -> Result<(), RegistryError> {
        if !directory.is_registered(&provider) {
            return Err(RegistryError::EntityNotRegistered { entity: provider });
        }
        if !directory.is_registered(&consumer) {
            return Err(RegistryError::EntityNotRegistered { entity: consumer });
        }
        Ok(())
    }

    fn insert(&mut self, provider: Address, consumer: Address) -> Result<(), RegistryError> {
        if !self.edges.insert((provider, consumer)) {
            return Err(RegistryError::AgreementExists { provider, consumer });
        }
        Ok(())
    }
}
