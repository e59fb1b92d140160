use crate::step::ExplorationPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    pub id: EntityId,
    pub name: String,
    pub address: String,
    pub path: ExplorationPath,
    pub relationship_field_names: BTreeSet<String>,
    /// Depth of the path the entity was discovered through (BFS level).
    pub depth: usize,
    pub parents: BTreeSet<EntityId>,
    pub children: BTreeSet<EntityId>,
    pub is_root: bool,
    /// The canonical path failed verification and could not be repaired.
    pub stale: bool,
}

impl DiscoveredEntity {
    pub fn normalized_address(&self) -> String {
        normalize_address(&self.address)
    }
}

/// Fields the scheduler knows about a new entity before it gets an id.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub address: String,
    pub path: ExplorationPath,
    pub relationship_field_names: Vec<String>,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub inserted: bool,
    pub id: Option<EntityId>,
}

/// Strip the query string and fragment from an address.
pub fn normalize_address(address: &str) -> String {
    let end = address.find(['?', '#']).unwrap_or(address.len());
    address[..end].to_string()
}

/// Entities discovered during one run, deduplicated by normalized address.
///
/// First writer wins: under breadth-first exploration the first discovery is
/// also the shallowest, so its path is kept.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<DiscoveredEntity>,
    addresses: HashSet<String>,
    known: HashSet<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these addresses as already registered (e.g. from earlier runs).
    pub fn with_known_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.known.insert(normalize_address(address.as_ref()));
        }
        self
    }

    pub fn contains_address(&self, address: &str) -> bool {
        let key = normalize_address(address);
        self.addresses.contains(&key) || self.known.contains(&key)
    }

    pub fn register(&mut self, entity: NewEntity) -> Registration {
        let key = normalize_address(&entity.address);
        if self.addresses.contains(&key) || self.known.contains(&key) {
            debug!(address = %key, "Entity already registered, skipping");
            return Registration {
                inserted: false,
                id: None,
            };
        }

        // Build the whole record before it becomes visible.
        let id = EntityId(self.entities.len() as u32);
        let record = DiscoveredEntity {
            id,
            name: entity.name,
            address: entity.address,
            path: entity.path,
            relationship_field_names: entity.relationship_field_names.into_iter().collect(),
            depth: entity.depth,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            is_root: false,
            stale: false,
        };

        self.addresses.insert(key);
        self.entities.push(record);
        Registration {
            inserted: true,
            id: Some(id),
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&DiscoveredEntity> {
        self.entities.get(id.0 as usize)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut DiscoveredEntity> {
        self.entities.get_mut(id.0 as usize)
    }

    pub(crate) fn entities_mut(&mut self) -> &mut [DiscoveredEntity] {
        &mut self.entities
    }

    /// Entities in registration order.
    pub fn entities(&self) -> &[DiscoveredEntity] {
        &self.entities
    }

    /// Normalized addresses of everything registered or known.
    pub fn addresses(&self) -> HashSet<String> {
        self.addresses.union(&self.known).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn into_entities(self) -> Vec<DiscoveredEntity> {
        self.entities
    }
}
