//! Whole-store export and import.
//!
//! [`StoreSnapshot`] is the serialization format: every entity's components
//! as plain JSON keyed by component name, plus the names of the value-indexed
//! types. Entity ids are stringified so the structure is a JSON object all the
//! way down.
//!
//! ```json
//! {
//!   "indexed": ["position"],
//!   "entities": {
//!     "1": { "position": { "x": 1, "y": 1 } },
//!     "2": { "position": { "x": 2, "y": 0 }, "label": "crate" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{ComponentRegistry, ComponentTypeId, ErasedComponent};
use crate::entity::EntityId;
use crate::manager::EntityManager;
use crate::StoreError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// A complete, serializable image of an [`EntityManager`]'s entities and
/// value-index configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Names of the component types with a value index.
    #[serde(default)]
    pub indexed: Vec<String>,
    /// Stringified entity id -> component name -> component data.
    /// `BTreeMap` keeps serialization order deterministic.
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl StoreSnapshot {
    /// Number of entities in the snapshot.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// An entity decoded from a snapshot but not yet installed.
struct DecodedEntity {
    id: EntityId,
    components: Vec<Rc<dyn ErasedComponent>>,
}

// ---------------------------------------------------------------------------
// EntityManager export/import impl
// ---------------------------------------------------------------------------

impl EntityManager {
    /// Serialize every entity and the list of value-indexed types.
    ///
    /// # Errors
    ///
    /// [`StoreError::ComponentSerialization`] if a component fails to encode.
    pub fn export(&self) -> Result<StoreSnapshot, StoreError> {
        let mut entities = BTreeMap::new();
        for id in self.ids() {
            let entity = self.get(id)?;
            let mut components = BTreeMap::new();
            for (component_type, component) in entity.all_components() {
                components.insert(component_type.name().to_owned(), component.to_json()?);
            }
            entities.insert(id.to_string(), components);
        }

        let indexed = self
            .indexed_types()
            .into_iter()
            .map(|t| t.name().to_owned())
            .collect();

        Ok(StoreSnapshot { indexed, entities })
    }

    /// Replace the entire store with the contents of `snapshot`.
    ///
    /// Every id and component is decoded and every indexed type name resolved
    /// through `registry` before live state is touched. On success the store
    /// is cleared, each entity is recreated under its original id (ascending),
    /// value indices are rebuilt, and the id counter moves past the highest
    /// imported id. Observers are notified as for ordinary removes and
    /// creates.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingTypeMapping`] if a component or indexed type name
    /// is not in `registry`, [`StoreError::InvalidEntityId`] for a malformed
    /// id key or one above [`EntityId::MAX`], and
    /// [`StoreError::ComponentDeserialization`] for malformed data. The store
    /// is left unchanged on error.
    pub fn import(
        &mut self,
        snapshot: &StoreSnapshot,
        registry: &ComponentRegistry,
    ) -> Result<(), StoreError> {
        // 1. Decode everything up front.
        let mut decoded = Vec::with_capacity(snapshot.entities.len());
        for (raw_id, components) in &snapshot.entities {
            let id: EntityId = raw_id.parse()?;
            // The counter must be able to move past every imported id.
            if id > EntityId::MAX {
                return Err(StoreError::InvalidEntityId {
                    raw: raw_id.clone(),
                });
            }
            let mut values = Vec::with_capacity(components.len());
            for (name, value) in components {
                values.push(registry.decode(name, value)?);
            }
            decoded.push(DecodedEntity {
                id,
                components: values,
            });
        }
        let indexed: Vec<ComponentTypeId> = snapshot
            .indexed
            .iter()
            .map(|name| registry.require(name))
            .collect::<Result<_, _>>()?;

        // String keys sort lexically ("10" < "2"); install in numeric order.
        decoded.sort_by_key(|e| e.id);
        // "1" and "01" name the same entity.
        if let Some(pair) = decoded.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(StoreError::InvalidEntityId {
                raw: pair[1].id.to_string(),
            });
        }

        // 2. Commit.
        self.clear();
        for entity in decoded {
            self.allocator.advance_past(entity.id);
            self.insert_entity(entity.id, entity.components);
        }
        for component_type in indexed {
            self.index_by_type(component_type);
        }

        debug!(
            entities = self.len(),
            indexed = snapshot.indexed.len(),
            "store imported"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
