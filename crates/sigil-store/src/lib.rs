//! Sigil Store -- in-memory entity/component store with presence and value
//! indices and synchronous change notification.
//!
//! Entities are integer ids carrying at most one component per type. The
//! [`EntityManager`](manager::EntityManager) keeps a presence index per
//! component type ("who has a `Position`?"), optional value indices ("who is
//! at `Position(1, 1)`?"), and per-entity / per-type channels that call
//! subscribers inline whenever something changes.
//!
//! Entities are immutable snapshots: every mutation installs a new
//! [`Entity`](entity::Entity) under the same id and leaves previously
//! returned handles untouched.
//!
//! # Quick Start
//!
//! ```
//! use sigil_store::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: i32, y: i32 }
//!
//! impl Hashable for Position {
//!     fn digest(&self) -> String { format!("{},{}", self.x, self.y) }
//! }
//!
//! impl Component for Position {
//!     const NAME: &'static str = "position";
//! }
//!
//! let mut store = EntityManager::new();
//! let crate_entity = store.create_with(Position { x: 1, y: 1 });
//! store.create_with(Position { x: 1, y: 1 });
//!
//! let stats = store.index_by::<Position>();
//! assert_eq!(stats.unique_component_values, 1);
//! assert_eq!(store.count_index(&Position { x: 1, y: 1 }).unwrap(), 2);
//! assert!(store.has_index(crate_entity.id(), &Position { x: 1, y: 1 }).unwrap());
//! ```

#![deny(unsafe_code)]

pub mod channel;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod hashable;
pub mod manager;
pub mod query;
pub mod snapshot;
pub mod value_index;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by store operations.
///
/// Idempotent no-ops (removing something that is not there) are reported
/// through `bool` results, never through this type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No live entity has this id.
    #[error("entity {id} does not exist")]
    EntityNotFound {
        /// The id that was looked up.
        id: entity::EntityId,
    },

    /// No live entity has this alias.
    #[error("no entity is named '{name}'")]
    NameNotFound {
        /// The alias that was looked up.
        name: String,
    },

    /// The entity exists but does not hold the requested component.
    #[error("entity {entity} has no '{component}' component")]
    ComponentNotFound {
        /// The entity that was inspected.
        entity: entity::EntityId,
        /// The missing component type.
        component: String,
    },

    /// An alias is already taken.
    #[error("name '{name}' already refers to entity {entity}")]
    NameAlreadyExists {
        /// The requested alias.
        name: String,
        /// The entity currently holding it.
        entity: entity::EntityId,
    },

    /// A value query was made for a type with no value index.
    #[error("component type '{component}' is not indexed; call index_by first")]
    NotIndexed {
        /// The queried component type.
        component: String,
    },

    /// A component type name has no entry in the registry.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    MissingTypeMapping {
        /// The unknown name.
        name: String,
        /// Comma-separated registered names.
        registered: String,
    },

    /// A snapshot entity key is not a valid id, or two keys name one id.
    #[error("invalid entity id '{raw}' in snapshot")]
    InvalidEntityId {
        /// The offending key.
        raw: String,
    },

    /// Encoding a component to JSON failed.
    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerialization {
        /// Component type name.
        component: String,
        /// Underlying serde error.
        details: String,
    },

    /// Decoding a component from JSON failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization {
        /// Component type name.
        component: String,
        /// Underlying serde error.
        details: String,
    },

    /// Stored value under a type tag is not the requested Rust type. Happens
    /// only when two component types share a `NAME`.
    #[error("component '{component}' is not stored as {rust_type}")]
    ComponentTypeMismatch {
        /// Component type name.
        component: String,
        /// Requested Rust type.
        rust_type: String,
    },

    /// A non-create command was queued without a target.
    #[error("command {command_index} has no target entity")]
    MissingTarget {
        /// Position of the command in its buffer.
        command_index: u32,
    },
}

impl StoreError {
    /// Whether this is one of the NotFound conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::EntityNotFound { .. }
                | StoreError::NameNotFound { .. }
                | StoreError::ComponentNotFound { .. }
        )
    }
}

/// Convenience alias used throughout the crate's public API.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::channel::{ComponentChange, EntityEvent, Subscription};
    pub use crate::command::{ApplyReport, Command, CommandBuffer, CommandKind};
    pub use crate::component::{Component, ComponentRegistry, ComponentTypeId, ErasedComponent};
    pub use crate::config::ManagerConfig;
    pub use crate::entity::{Entity, EntityId};
    pub use crate::hashable::{structural_digest, Hashable};
    pub use crate::manager::{ComponentBundle, EntityManager, EntityRef, IndexStats};
    pub use crate::query::ComponentSet;
    pub use crate::snapshot::StoreSnapshot;
    pub use crate::value_index::ValueIndex;
    pub use crate::StoreError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    // -- test component types -----------------------------------------------

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: i32,
        y: i32,
    }

    impl Hashable for Position {
        fn digest(&self) -> String {
            format!("{},{}", self.x, self.y)
        }
    }

    impl Component for Position {
        const NAME: &'static str = "position";
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Velocity {
        dx: i32,
        dy: i32,
    }

    impl Hashable for Velocity {
        fn digest(&self) -> String {
            structural_digest(self)
        }
    }

    impl Component for Velocity {
        const NAME: &'static str = "velocity";
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);

    impl Hashable for Health {
        fn digest(&self) -> String {
            self.0.to_string()
        }
    }

    impl Component for Health {
        const NAME: &'static str = "health";
    }

    fn moving(x: i32, y: i32, dx: i32, dy: i32) -> ComponentBundle {
        ComponentBundle::new()
            .with(Position { x, y })
            .with(Velocity { dx, dy })
    }

    // -- create / query integration -----------------------------------------

    #[test]
    fn create_entities_and_query_back() {
        let mut store = EntityManager::new();
        let e = store.create(moving(1, 2, 3, 4));

        let fetched = store.get(e.id()).unwrap();
        let (pos, vel) = fetched.components::<(Position, Velocity)>().unwrap();
        assert_eq!(pos, &Position { x: 1, y: 2 });
        assert_eq!(vel, &Velocity { dx: 3, dy: 4 });
    }

    #[test]
    fn query_matching_entities_only() {
        let mut store = EntityManager::new();
        let e1 = store.create(moving(1, 2, 3, 4));
        store.create_with(Position { x: 10, y: 20 });

        let results = store.matching::<(Position, Velocity)>();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), e1.id());
    }

    #[test]
    fn movement_system_through_each_and_set_component() {
        let mut store = EntityManager::new();
        let e = store.create(moving(0, 0, 1, 2));

        let mut updates = Vec::new();
        store.each::<(Position, Velocity), _>(|entity, (pos, vel)| {
            updates.push((
                entity.id(),
                Position {
                    x: pos.x + vel.dx,
                    y: pos.y + vel.dy,
                },
            ));
        });
        for (id, pos) in updates {
            store.set_component(id, pos).unwrap();
        }

        assert_eq!(
            store.get(e.id()).unwrap().component::<Position>().unwrap(),
            &Position { x: 1, y: 2 }
        );
    }

    #[test]
    fn scale_10k_entities() {
        let mut store = EntityManager::new();
        let mut ids = Vec::with_capacity(10_000);
        for i in 0..10_000 {
            ids.push(store.create(moving(i % 100, i / 100, 1, -1)).id());
        }
        assert_eq!(store.matching_ids::<(Position, Velocity)>().len(), 10_000);

        let stats = store.index_by::<Position>();
        assert_eq!(stats.total_components, 10_000);
        assert_eq!(stats.unique_component_values, 10_000);

        for id in ids.iter().take(5_000) {
            assert!(store.remove(*id));
        }
        assert_eq!(store.len(), 5_000);
        assert_eq!(store.matching_ids::<(Velocity,)>().len(), 5_000);
        assert_eq!(
            store
                .value_index(ComponentTypeId::of::<Position>())
                .unwrap()
                .count_keys(),
            5_000
        );
    }

    // -- removal ------------------------------------------------------------

    #[test]
    fn remove_entity_verify_gone() {
        let mut store = EntityManager::new();
        let e = store.create_with(Health(3));
        assert!(store.remove(e.id()));
        assert!(!store.contains(e.id()));
        assert!(store.get(e.id()).unwrap_err().is_not_found());
        assert!(!store.remove(e.id()));
        assert!(store.matching_ids::<(Health,)>().is_empty());
    }

    #[test]
    fn ids_are_not_reused_after_remove() {
        let mut store = EntityManager::new();
        let a = store.create_with(Health(1));
        store.remove(a.id());
        let b = store.create_with(Health(1));
        assert!(b.id() > a.id());
    }

    // -- value index scenario -----------------------------------------------

    #[test]
    fn index_counts_shared_positions() {
        let mut store = EntityManager::new();
        store.create_with(Position { x: 1, y: 1 });
        store.create_with(Position { x: 1, y: 1 });
        store.create_with(Position { x: 0, y: 1 });
        store.create_with(Position { x: 5, y: 5 });

        assert_eq!(
            store.index_by::<Position>(),
            IndexStats {
                unique_component_values: 3,
                total_components: 4
            }
        );
    }

    #[test]
    fn errors_render_readable_messages() {
        let store = EntityManager::new();
        let err = store.count_index(&Health(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "component type 'health' is not indexed; call index_by first"
        );
    }
}
