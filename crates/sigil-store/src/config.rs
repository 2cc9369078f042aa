//! Construction-time settings for an [`EntityManager`](crate::manager::EntityManager).

use serde::Deserialize;

/// Configuration for an entity manager.
///
/// Deserializable so hosts can load it from a config file; missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Id handed to the first created entity, and the value `clear` resets
    /// the counter to.
    pub first_entity_id: u64,
    /// Number of entities to reserve storage for up front.
    pub initial_capacity: usize,
}

impl Default for ManagerConfig {
    /// First id `1`, no preallocation.
    fn default() -> Self {
        Self {
            first_entity_id: 1,
            initial_capacity: 0,
        }
    }
}
