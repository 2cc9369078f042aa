//! Multi-type queries: component sets and id-set intersection.
//!
//! A [`ComponentSet`] is a tuple of component types, `(A,)` through
//! `(A, B, C, D, E, F)`. It names the types a query requires and fetches the
//! matching references from an [`Entity`] in request order.

use std::collections::HashSet;
use std::hash::Hash;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;
use crate::StoreError;

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// A tuple of component types requested together.
pub trait ComponentSet {
    /// References yielded per entity, in request order.
    type Refs<'e>;

    /// Type tags in request order.
    fn type_ids() -> Vec<ComponentTypeId>;

    /// Fetch every requested component, failing if any is absent.
    fn fetch(entity: &Entity) -> Result<Self::Refs<'_>, StoreError>;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            type Refs<'e> = ($(&'e $name,)+);

            fn type_ids() -> Vec<ComponentTypeId> {
                vec![$(ComponentTypeId::of::<$name>()),+]
            }

            fn fetch(entity: &Entity) -> Result<Self::Refs<'_>, StoreError> {
                Ok(($(entity.component::<$name>()?,)+))
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);

// ---------------------------------------------------------------------------
// intersect
// ---------------------------------------------------------------------------

/// Elements present in every set. Empty if `sets` is empty.
///
/// Walks the smallest set and probes the others. Output order follows the
/// smallest set's iteration order, which is unspecified.
pub fn intersect<T: Copy + Eq + Hash>(sets: &[&HashSet<T>]) -> Vec<T> {
    let Some(smallest) = sets.iter().min_by_key(|s| s.len()) else {
        return Vec::new();
    };
    smallest
        .iter()
        .filter(|item| sets.iter().all(|s| s.contains(*item)))
        .copied()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
