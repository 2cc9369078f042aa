//! Entity identifiers, allocation, and immutable entity snapshots.
//!
//! An [`EntityId`] is a plain 64-bit integer handed out by a monotonic
//! [`EntityAllocator`]; ids are never recycled while the allocator lives.
//!
//! An [`Entity`] is one point-in-time snapshot of the components attached to
//! an id. Snapshots are never mutated: the manager builds a new one for every
//! change and swaps it into storage, so a handle obtained earlier keeps
//! showing the state it was taken from.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentTypeId, ErasedComponent};
use crate::query::ComponentSet;
use crate::StoreError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Integer entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Largest id the allocator can hand out. `u64::MAX` is kept free so the
    /// counter always has a successor.
    pub const MAX: EntityId = EntityId(u64::MAX - 1);

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(EntityId)
            .map_err(|_| StoreError::InvalidEntityId { raw: s.to_owned() })
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Hands out strictly increasing [`EntityId`]s.
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    first: u64,
    next: u64,
}

impl EntityAllocator {
    /// Create an allocator whose first id is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { first, next: first }
    }

    /// Allocate the next id.
    ///
    /// # Panics
    ///
    /// Panics once every id up to [`EntityId::MAX`] has been handed out.
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        if id > EntityId::MAX {
            panic!("entity id space exhausted after {}", EntityId::MAX);
        }
        self.next += 1;
        id
    }

    /// The id the next [`allocate`](Self::allocate) call will return.
    pub fn peek(&self) -> EntityId {
        EntityId(self.next)
    }

    /// Make sure `id` is never handed out, moving the counter past it.
    pub fn advance_past(&mut self, id: EntityId) {
        self.next = self.next.max(id.0.saturating_add(1));
    }

    /// Return to the initial state.
    pub fn reset(&mut self) {
        self.next = self.first;
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An immutable snapshot of one entity's components.
///
/// Holds at most one component per type: the map is keyed by
/// [`ComponentTypeId`].
#[derive(Clone)]
pub struct Entity {
    id: EntityId,
    components: BTreeMap<ComponentTypeId, Rc<dyn ErasedComponent>>,
}

impl Entity {
    pub(crate) fn from_parts(
        id: EntityId,
        components: BTreeMap<ComponentTypeId, Rc<dyn ErasedComponent>>,
    ) -> Self {
        Self { id, components }
    }

    /// A copy of this snapshot with `component` added or replaced.
    pub(crate) fn with_component(&self, component: Rc<dyn ErasedComponent>) -> Self {
        let mut components = self.components.clone();
        components.insert(component.component_type(), component);
        Self::from_parts(self.id, components)
    }

    /// A copy of this snapshot without `component_type`.
    pub(crate) fn without_component(&self, component_type: ComponentTypeId) -> Self {
        let mut components = self.components.clone();
        components.remove(&component_type);
        Self::from_parts(self.id, components)
    }

    /// This entity's id.
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The component of type `T`.
    ///
    /// # Errors
    ///
    /// [`StoreError::ComponentNotFound`] if absent.
    pub fn component<T: Component>(&self) -> Result<&T, StoreError> {
        let erased = self.erased(ComponentTypeId::of::<T>())?;
        erased
            .downcast_ref::<T>()
            .ok_or_else(|| StoreError::ComponentTypeMismatch {
                component: T::NAME.to_owned(),
                rust_type: std::any::type_name::<T>().to_owned(),
            })
    }

    /// The type-erased component with tag `component_type`.
    pub fn erased(&self, component_type: ComponentTypeId) -> Result<&dyn ErasedComponent, StoreError> {
        self.components
            .get(&component_type)
            .map(|c| c.as_ref())
            .ok_or_else(|| StoreError::ComponentNotFound {
                entity: self.id,
                component: component_type.name().to_owned(),
            })
    }

    pub(crate) fn shared(&self, component_type: ComponentTypeId) -> Option<&Rc<dyn ErasedComponent>> {
        self.components.get(&component_type)
    }

    pub(crate) fn shared_components(
        &self,
    ) -> impl Iterator<Item = (ComponentTypeId, &Rc<dyn ErasedComponent>)> {
        self.components.iter().map(|(id, c)| (*id, c))
    }

    /// Components for every type in `Q`, in request order.
    ///
    /// All-or-nothing: fails if any requested type is absent.
    pub fn components<Q: ComponentSet>(&self) -> Result<Q::Refs<'_>, StoreError> {
        Q::fetch(self)
    }

    /// Every attached component, ordered by type name.
    pub fn all_components(&self) -> impl Iterator<Item = (ComponentTypeId, &dyn ErasedComponent)> {
        self.components.iter().map(|(id, c)| (*id, c.as_ref()))
    }

    /// Tags of every attached component, ordered by name.
    pub fn component_types(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.components.keys().copied()
    }

    /// True only if every type in `Q` is present.
    pub fn has<Q: ComponentSet>(&self) -> bool {
        Q::type_ids().into_iter().all(|t| self.has_type(t))
    }

    /// Whether a component with tag `component_type` is attached.
    pub fn has_type(&self, component_type: ComponentTypeId) -> bool {
        self.components.contains_key(&component_type)
    }

    /// Number of attached components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether no components are attached.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("components", &self.components)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
