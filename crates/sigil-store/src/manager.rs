//! The [`EntityManager`] is the top-level container of the store. It owns
//! entity storage, id allocation, name aliases, the per-type presence and
//! value indices, and the change-notification channels.
//!
//! Every mutation runs to completion before returning: storage is updated
//! first, then both index kinds, then notifications are delivered inline.
//! A subscriber therefore always observes the index state that includes the
//! change it is being told about.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelKey, ComponentChange, EntityEvent, Subscription};
use crate::component::{Component, ComponentTypeId, ErasedComponent};
use crate::config::ManagerConfig;
use crate::entity::{Entity, EntityAllocator, EntityId};
use crate::query::{intersect, ComponentSet};
use crate::value_index::ValueIndex;
use crate::StoreError;

// ---------------------------------------------------------------------------
// EntityRef -- id or alias
// ---------------------------------------------------------------------------

/// Addresses an entity either by id or by one of its alias names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// By numeric id.
    Id(EntityId),
    /// By alias registered through [`EntityManager::create_named`].
    Name(String),
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        EntityRef::Id(id)
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        EntityRef::Name(name.to_owned())
    }
}

impl From<String> for EntityRef {
    fn from(name: String) -> Self {
        EntityRef::Name(name)
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        EntityRef::Id(entity.id())
    }
}

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

/// A set of components to attach to a new entity.
///
/// Holds at most one component per type; adding a second value of the same
/// type replaces the first.
#[derive(Debug, Default, Clone)]
pub struct ComponentBundle {
    components: Vec<Rc<dyn ErasedComponent>>,
}

impl ComponentBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component.
    pub fn add<T: Component>(&mut self, value: T) {
        self.add_erased(Rc::new(value));
    }

    /// Builder-style [`add`](Self::add).
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.add(value);
        self
    }

    /// Add an already type-erased component.
    pub fn add_erased(&mut self, component: Rc<dyn ErasedComponent>) {
        let component_type = component.component_type();
        self.components
            .retain(|c| c.component_type() != component_type);
        self.components.push(component);
    }

    /// Number of components in the bundle.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub(crate) fn into_components(self) -> Vec<Rc<dyn ErasedComponent>> {
        self.components
    }
}

// ---------------------------------------------------------------------------
// IndexStats
// ---------------------------------------------------------------------------

/// Result of [`EntityManager::index_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Distinct digests in the rebuilt index.
    pub unique_component_values: usize,
    /// Components scanned while building it.
    pub total_components: usize,
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// In-memory entity/component store with presence and value indices.
///
/// Not thread-safe: snapshots are shared through `Rc` and subscribers are
/// plain `FnMut` closures.
pub struct EntityManager {
    config: ManagerConfig,
    pub(crate) allocator: EntityAllocator,
    /// Current snapshot per live id.
    entities: HashMap<EntityId, Rc<Entity>>,
    /// Alias -> id. Only ever points at live ids.
    names: HashMap<String, EntityId>,
    /// id -> aliases, so removal can scrub them.
    aliases: HashMap<EntityId, BTreeSet<String>>,
    /// Primary index: type -> ids holding a component of that type.
    presence: HashMap<ComponentTypeId, HashSet<EntityId>>,
    /// Secondary indices, only for types passed to `index_by`.
    value_indices: BTreeMap<ComponentTypeId, ValueIndex>,
    entity_channels: HashMap<EntityId, Channel<EntityEvent>>,
    type_channels: HashMap<ComponentTypeId, Channel<ComponentChange>>,
    next_subscription: u64,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entity_count", &self.entities.len())
            .field("next_id", &self.allocator.peek())
            .field("names", &self.names.len())
            .field("indexed_types", &self.value_indices.keys().collect::<Vec<_>>())
            .field("entity_channels", &self.entity_channels.len())
            .field("type_channels", &self.type_channels.len())
            .finish()
    }
}

impl EntityManager {
    /// Create an empty manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Create an empty manager.
    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            allocator: EntityAllocator::starting_at(config.first_entity_id),
            entities: HashMap::with_capacity(config.initial_capacity),
            names: HashMap::new(),
            aliases: HashMap::new(),
            presence: HashMap::new(),
            value_indices: BTreeMap::new(),
            entity_channels: HashMap::new(),
            type_channels: HashMap::new(),
            next_subscription: 0,
            config,
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // -- create -------------------------------------------------------------

    /// Create an entity holding the bundle's components.
    pub fn create(&mut self, bundle: ComponentBundle) -> Rc<Entity> {
        let id = self.allocator.allocate();
        self.insert_entity(id, bundle.into_components())
    }

    /// Create an entity holding a single component.
    pub fn create_with<T: Component>(&mut self, component: T) -> Rc<Entity> {
        self.create(ComponentBundle::new().with(component))
    }

    /// Create an entity and register `name` as an alias for it.
    ///
    /// # Errors
    ///
    /// [`StoreError::NameAlreadyExists`] if `name` already resolves to an
    /// entity. Nothing is created in that case.
    pub fn create_named(
        &mut self,
        name: &str,
        bundle: ComponentBundle,
    ) -> Result<Rc<Entity>, StoreError> {
        if let Some(&existing) = self.names.get(name) {
            return Err(StoreError::NameAlreadyExists {
                name: name.to_owned(),
                entity: existing,
            });
        }
        let id = self.allocator.allocate();
        // Register first so subscribers to the create see the alias resolve.
        self.names.insert(name.to_owned(), id);
        self.aliases.entry(id).or_default().insert(name.to_owned());
        Ok(self.insert_entity(id, bundle.into_components()))
    }

    /// Store a new snapshot under `id` and run the install sequence for each
    /// component.
    pub(crate) fn insert_entity(
        &mut self,
        id: EntityId,
        components: Vec<Rc<dyn ErasedComponent>>,
    ) -> Rc<Entity> {
        let map: BTreeMap<ComponentTypeId, Rc<dyn ErasedComponent>> = components
            .into_iter()
            .map(|c| (c.component_type(), c))
            .collect();
        let entity = Rc::new(Entity::from_parts(id, map));
        self.entities.insert(id, Rc::clone(&entity));

        for (_, component) in entity.shared_components() {
            self.index_component(id, component);
        }
        debug!(entity = %id, components = entity.len(), "entity created");

        // No entity channel can exist yet: `remove` drops the channel of every
        // id it retires, so a reused id starts unobserved.
        for (component_type, component) in entity.shared_components() {
            self.publish_component(component_type, || ComponentChange {
                id,
                entity: Some(Rc::clone(&entity)),
                component: Some(Rc::clone(component)),
            });
        }
        entity
    }

    // -- read ---------------------------------------------------------------

    /// The current snapshot of `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `id` is not live.
    pub fn get(&self, id: EntityId) -> Result<Rc<Entity>, StoreError> {
        self.entities
            .get(&id)
            .cloned()
            .ok_or(StoreError::EntityNotFound { id })
    }

    /// The current snapshot of the entity aliased `name`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NameNotFound`] if the alias is unknown or its entity has
    /// been removed.
    pub fn get_named(&self, name: &str) -> Result<Rc<Entity>, StoreError> {
        let id = self.resolve_name(name)?;
        self.get(id)
    }

    /// Resolve an [`EntityRef`] to a live id.
    pub fn resolve(&self, target: &EntityRef) -> Result<EntityId, StoreError> {
        match target {
            EntityRef::Id(id) if self.entities.contains_key(id) => Ok(*id),
            EntityRef::Id(id) => Err(StoreError::EntityNotFound { id: *id }),
            EntityRef::Name(name) => self.resolve_name(name),
        }
    }

    fn resolve_name(&self, name: &str) -> Result<EntityId, StoreError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::NameNotFound {
                name: name.to_owned(),
            })
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is live.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every live id, ascending.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Aliases currently pointing at `id`, sorted.
    pub fn names_of(&self, id: EntityId) -> Vec<&str> {
        self.aliases
            .get(&id)
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of live entities holding a component with tag `component_type`.
    pub fn count_of(&self, component_type: ComponentTypeId) -> usize {
        self.presence.get(&component_type).map_or(0, HashSet::len)
    }

    // -- remove -------------------------------------------------------------

    /// Remove `id` and every alias pointing at it.
    ///
    /// Returns `false` if `id` is not live. Observers of the entity receive
    /// [`EntityEvent::Removed`] and are then dropped; observers of each
    /// attached component type receive a change with neither entity nor
    /// component.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(&id) else {
            return false;
        };
        for (component_type, component) in entity.shared_components() {
            self.unindex_component(id, component_type, component);
        }
        if let Some(names) = self.aliases.remove(&id) {
            for name in names {
                self.names.remove(&name);
            }
        }
        debug!(entity = %id, "entity removed");

        self.publish_entity(id, || EntityEvent::Removed(id));
        // Removed is terminal. `clear` and `import` may hand this id out again.
        self.entity_channels.remove(&id);
        for component_type in entity.component_types() {
            self.publish_component(component_type, || ComponentChange {
                id,
                entity: None,
                component: None,
            });
        }
        true
    }

    /// Remove the entity aliased `name`. Returns `false` if unknown.
    pub fn remove_named(&mut self, name: &str) -> bool {
        match self.names.get(name).copied() {
            Some(id) => self.remove(id),
            None => false,
        }
    }

    /// Remove every entity, then reset indices, aliases and the id counter.
    ///
    /// Removals notify observers like [`remove`](Self::remove) does, which
    /// ends every entity subscription. Component-type subscriptions survive
    /// and receive events for entities created afterwards.
    pub fn clear(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
        self.entities.clear();
        self.names.clear();
        self.aliases.clear();
        self.presence.clear();
        self.value_indices.clear();
        self.allocator.reset();
        debug!("entity manager cleared");
    }

    // -- component mutation -------------------------------------------------

    /// Attach `component` to the target, replacing any value of the same type.
    ///
    /// A replace is a single change: observers get one
    /// [`EntityEvent::Changed`] and one [`ComponentChange`] carrying the new
    /// value, and nothing for the value it displaced.
    ///
    /// # Errors
    ///
    /// NotFound if the target does not resolve.
    pub fn set_component<T: Component>(
        &mut self,
        target: impl Into<EntityRef>,
        component: T,
    ) -> Result<Rc<Entity>, StoreError> {
        self.set_component_erased(target, Rc::new(component))
    }

    /// Type-erased [`set_component`](Self::set_component).
    pub fn set_component_erased(
        &mut self,
        target: impl Into<EntityRef>,
        component: Rc<dyn ErasedComponent>,
    ) -> Result<Rc<Entity>, StoreError> {
        let id = self.resolve(&target.into())?;
        let current = self.get(id)?;
        let component_type = component.component_type();

        if let Some(old) = current.shared(component_type) {
            self.unindex_component(id, component_type, old);
        }
        let entity = Rc::new(current.with_component(Rc::clone(&component)));
        self.entities.insert(id, Rc::clone(&entity));
        self.index_component(id, &component);
        trace!(entity = %id, component = %component_type, "component set");

        self.publish_entity(id, || EntityEvent::Changed(Rc::clone(&entity)));
        self.publish_component(component_type, || ComponentChange {
            id,
            entity: Some(Rc::clone(&entity)),
            component: Some(Rc::clone(&component)),
        });
        Ok(entity)
    }

    /// Detach the component of type `T`.
    ///
    /// Returns `Ok(false)` without side effects if it is not attached.
    ///
    /// # Errors
    ///
    /// NotFound if the target does not resolve.
    pub fn remove_component<T: Component>(
        &mut self,
        target: impl Into<EntityRef>,
    ) -> Result<bool, StoreError> {
        self.remove_component_type(target, ComponentTypeId::of::<T>(), true)
    }

    /// Detach the component tagged `component_type`, optionally without
    /// notifying observers.
    pub fn remove_component_type(
        &mut self,
        target: impl Into<EntityRef>,
        component_type: ComponentTypeId,
        notify: bool,
    ) -> Result<bool, StoreError> {
        let id = self.resolve(&target.into())?;
        let current = self.get(id)?;
        let Some(old) = current.shared(component_type) else {
            return Ok(false);
        };

        self.unindex_component(id, component_type, old);
        let entity = Rc::new(current.without_component(component_type));
        self.entities.insert(id, Rc::clone(&entity));
        trace!(entity = %id, component = %component_type, "component removed");

        if notify {
            self.publish_entity(id, || EntityEvent::Changed(Rc::clone(&entity)));
            self.publish_component(component_type, || ComponentChange {
                id,
                entity: Some(Rc::clone(&entity)),
                component: None,
            });
        }
        Ok(true)
    }

    // -- index maintenance --------------------------------------------------

    fn index_component(&mut self, id: EntityId, component: &Rc<dyn ErasedComponent>) {
        let component_type = component.component_type();
        self.presence.entry(component_type).or_default().insert(id);
        if let Some(index) = self.value_indices.get_mut(&component_type) {
            index.add_digest(component.value_digest(), id);
        }
    }

    fn unindex_component(
        &mut self,
        id: EntityId,
        component_type: ComponentTypeId,
        component: &Rc<dyn ErasedComponent>,
    ) {
        if let Some(ids) = self.presence.get_mut(&component_type) {
            ids.remove(&id);
            if ids.is_empty() {
                self.presence.remove(&component_type);
            }
        }
        if let Some(index) = self.value_indices.get_mut(&component_type) {
            index.remove_digest(&component.value_digest(), id);
        }
    }

    // -- presence queries ---------------------------------------------------

    /// Ids holding every component type in `Q`, in no particular order.
    pub fn matching_ids<Q: ComponentSet>(&self) -> Vec<EntityId> {
        self.matching_ids_of(&Q::type_ids())
    }

    /// Ids holding every listed component type, in no particular order.
    ///
    /// Empty if `types` is empty or any type has no live holder.
    pub fn matching_ids_of(&self, types: &[ComponentTypeId]) -> Vec<EntityId> {
        let mut sets = Vec::with_capacity(types.len());
        for component_type in types {
            match self.presence.get(component_type) {
                Some(ids) => sets.push(ids),
                None => return Vec::new(),
            }
        }
        intersect(&sets)
    }

    /// Current snapshots of every entity holding all types in `Q`.
    pub fn matching<Q: ComponentSet>(&self) -> Vec<Rc<Entity>> {
        self.matching_ids::<Q>()
            .into_iter()
            .filter_map(|id| self.entities.get(&id).cloned())
            .collect()
    }

    /// Call `f` with each matching entity and its `Q` components, in request
    /// order. Returns the number of calls made.
    ///
    /// Components are read from the current snapshots at call time.
    pub fn each<'s, Q, F>(&'s self, mut f: F) -> usize
    where
        Q: ComponentSet,
        F: FnMut(&'s Entity, Q::Refs<'s>),
    {
        let mut visited = 0;
        for id in self.matching_ids::<Q>() {
            let Some(entity) = self.entities.get(&id) else {
                continue;
            };
            let entity: &'s Entity = entity;
            if let Ok(refs) = Q::fetch(entity) {
                f(entity, refs);
                visited += 1;
            }
        }
        visited
    }

    // -- value index --------------------------------------------------------

    /// Build (or rebuild) the value index for `T`.
    pub fn index_by<T: Component>(&mut self) -> IndexStats {
        self.index_by_type(ComponentTypeId::of::<T>())
    }

    /// Build (or rebuild) the value index for `component_type` from the
    /// entities currently holding it. A previous index is discarded.
    pub fn index_by_type(&mut self, component_type: ComponentTypeId) -> IndexStats {
        let mut index = ValueIndex::new();
        let mut total_components = 0;
        if let Some(ids) = self.presence.get(&component_type) {
            for id in ids {
                let component = self
                    .entities
                    .get(id)
                    .and_then(|entity| entity.shared(component_type));
                if let Some(component) = component {
                    index.add_digest(component.value_digest(), *id);
                    total_components += 1;
                }
            }
        }
        let stats = IndexStats {
            unique_component_values: index.count_keys(),
            total_components,
        };
        self.value_indices.insert(component_type, index);
        debug!(
            component = %component_type,
            unique = stats.unique_component_values,
            total = stats.total_components,
            "value index built"
        );
        stats
    }

    /// Whether `component_type` has a value index.
    pub fn is_indexed(&self, component_type: ComponentTypeId) -> bool {
        self.value_indices.contains_key(&component_type)
    }

    /// Types with a value index, ordered by name.
    pub fn indexed_types(&self) -> Vec<ComponentTypeId> {
        self.value_indices.keys().copied().collect()
    }

    /// The value index for `component_type`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotIndexed`] if [`index_by`](Self::index_by) was never
    /// called for it.
    pub fn value_index(&self, component_type: ComponentTypeId) -> Result<&ValueIndex, StoreError> {
        self.value_indices
            .get(&component_type)
            .ok_or_else(|| StoreError::NotIndexed {
                component: component_type.name().to_owned(),
            })
    }

    /// Whether `id` currently holds a `T` equal (by digest) to `value`.
    pub fn has_index<T: Component>(&self, id: EntityId, value: &T) -> Result<bool, StoreError> {
        Ok(self
            .value_index(ComponentTypeId::of::<T>())?
            .has_value(value, id))
    }

    /// Number of entities whose `T` equals (by digest) `value`.
    pub fn count_index<T: Component>(&self, value: &T) -> Result<usize, StoreError> {
        Ok(self.value_index(ComponentTypeId::of::<T>())?.count(value))
    }

    /// Ids of entities whose `T` equals (by digest) `value`.
    pub fn matching_index<T: Component>(&self, value: &T) -> Result<Vec<EntityId>, StoreError> {
        Ok(self.value_index(ComponentTypeId::of::<T>())?.get(value))
    }

    // -- subscriptions ------------------------------------------------------

    /// Observe every change to entity `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `id` is not live.
    pub fn observe_entity(
        &mut self,
        id: EntityId,
        callback: impl FnMut(&EntityEvent) + 'static,
    ) -> Result<Subscription, StoreError> {
        if !self.contains(id) {
            return Err(StoreError::EntityNotFound { id });
        }
        let sub = self.next_subscription(ChannelKey::Entity(id));
        self.entity_channels
            .entry(id)
            .or_default()
            .subscribe(sub.id, callback);
        Ok(sub)
    }

    /// Observe every change to the entity currently aliased `name`.
    pub fn observe_named_entity(
        &mut self,
        name: &str,
        callback: impl FnMut(&EntityEvent) + 'static,
    ) -> Result<Subscription, StoreError> {
        let id = self.resolve_name(name)?;
        self.observe_entity(id, callback)
    }

    /// Observe every change to components of type `T`, on any entity.
    pub fn observe_component_type<T: Component>(
        &mut self,
        callback: impl FnMut(&ComponentChange) + 'static,
    ) -> Subscription {
        self.observe_component_type_id(ComponentTypeId::of::<T>(), callback)
    }

    /// Type-erased [`observe_component_type`](Self::observe_component_type).
    pub fn observe_component_type_id(
        &mut self,
        component_type: ComponentTypeId,
        callback: impl FnMut(&ComponentChange) + 'static,
    ) -> Subscription {
        let sub = self.next_subscription(ChannelKey::ComponentType(component_type));
        self.type_channels
            .entry(component_type)
            .or_default()
            .subscribe(sub.id, callback);
        sub
    }

    /// Observe changes to the `T` component of entity `id` only.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `id` is not live.
    pub fn observe_entity_component<T: Component>(
        &mut self,
        id: EntityId,
        mut callback: impl FnMut(&ComponentChange) + 'static,
    ) -> Result<Subscription, StoreError> {
        if !self.contains(id) {
            return Err(StoreError::EntityNotFound { id });
        }
        Ok(self.observe_component_type::<T>(move |change| {
            if change.id == id {
                callback(change);
            }
        }))
    }

    /// Stop deliveries to `subscription`. Returns `false` if it was already
    /// cancelled.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        match subscription.key {
            ChannelKey::Entity(id) => self
                .entity_channels
                .get_mut(&id)
                .is_some_and(|c| c.unsubscribe(subscription.id)),
            ChannelKey::ComponentType(t) => self
                .type_channels
                .get_mut(&t)
                .is_some_and(|c| c.unsubscribe(subscription.id)),
        }
    }

    fn next_subscription(&mut self, key: ChannelKey) -> Subscription {
        let id = self.next_subscription;
        self.next_subscription += 1;
        Subscription { key, id }
    }

    fn publish_entity(&mut self, id: EntityId, event: impl FnOnce() -> EntityEvent) {
        if let Some(channel) = self.entity_channels.get_mut(&id) {
            if !channel.is_empty() {
                trace!(entity = %id, subscribers = channel.len(), "publishing entity event");
                channel.publish(&event());
            }
        }
    }

    fn publish_component(
        &mut self,
        component_type: ComponentTypeId,
        change: impl FnOnce() -> ComponentChange,
    ) {
        if let Some(channel) = self.type_channels.get_mut(&component_type) {
            if !channel.is_empty() {
                trace!(
                    component = %component_type,
                    subscribers = channel.len(),
                    "publishing component change"
                );
                channel.publish(&change());
            }
        }
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
