//! Synchronous publish/subscribe channels for change notification.
//!
//! The manager keeps one [`Channel`] per observed entity id and one per
//! observed component type, created lazily on first subscription. Delivery is
//! inline: [`Channel::publish`] calls every subscriber in subscription order
//! before returning.
//!
//! Subscribers receive events by reference and cannot reach the manager while
//! it is publishing. To react with a mutation, queue it in a
//! [`CommandBuffer`](crate::command::CommandBuffer) and apply the buffer once
//! the originating call has returned.

use std::fmt;
use std::rc::Rc;

use crate::component::{Component, ComponentTypeId, ErasedComponent};
use crate::entity::{Entity, EntityId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Delivered to entity observers.
#[derive(Debug, Clone)]
pub enum EntityEvent {
    /// The entity has a new snapshot (component added, replaced or removed).
    Changed(Rc<Entity>),
    /// The entity was removed. Terminal for this id.
    Removed(EntityId),
}

impl EntityEvent {
    /// The id the event is about.
    pub fn id(&self) -> EntityId {
        match self {
            EntityEvent::Changed(entity) => entity.id(),
            EntityEvent::Removed(id) => *id,
        }
    }

    /// The new snapshot, if the entity still exists.
    pub fn entity(&self) -> Option<&Rc<Entity>> {
        match self {
            EntityEvent::Changed(entity) => Some(entity),
            EntityEvent::Removed(_) => None,
        }
    }

    /// Whether this is the terminal removal event.
    pub fn is_removed(&self) -> bool {
        matches!(self, EntityEvent::Removed(_))
    }
}

/// Delivered to component-type observers.
///
/// | cause | `entity` | `component` |
/// |---|---|---|
/// | component added or replaced | new snapshot | new value |
/// | component removed from a live entity | new snapshot | `None` |
/// | entity removed | `None` | `None` |
#[derive(Debug, Clone)]
pub struct ComponentChange {
    /// The affected entity.
    pub id: EntityId,
    /// Snapshot after the change, `None` if the entity is gone.
    pub entity: Option<Rc<Entity>>,
    /// The new component value, `None` on removal.
    pub component: Option<Rc<dyn ErasedComponent>>,
}

impl ComponentChange {
    /// The new component value downcast to `T`.
    pub fn component<T: Component>(&self) -> Option<&T> {
        self.component.as_deref().and_then(|c| c.downcast_ref::<T>())
    }

    /// Whether the component was taken away (by itself or with its entity).
    pub fn is_removal(&self) -> bool {
        self.component.is_none()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Which channel a subscription lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ChannelKey {
    Entity(EntityId),
    ComponentType(ComponentTypeId),
}

/// Handle returned by the `observe_*` methods.
///
/// Pass it to [`EntityManager::unsubscribe`](crate::manager::EntityManager::unsubscribe)
/// to stop deliveries. Dropping the handle does not unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a subscription can only be cancelled through its handle"]
pub struct Subscription {
    pub(crate) key: ChannelKey,
    pub(crate) id: u64,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

type Callback<E> = Box<dyn FnMut(&E)>;

/// An ordered list of subscriber callbacks.
pub struct Channel<E> {
    subscribers: Vec<(u64, Callback<E>)>,
}

impl<E> Channel<E> {
    /// Create a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Add a subscriber under `id`.
    pub fn subscribe(&mut self, id: u64, callback: impl FnMut(&E) + 'static) {
        self.subscribers.push((id, Box::new(callback)));
    }

    /// Remove the subscriber registered under `id`.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Deliver `event` to every subscriber, in subscription order.
    pub fn publish(&mut self, event: &E) {
        for (_, callback) in &mut self.subscribers {
            callback(event);
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<E> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
