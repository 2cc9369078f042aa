//! Component types, their type tags, and the name registry used by import.
//!
//! Every component type carries a stable name ([`Component::NAME`]). The
//! [`ComponentTypeId`] tag wraps that name and is the key of every internal
//! map in the store. A [`ComponentRegistry`] maps names back to decoders so
//! that exported JSON can be rehydrated into typed values.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::hashable::Hashable;
use crate::StoreError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A plain data value that can be attached to an entity.
///
/// `Clone` is the per-type copy used when a snapshot is rebuilt, `Hashable`
/// makes the type eligible for value indexing, and serde makes it exportable.
///
/// `NAME` must be unique across all component types used with one store.
pub trait Component: Hashable + Clone + fmt::Debug + Serialize + DeserializeOwned + 'static {
    /// Stable type name, used as the type tag and as the key in exports.
    const NAME: &'static str;
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Type tag identifying a component type by its stable name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(&'static str);

impl ComponentTypeId {
    /// The tag of component type `T`.
    #[inline]
    pub fn of<T: Component>() -> Self {
        Self(T::NAME)
    }

    /// The registered name.
    #[inline]
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ---------------------------------------------------------------------------
// ErasedComponent
// ---------------------------------------------------------------------------

/// Object-safe view of a [`Component`], used for heterogeneous storage.
///
/// Implemented for every `Component`; there is no reason to implement it by
/// hand.
pub trait ErasedComponent: Any + fmt::Debug + 'static {
    /// The type tag of the concrete component.
    fn component_type(&self) -> ComponentTypeId;

    /// The concrete value's [`Hashable::digest`].
    fn value_digest(&self) -> String;

    /// Plain structural data for export.
    fn to_json(&self) -> Result<serde_json::Value, StoreError>;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Component> ErasedComponent for T {
    fn component_type(&self) -> ComponentTypeId {
        ComponentTypeId::of::<T>()
    }

    fn value_digest(&self) -> String {
        Hashable::digest(self)
    }

    fn to_json(&self) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(self).map_err(|e| StoreError::ComponentSerialization {
            component: T::NAME.to_owned(),
            details: e.to_string(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn ErasedComponent {
    /// Downcast to the concrete component type.
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

type DecodeFn = fn(&serde_json::Value) -> Result<Rc<dyn ErasedComponent>, serde_json::Error>;

fn decode_as<T: Component>(
    value: &serde_json::Value,
) -> Result<Rc<dyn ErasedComponent>, serde_json::Error> {
    let component: T = serde_json::from_value(value.clone())?;
    Ok(Rc::new(component))
}

/// Metadata about a registered component type.
#[derive(Clone)]
struct ComponentInfo {
    id: ComponentTypeId,
    /// Collision check for names shared by two Rust types.
    type_id: TypeId,
    rust_name: &'static str,
    decode: DecodeFn,
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("rust_name", &self.rust_name)
            .finish_non_exhaustive()
    }
}

/// Maps component type names to decoders.
///
/// Callers build one of these and hand it to
/// [`EntityManager::import`](crate::manager::EntityManager::import) and
/// [`CommandBuffer::apply`](crate::command::CommandBuffer::apply).
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    by_name: HashMap<&'static str, ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register component type `T` under `T::NAME`.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `T::NAME` is already registered for a different Rust type.
    pub fn register<T: Component>(&mut self) -> ComponentTypeId {
        let id = ComponentTypeId::of::<T>();
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.by_name.get(T::NAME) {
            if existing.type_id != type_id {
                panic!(
                    "component name '{}' is already registered for {}",
                    T::NAME,
                    existing.rust_name
                );
            }
            return id;
        }
        self.by_name.insert(
            T::NAME,
            ComponentInfo {
                id,
                type_id,
                rust_name: std::any::type_name::<T>(),
                decode: decode_as::<T>,
            },
        );
        id
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: Component>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Look up a type tag by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).map(|info| info.id)
    }

    /// Look up a type tag by name, failing with
    /// [`StoreError::MissingTypeMapping`].
    pub fn require(&self, name: &str) -> Result<ComponentTypeId, StoreError> {
        self.lookup_by_name(name)
            .ok_or_else(|| self.missing(name))
    }

    /// Rehydrate a component from its plain structural data.
    pub fn decode(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<Rc<dyn ErasedComponent>, StoreError> {
        let info = self.by_name.get(name).ok_or_else(|| self.missing(name))?;
        (info.decode)(value).map_err(|e| StoreError::ComponentDeserialization {
            component: name.to_owned(),
            details: e.to_string(),
        })
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn missing(&self, name: &str) -> StoreError {
        StoreError::MissingTypeMapping {
            name: name.to_owned(),
            registered: self.registered_names().join(", "),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
