//! Deferred mutations for code that cannot hold `&mut EntityManager`.
//!
//! Subscribers run while the manager is mid-mutation, and systems often only
//! get a shared reference. Both record their changes in a [`CommandBuffer`]
//! and the owner applies it once control returns. Commands are applied in
//! strict insertion order (FIFO).
//!
//! Component values travel as JSON and are rehydrated through a
//! [`ComponentRegistry`] on apply.
//!
//! # Example
//!
//! ```
//! use sigil_store::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! impl Hashable for Health {
//!     fn digest(&self) -> String { self.0.to_string() }
//! }
//!
//! impl Component for Health {
//!     const NAME: &'static str = "health";
//! }
//!
//! let registry = ComponentRegistry::new().with::<Health>();
//! let mut store = EntityManager::new();
//! let entity = store.create_with(Health(100));
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.set_component(entity.id(), "health", serde_json::json!(50));
//!
//! let applied = cmds.apply(&mut store, &registry);
//! assert!(applied[0].applied_successfully);
//! assert_eq!(store.get(entity.id()).unwrap().component::<Health>().unwrap(), &Health(50));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::{Component, ComponentRegistry};
use crate::entity::EntityId;
use crate::manager::{ComponentBundle, EntityManager, EntityRef};
use crate::StoreError;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// What mutation a command performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Create an entity, optionally under an alias.
    Create {
        /// Alias to register, if any.
        name: Option<String>,
        /// Component name -> JSON value.
        components: Vec<(String, serde_json::Value)>,
    },
    /// Set a component on an entity (insert or replace).
    SetComponent {
        /// Component type name.
        component_name: String,
        /// Serialized component value.
        value: serde_json::Value,
    },
    /// Detach a component from an entity.
    RemoveComponent {
        /// Component type name.
        component_name: String,
    },
    /// Remove an entity.
    Remove,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single deferred mutation.
///
/// `target` is `None` for [`CommandKind::Create`]; after
/// [`CommandBuffer::apply`] the new id is in `created_entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Entity this command targets. `None` for creates.
    pub target: Option<EntityRef>,
    /// What to do.
    pub kind: CommandKind,
    /// Position within the buffer (set on insertion).
    pub command_index: u32,
    /// For creates: the id that was allocated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_entity: Option<EntityId>,
    /// Whether the command changed the store. `false` before `apply`.
    #[serde(default)]
    pub applied_successfully: bool,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of the last [`CommandBuffer::apply`] call.
///
/// A conflict is an (entity, component) pair targeted by more than one
/// command in the same batch. Last write wins; conflicts are only counted and
/// logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Number of (entity, component) pairs targeted by multiple commands.
    pub conflict_count: usize,
    /// Number of commands that failed to apply.
    pub failed_count: usize,
    /// Number of commands that applied successfully.
    pub success_count: usize,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Collects commands and applies them in insertion order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    last_apply_report: ApplyReport,
}

impl CommandBuffer {
    /// Create a new, empty command buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `Create` command.
    pub fn create(&mut self, components: Vec<(String, serde_json::Value)>) {
        self.push(
            None,
            CommandKind::Create {
                name: None,
                components,
            },
        );
    }

    /// Queue a `Create` command that also registers `name`.
    pub fn create_named(&mut self, name: &str, components: Vec<(String, serde_json::Value)>) {
        self.push(
            None,
            CommandKind::Create {
                name: Some(name.to_owned()),
                components,
            },
        );
    }

    /// Queue a `SetComponent` command from a JSON value.
    pub fn set_component(
        &mut self,
        target: impl Into<EntityRef>,
        component_name: &str,
        value: serde_json::Value,
    ) {
        self.push(
            Some(target.into()),
            CommandKind::SetComponent {
                component_name: component_name.to_owned(),
                value,
            },
        );
    }

    /// Queue a `SetComponent` command from a typed value.
    ///
    /// # Errors
    ///
    /// [`StoreError::ComponentSerialization`] if `value` cannot be encoded;
    /// nothing is queued in that case.
    pub fn set<T: Component>(
        &mut self,
        target: impl Into<EntityRef>,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_value(value).map_err(|e| StoreError::ComponentSerialization {
            component: T::NAME.to_owned(),
            details: e.to_string(),
        })?;
        self.set_component(target, T::NAME, json);
        Ok(())
    }

    /// Queue a `RemoveComponent` command.
    pub fn remove_component(&mut self, target: impl Into<EntityRef>, component_name: &str) {
        self.push(
            Some(target.into()),
            CommandKind::RemoveComponent {
                component_name: component_name.to_owned(),
            },
        );
    }

    /// Queue a `Remove` command.
    pub fn remove(&mut self, target: impl Into<EntityRef>) {
        self.push(Some(target.into()), CommandKind::Remove);
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Report from the last [`apply`](Self::apply) call.
    pub fn last_apply_report(&self) -> &ApplyReport {
        &self.last_apply_report
    }

    /// Drop every queued command without applying it.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    /// Apply all commands to `store` in insertion order.
    ///
    /// Returns every command, successful or not, and empties the buffer.
    /// Failures (unknown targets, unknown component names, bad JSON) are
    /// logged and counted in the [`ApplyReport`]; they do not stop the batch.
    pub fn apply(&mut self, store: &mut EntityManager, registry: &ComponentRegistry) -> Vec<Command> {
        let mut commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        // --- Conflict detection ---
        let mut seen: HashMap<(&EntityRef, &str), Vec<u32>> = HashMap::new();
        for cmd in &commands {
            let component = match &cmd.kind {
                CommandKind::SetComponent { component_name, .. }
                | CommandKind::RemoveComponent { component_name } => component_name.as_str(),
                _ => continue,
            };
            if let Some(target) = &cmd.target {
                seen.entry((target, component))
                    .or_default()
                    .push(cmd.command_index);
            }
        }
        let mut conflict_count = 0;
        for ((target, component), indices) in &seen {
            if indices.len() > 1 {
                conflict_count += 1;
                warn!(
                    target = ?target,
                    component = %component,
                    command_indices = ?indices,
                    "conflict: {} commands target the same entity+component (last-write-wins)",
                    indices.len()
                );
            }
        }

        // --- Apply loop ---
        let mut success_count = 0;
        let mut failed_count = 0;
        for cmd in &mut commands {
            match Self::apply_one(store, registry, cmd) {
                Ok(()) => {
                    cmd.applied_successfully = true;
                    success_count += 1;
                }
                Err(e) => {
                    failed_count += 1;
                    warn!(
                        command_index = cmd.command_index,
                        target = ?cmd.target,
                        error = %e,
                        "command application failed"
                    );
                }
            }
        }

        self.last_apply_report = ApplyReport {
            conflict_count,
            failed_count,
            success_count,
        };
        commands
    }

    fn apply_one(
        store: &mut EntityManager,
        registry: &ComponentRegistry,
        cmd: &mut Command,
    ) -> Result<(), StoreError> {
        match (&cmd.kind, &cmd.target) {
            (CommandKind::Create { name, components }, _) => {
                // Decode all values first so a bad one creates nothing.
                let mut bundle = ComponentBundle::new();
                for (component_name, value) in components {
                    bundle.add_erased(registry.decode(component_name, value)?);
                }
                let entity = match name {
                    Some(name) => store.create_named(name, bundle)?,
                    None => store.create(bundle),
                };
                cmd.created_entity = Some(entity.id());
                Ok(())
            }
            (CommandKind::SetComponent { component_name, value }, Some(target)) => {
                let component = registry.decode(component_name, value)?;
                store.set_component_erased(target.clone(), component)?;
                Ok(())
            }
            (CommandKind::RemoveComponent { component_name }, Some(target)) => {
                let component_type = registry.require(component_name)?;
                store.remove_component_type(target.clone(), component_type, true)?;
                Ok(())
            }
            (CommandKind::Remove, Some(target)) => {
                let id = store.resolve(target)?;
                store.remove(id);
                Ok(())
            }
            (_, None) => Err(StoreError::MissingTarget {
                command_index: cmd.command_index,
            }),
        }
    }

    fn push(&mut self, target: Option<EntityRef>, kind: CommandKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            target,
            kind,
            command_index: index,
            created_entity: None,
            applied_successfully: false,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
