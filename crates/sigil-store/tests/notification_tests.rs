//! Integration tests for change notification and deferred mutation from
//! inside subscribers.

use std::cell::RefCell;
use std::rc::Rc;

use sigil_store::prelude::*;

// -- test component types ---------------------------------------------------

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
struct Health(i32);

impl Hashable for Health {
    fn digest(&self) -> String {
        self.0.to_string()
    }
}

impl Component for Health {
    const NAME: &'static str = "health";
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Dead;

impl Hashable for Dead {
    fn digest(&self) -> String {
        "dead".to_owned()
    }
}

impl Component for Dead {
    const NAME: &'static str = "dead";
}

// -- helpers ----------------------------------------------------------------

fn pos(x: i32, y: i32) -> Position {
    Position { x, y }
}

/// Compact, comparable record of a delivered event.
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    EntityChanged(u64, usize),
    EntityRemoved(u64),
    Type(u64, Option<Position>, bool),
}

fn record_entity(log: &Rc<RefCell<Vec<Seen>>>) -> impl FnMut(&EntityEvent) + 'static {
    let log = Rc::clone(log);
    move |event| {
        let seen = match event {
            EntityEvent::Changed(entity) => Seen::EntityChanged(entity.id().to_raw(), entity.len()),
            EntityEvent::Removed(id) => Seen::EntityRemoved(id.to_raw()),
        };
        log.borrow_mut().push(seen);
    }
}

fn record_position(log: &Rc<RefCell<Vec<Seen>>>) -> impl FnMut(&ComponentChange) + 'static {
    let log = Rc::clone(log);
    move |change| {
        log.borrow_mut().push(Seen::Type(
            change.id.to_raw(),
            change.component::<Position>().cloned(),
            change.entity.is_some(),
        ));
    }
}

/// Apply `buffer` repeatedly until subscribers stop queueing work.
fn drain(
    buffer: &Rc<RefCell<CommandBuffer>>,
    store: &mut EntityManager,
    registry: &ComponentRegistry,
) -> usize {
    let mut rounds = 0;
    loop {
        // Take the commands out so subscribers can queue into the shared
        // buffer while this batch applies.
        let mut pending = std::mem::take(&mut *buffer.borrow_mut());
        if pending.is_empty() {
            return rounds;
        }
        pending.apply(store, registry);
        rounds += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_notifications_arrive_in_order() {
    let mut store = EntityManager::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let _types = store.observe_component_type::<Position>(record_position(&log));
    let e = store.create_with(pos(0, 0));
    let id = e.id().to_raw();
    let _entity = store.observe_entity(e.id(), record_entity(&log)).unwrap();

    store.set_component(e.id(), pos(1, 1)).unwrap();
    store.set_component(e.id(), Health(10)).unwrap();
    store.remove_component::<Position>(e.id()).unwrap();
    store.remove(e.id());

    assert_eq!(
        *log.borrow(),
        vec![
            // create
            Seen::Type(id, Some(pos(0, 0)), true),
            // replace position: entity channel first, then the type channel
            Seen::EntityChanged(id, 1),
            Seen::Type(id, Some(pos(1, 1)), true),
            // add health: nothing on the position channel
            Seen::EntityChanged(id, 2),
            // remove position
            Seen::EntityChanged(id, 1),
            Seen::Type(id, None, true),
            // remove entity: position already gone, so no type record
            Seen::EntityRemoved(id),
        ]
    );
}

#[test]
fn entity_removal_reaches_every_attached_type() {
    let mut store = EntityManager::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let e = store.create(ComponentBundle::new().with(pos(3, 3)).with(Health(1)));

    let _p = store.observe_component_type::<Position>(record_position(&log));
    let health_log = Rc::clone(&log);
    let _h = store.observe_component_type::<Health>(move |change| {
        health_log
            .borrow_mut()
            .push(Seen::Type(change.id.to_raw(), None, change.entity.is_some()));
    });

    assert!(store.remove(e.id()));
    let seen = log.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen
        .iter()
        .all(|s| *s == Seen::Type(e.id().to_raw(), None, false)));
}

#[test]
fn removing_absent_component_is_silent() {
    let mut store = EntityManager::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let e = store.create_with(Health(5));
    let _entity = store.observe_entity(e.id(), record_entity(&log)).unwrap();
    let _types = store.observe_component_type::<Position>(record_position(&log));

    assert!(!store.remove_component::<Position>(e.id()).unwrap());
    assert!(log.borrow().is_empty());
}

#[test]
fn subscribers_see_the_new_snapshot() {
    let mut store = EntityManager::new();
    let e = store.create_with(pos(0, 0));
    let observed = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&observed);
    let _s = store
        .observe_entity(e.id(), move |event| {
            if let Some(entity) = event.entity() {
                *sink.borrow_mut() = entity.component::<Position>().ok().cloned();
            }
        })
        .unwrap();

    store.set_component(e.id(), pos(4, 2)).unwrap();
    assert_eq!(*observed.borrow(), Some(pos(4, 2)));
}

#[test]
fn observer_by_name_follows_the_aliased_entity() {
    let mut store = EntityManager::new();
    store
        .create_named("player", ComponentBundle::new().with(pos(0, 0)))
        .unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let _s = store
        .observe_named_entity("player", record_entity(&log))
        .unwrap();

    store.set_component("player", Health(3)).unwrap();
    assert!(store.remove_named("player"));

    assert_eq!(
        *log.borrow(),
        vec![Seen::EntityChanged(1, 2), Seen::EntityRemoved(1)]
    );
}

#[test]
fn entity_observer_does_not_follow_a_reused_id() {
    let mut store = EntityManager::new();
    let old = store.create_with(Health(1));
    let log = Rc::new(RefCell::new(Vec::new()));
    let _s = store.observe_entity(old.id(), record_entity(&log)).unwrap();

    store.clear();
    let fresh = store.create_with(Health(99));
    assert_eq!(fresh.id(), old.id());
    store.set_component(fresh.id(), Health(7)).unwrap();

    assert_eq!(*log.borrow(), vec![Seen::EntityRemoved(old.id().to_raw())]);
}

#[test]
fn unsubscribed_observer_is_not_called() {
    let mut store = EntityManager::new();
    let e = store.create_with(pos(0, 0));
    let log = Rc::new(RefCell::new(Vec::new()));
    let keep = store.observe_entity(e.id(), record_entity(&log)).unwrap();
    let dropped = store.observe_entity(e.id(), record_entity(&log)).unwrap();

    assert!(store.unsubscribe(dropped));
    store.set_component(e.id(), pos(1, 0)).unwrap();
    assert_eq!(log.borrow().len(), 1);

    assert!(store.unsubscribe(keep));
    store.set_component(e.id(), pos(2, 0)).unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn subscriber_queues_mutation_applied_afterwards() {
    let registry = ComponentRegistry::new()
        .with::<Position>()
        .with::<Health>()
        .with::<Dead>();
    let mut store = EntityManager::new();
    let buffer = Rc::new(RefCell::new(CommandBuffer::new()));

    // Anything whose health drops to zero gets tagged, then removed once the
    // tag lands.
    let queue = Rc::clone(&buffer);
    let _health = store.observe_component_type::<Health>(move |change| {
        if let Some(Health(hp)) = change.component::<Health>() {
            if *hp <= 0 {
                queue
                    .borrow_mut()
                    .set_component(change.id, "dead", serde_json::json!(null));
            }
        }
    });
    let queue = Rc::clone(&buffer);
    let _dead = store.observe_component_type::<Dead>(move |change| {
        if !change.is_removal() {
            queue.borrow_mut().remove(change.id);
        }
    });

    let survivor = store.create_with(Health(5));
    let victim = store.create_with(Health(1));
    store.set_component(victim.id(), Health(0)).unwrap();

    // Nothing happened yet: the change was only queued.
    assert!(store.contains(victim.id()));
    assert_eq!(buffer.borrow().len(), 1);

    let rounds = drain(&buffer, &mut store, &registry);
    assert_eq!(rounds, 2);
    assert!(!store.contains(victim.id()));
    assert!(store.contains(survivor.id()));
    assert!(buffer.borrow().is_empty());
}

#[test]
fn queued_command_against_removed_entity_fails_softly() {
    let registry = ComponentRegistry::new().with::<Position>();
    let mut store = EntityManager::new();
    let e = store.create_with(pos(0, 0));

    let mut cmds = CommandBuffer::new();
    cmds.set(e.id(), &pos(1, 1)).unwrap();
    cmds.remove(e.id());
    cmds.set(e.id(), &pos(2, 2)).unwrap();

    let applied = cmds.apply(&mut store, &registry);
    let outcome: Vec<bool> = applied.iter().map(|c| c.applied_successfully).collect();
    assert_eq!(outcome, vec![true, true, false]);
    assert_eq!(cmds.last_apply_report().failed_count, 1);
    assert!(store.is_empty());
}
