//! Small crate-pushing simulation driving the store through its public API.
//!
//! Run with:
//!   cargo run -p sigil-demo [-- path/to/config.json]
//!
//! The optional config file is a JSON `ManagerConfig`, e.g.
//! `{"first_entity_id": 100, "initial_capacity": 64}`. Set `RUST_LOG=debug`
//! to watch the store's own events.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use sigil_store::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

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
struct Label(String);

impl Hashable for Label {
    fn digest(&self) -> String {
        self.0.clone()
    }
}

impl Component for Label {
    const NAME: &'static str = "label";
}

fn registry() -> ComponentRegistry {
    ComponentRegistry::new()
        .with::<Position>()
        .with::<Velocity>()
        .with::<Label>()
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Grid is `WIDTH` x `HEIGHT`; movers bounce off the edges.
const WIDTH: i32 = 8;
const HEIGHT: i32 = 6;

/// Move every entity with a velocity one step, queueing the writes.
fn movement_system(store: &EntityManager, cmds: &mut CommandBuffer) -> anyhow::Result<usize> {
    let mut moves = Vec::new();
    store.each::<(Position, Velocity), _>(|entity, (pos, vel)| {
        moves.push((entity.id(), pos.clone(), vel.clone()));
    });

    for (id, pos, current) in moves {
        let mut vel = current.clone();
        let mut next = Position {
            x: pos.x + vel.dx,
            y: pos.y + vel.dy,
        };
        if !(0..WIDTH).contains(&next.x) {
            vel.dx = -vel.dx;
            next.x = pos.x + vel.dx;
        }
        if !(0..HEIGHT).contains(&next.y) {
            vel.dy = -vel.dy;
            next.y = pos.y + vel.dy;
        }
        cmds.set(id, &next)?;
        if vel != current {
            cmds.set(id, &vel)?;
        }
    }
    Ok(cmds.len())
}

/// Report every cell holding more than one entity.
fn collision_system(store: &mut EntityManager) -> anyhow::Result<Vec<(Position, Vec<EntityId>)>> {
    let stats = store.index_by::<Position>();
    tracing::info!(
        unique = stats.unique_component_values,
        total = stats.total_components,
        "positions indexed"
    );

    let mut collisions = Vec::new();
    for x in 0..WIDTH {
        for y in 0..HEIGHT {
            let cell = Position { x, y };
            if store.count_index(&cell)? > 1 {
                let mut ids = store.matching_index(&cell)?;
                ids.sort();
                collisions.push((cell, ids));
            }
        }
    }
    Ok(collisions)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn load_config() -> anyhow::Result<ManagerConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config file {path}"))
        }
        None => Ok(ManagerConfig::default()),
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let registry = registry();
    let mut store = EntityManager::with_config(load_config()?);

    // Setup: a pusher, two crates, a wall segment.
    let pusher = store.create_named(
        "pusher",
        ComponentBundle::new()
            .with(Position { x: 0, y: 0 })
            .with(Velocity { dx: 1, dy: 1 })
            .with(Label("pusher".to_owned())),
    )?;
    for (x, y) in [(3, 3), (5, 1)] {
        store.create(
            ComponentBundle::new()
                .with(Position { x, y })
                .with(Label("crate".to_owned())),
        );
    }
    store.create(
        ComponentBundle::new()
            .with(Position { x: 7, y: 0 })
            .with(Velocity { dx: -1, dy: 0 }),
    );

    // Observers log every position change and watch the pusher closely.
    let moves_seen = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&moves_seen);
    let position_sub = store.observe_component_type::<Position>(move |change| {
        if let Some(pos) = change.component::<Position>() {
            *counter.borrow_mut() += 1;
            tracing::debug!(entity = %change.id, x = pos.x, y = pos.y, "moved");
        }
    });
    let _pusher_sub = store.observe_named_entity("pusher", |event| {
        if let Some(entity) = event.entity() {
            if let Ok(pos) = entity.component::<Position>() {
                tracing::info!(x = pos.x, y = pos.y, "pusher moved");
            }
        }
    })?;

    let mut cmds = CommandBuffer::new();
    for tick in 1..=6 {
        movement_system(&store, &mut cmds)?;
        cmds.apply(&mut store, &registry);
        let report = cmds.last_apply_report();
        if report.failed_count > 0 {
            anyhow::bail!("tick {tick}: {} commands failed", report.failed_count);
        }

        for (cell, ids) in collision_system(&mut store)? {
            println!("tick {tick}: {} entities share ({}, {}): {ids:?}", ids.len(), cell.x, cell.y);
        }
    }
    store.unsubscribe(position_sub);
    println!("{} position changes observed", moves_seen.borrow());

    let crates = store.matching_ids::<(Position, Label)>().len();
    println!(
        "{} entities, {} labelled with a position, pusher is {:?}",
        store.len(),
        crates,
        store.get(pusher.id())?.component::<Position>()?
    );

    // Snapshot round trip.
    let snapshot = store.export()?;
    let json = serde_json::to_string_pretty(&snapshot)?;
    println!("{json}");

    let mut restored = EntityManager::new();
    restored.import(&serde_json::from_str(&json)?, &registry)?;
    anyhow::ensure!(
        restored.export()? == snapshot,
        "restored store differs from the original"
    );
    println!(
        "restored {} entities, indexed: {:?}",
        restored.len(),
        restored.indexed_types()
    );

    Ok(())
}
