use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relic_blocks::BlockRegistry;
use relic_build::Builder;
use relic_geom::Point;
use relic_persist::{ApplyMode, RegionStore, Slot};
use relic_region::RegionContext;
use relic_task::{Pace, Sched, TaskFuture, TaskStatus};
use relic_world::{ChunkBuf, FlatParams, World, WorldSet};

#[derive(Parser, Debug)]
#[command(name = "relic", about = "Region save/build/restore demo over a flat world")]
struct Args {
    /// Directory region files are written under
    #[arg(long, default_value = "relic-data")]
    data_dir: PathBuf,

    /// Optional TOML block registry (defaults to the built-in palette)
    #[arg(long)]
    blocks: Option<PathBuf>,

    /// Snapshot slot to save into and restore from
    #[arg(long, default_value = "default")]
    slot: String,

    /// World height in blocks
    #[arg(long, default_value_t = 64)]
    height: usize,

    /// Background worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    let registry = match &args.blocks {
        Some(path) => Arc::new(
            BlockRegistry::from_path(path).map_err(|e| format!("load {path:?}: {e}"))?,
        ),
        None => Arc::new(BlockRegistry::builtin()),
    };
    let sched = Sched::with_workers(args.workers);

    let world = Arc::new(World::new("overworld", args.height));
    world.generate_flat(
        &registry,
        0,
        0,
        3,
        2,
        &FlatParams {
            thickness: 8,
            material: "stone".into(),
        },
    );
    let worlds = Arc::new(WorldSet::new());
    worlds.insert(world.clone());

    let ctx = RegionContext::new();
    let region = ctx
        .create_region("demo", "courtyard")
        .map_err(|e| e.to_string())?;
    ctx.set_region_corners(
        &region,
        Point::new("overworld", 0.0, 0.0, 0.0),
        Point::new("overworld", 47.0, 12.0, 31.0),
    )
    .map_err(|e| e.to_string())?;
    log::info!(
        "region {:?}: {} chunks, {} blocks",
        region.name(),
        region.chunk_coords().len(),
        region.bounds_snapshot().block_volume().unwrap_or(0)
    );

    let store = RegionStore::new(sched.clone(), worlds.clone(), registry.clone(), &args.data_dir);
    let slot = Slot::named(args.slot.clone());

    // 1. persist the pristine state
    wait_done(&sched, store.save_data(&region, &slot), "save")?;
    log::info!("saved slot {:?} under {:?}", slot.as_str(), args.data_dir);

    // keep pre-vandalism snapshots around for the build pass
    let pristine: Vec<Arc<ChunkBuf>> = region
        .chunk_coords()
        .into_iter()
        .filter_map(|c| world.chunk_snapshot(c))
        .collect();

    // 2. vandalize a patch and a trench
    let brick = registry
        .block_by_name("brick", 0)
        .ok_or("registry has no brick")?;
    let stone = registry
        .block_by_name("stone", 0)
        .ok_or("registry has no stone")?;
    let before = world.edit_count();
    for x in 10..20 {
        for z in 10..14 {
            world.set_block(x, 5, z, brick);
        }
    }
    for x in 30..40 {
        world.set_block(x, 7, 20, relic_blocks::Block::AIR);
    }
    log::info!("vandalized {} voxels", world.edit_count() - before);

    // 3. build the pristine snapshots back in (diff off-thread, apply on main)
    let builder = Builder::new(sched.clone(), worlds.clone());
    wait_done(&sched, builder.build(&region, Pace::Queued, pristine), "build")?;
    wait_world(&sched, &world, 15, 5, 12, stone)?;
    wait_world(&sched, &world, 35, 7, 20, stone)?;
    log::info!("build pass healed the patch and the trench");

    // 4. vandalize again, restore from the saved slot this time
    let before = world.edit_count();
    for z in 0..8 {
        world.set_block(5, 5, z, brick);
    }
    log::info!("vandalized {} voxels", world.edit_count() - before);
    if !store.can_restore(&region, &slot) {
        return Err(format!("slot {:?} lost its files", slot.as_str()));
    }
    wait_done(
        &sched,
        store.restore_data(&region, &slot, Pace::Queued, ApplyMode::Mismatched),
        "restore",
    )?;
    wait_world(&sched, &world, 5, 5, 3, stone)?;
    log::info!("restore healed the trench; region matches the saved slot");

    ctx.teardown();
    Ok(())
}

fn wait_done(sched: &Sched, fut: TaskFuture, what: &str) -> Result<(), String> {
    if !sched.drive_until(60_000, || fut.status().is_terminal()) {
        return Err(format!("{what}: timed out"));
    }
    match fut.status() {
        TaskStatus::Success => Ok(()),
        status => Err(format!(
            "{what}: {status:?}: {}",
            fut.message().unwrap_or_default()
        )),
    }
}

/// Main-context flushes land a couple of ticks after the futures settle;
/// pump until the probe voxel shows the expected material.
fn wait_world(
    sched: &Sched,
    world: &Arc<World>,
    x: i32,
    y: i32,
    z: i32,
    expect: relic_blocks::Block,
) -> Result<(), String> {
    if sched.drive_until(60_000, || world.block_at(x, y, z) == Some(expect)) {
        Ok(())
    } else {
        Err(format!("voxel ({x}, {y}, {z}) never reached {expect:?}"))
    }
}
