use std::error::Error;
use std::sync::Arc;

use clap::Parser;

use mantle::{DEFAULT_BLOCKS_TOML, Pipeline, PipelineConfig};
use mantle_blocks::{BlockRegistry, BlocksConfig, MaterialCatalog};
use mantle_geom::Vec3;
use mantle_render::{AlwaysVisible, NullDevice};
use mantle_world::{ChunkPos, SectionKey, generate_chunk};

#[derive(Parser, Debug)]
#[command(
    name = "mantle",
    about = "Headless chunk mesh pipeline demo: generates terrain, builds section meshes on workers, and reports what a frame would draw."
)]
struct Args {
    /// Pipeline config TOML; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,
    /// Block palette TOML; a built-in palette is used when omitted.
    #[arg(long)]
    blocks: Option<String>,
    /// Override worker count from the config.
    #[arg(long)]
    workers: Option<usize>,
    /// Chunk radius to generate around the origin.
    #[arg(long, default_value_t = 3)]
    radius: i32,
    /// Frames to pump before reporting.
    #[arg(long, default_value_t = 240)]
    frames: u32,
    #[arg(long)]
    seed: Option<i32>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(w) = args.workers {
        cfg.workers = w;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }

    let blocks = match &args.blocks {
        Some(path) => BlocksConfig::from_path(path)?,
        None => BlocksConfig::from_toml_str(DEFAULT_BLOCKS_TOML)?,
    };
    let reg = Arc::new(BlockRegistry::from_configs(MaterialCatalog::new(), blocks)?);

    let mut pipeline = Pipeline::new(Arc::clone(&reg), &cfg);
    let mut device = NullDevice::new();

    let r = args.radius;
    for cx in -r..=r {
        for cz in -r..=r {
            let chunk = ChunkPos::new(cx, cz);
            let sections = generate_chunk(&pipeline.store, &reg, chunk, cfg.seed);
            log::info!("generated chunk {:?}: {} sections", chunk, sections.len());
            pipeline.chunk_loaded(chunk);
        }
    }
    pipeline.set_camera_section(SectionKey::new(0, cfg.section_hi / 2, 0));

    for frame in 0..args.frames {
        let stats = pipeline.pump(&mut device);
        if stats.events > 0 || stats.results > 0 {
            log::debug!(
                "frame {}: {} events, {} results, {} queued, {} inflight, {} deferred",
                frame,
                stats.events,
                stats.results,
                stats.queued,
                stats.inflight,
                stats.deferred
            );
        }
        if pipeline.is_quiescent() && frame > 0 {
            log::info!("pipeline quiescent after {} frames", frame + 1);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    let cam = Vec3::new(0.0, (cfg.section_hi / 2 * 16) as f32, 0.0);
    let set = pipeline.visible(cam, &AlwaysVisible);
    println!(
        "loaded meshes: {}, draw lists: {} opaque / {} translucent / {} overlay",
        pipeline.meshes.loaded_count(),
        set.opaque.len(),
        set.translucent.len(),
        set.overlay.len()
    );
    println!(
        "gpu: {} uploads, {} frees, {} live buffers, {} stale results dropped",
        pipeline.meshes.stats.uploads,
        pipeline.meshes.stats.frees,
        device.live_handles(),
        pipeline.meshes.stats.stale_discards
    );
    Ok(())
}
