use std::sync::Arc;
use std::time::{Duration, Instant};

use mantle::{DEFAULT_BLOCKS_TOML, Pipeline, PipelineConfig};
use mantle_blocks::{Block, BlockRegistry, BlocksConfig, MaterialCatalog};
use mantle_render::{MeshState, NullDevice};
use mantle_world::{ChunkPos, SectionBuf, SectionKey};

fn registry() -> Arc<BlockRegistry> {
    let cfg = BlocksConfig::from_toml_str(DEFAULT_BLOCKS_TOML).unwrap();
    Arc::new(BlockRegistry::from_configs(MaterialCatalog::new(), cfg).unwrap())
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        workers: 2,
        section_lo: 0,
        section_hi: 1,
        ..PipelineConfig::default()
    }
}

fn pump_until_quiescent(pipeline: &mut Pipeline, device: &mut NullDevice) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        pipeline.pump(device);
        if pipeline.is_quiescent() {
            // One more pass so freshly accepted results reach the device.
            pipeline.pump(device);
            if pipeline.is_quiescent() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("pipeline never went quiescent");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn stone_section(reg: &BlockRegistry, at: (usize, usize, usize)) -> SectionBuf {
    let mut buf = SectionBuf::air();
    buf.set_local(
        at.0,
        at.1,
        at.2,
        Block::new(reg.id_by_name("stone").unwrap()),
    );
    buf
}

fn load_empty_chunk(pipeline: &mut Pipeline, chunk: ChunkPos) {
    pipeline.store.mark_chunk_loaded(chunk);
    pipeline.chunk_loaded(chunk);
}

#[test]
fn sections_wait_for_neighbour_chunks() {
    let reg = registry();
    let mut pipeline = Pipeline::new(Arc::clone(&reg), &test_config());
    let mut device = NullDevice::new();

    let key = SectionKey::new(0, 0, 0);
    pipeline.store.insert_section(key, stone_section(&reg, (8, 8, 8)));
    pipeline.chunk_loaded(ChunkPos::new(0, 0));

    pump_until_quiescent(&mut pipeline, &mut device);
    assert_eq!(pipeline.meshes.state(key), MeshState::Unloaded);
    assert_eq!(pipeline.deferred_count(), 1);
    assert_eq!(device.live_handles(), 0);

    // Three of four neighbours is still not enough.
    load_empty_chunk(&mut pipeline, ChunkPos::new(1, 0));
    load_empty_chunk(&mut pipeline, ChunkPos::new(-1, 0));
    load_empty_chunk(&mut pipeline, ChunkPos::new(0, 1));
    pump_until_quiescent(&mut pipeline, &mut device);
    assert_eq!(pipeline.deferred_count(), 1);

    // The last neighbour unblocks the build.
    load_empty_chunk(&mut pipeline, ChunkPos::new(0, -1));
    pump_until_quiescent(&mut pipeline, &mut device);
    assert_eq!(pipeline.deferred_count(), 0);
    assert_eq!(pipeline.meshes.state(key), MeshState::Loaded);
    assert_eq!(device.live_handles(), 1);
}

fn loaded_neighbourhood(reg: &Arc<BlockRegistry>) -> (Pipeline, NullDevice, SectionKey) {
    let mut pipeline = Pipeline::new(Arc::clone(reg), &test_config());
    let mut device = NullDevice::new();
    let key = SectionKey::new(0, 0, 0);
    pipeline.store.insert_section(key, stone_section(reg, (8, 8, 8)));
    pipeline.chunk_loaded(ChunkPos::new(0, 0));
    for (dx, dz) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        load_empty_chunk(&mut pipeline, ChunkPos::new(dx, dz));
    }
    pump_until_quiescent(&mut pipeline, &mut device);
    (pipeline, device, key)
}

#[test]
fn edit_bursts_settle_on_the_final_state() {
    let reg = registry();
    let (mut pipeline, mut device, key) = loaded_neighbourhood(&reg);
    assert_eq!(pipeline.meshes.state(key), MeshState::Loaded);
    let first_gen = pipeline.meshes.loaded().next().unwrap().generation;

    // Rapid toggles; the last edit clears the only block.
    let stone = Block::new(reg.id_by_name("stone").unwrap());
    for _ in 0..4 {
        pipeline.edit_block(key, 8, 8, 8, Block::AIR);
        pipeline.edit_block(key, 8, 8, 8, stone);
    }
    pipeline.edit_block(key, 8, 8, 8, Block::AIR);
    pump_until_quiescent(&mut pipeline, &mut device);

    let mesh = pipeline.meshes.loaded().find(|m| m.key == key).unwrap();
    assert!(mesh.generation > first_gen);
    // Final state is an empty section: still installed, nothing to draw.
    assert!(mesh.opaque.is_none());
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn border_edits_rebuild_the_adjacent_section() {
    let reg = registry();
    let (mut pipeline, mut device, key) = loaded_neighbourhood(&reg);

    let above = key.offset(0, 1, 0);
    pipeline
        .store
        .insert_section(above, stone_section(&reg, (3, 3, 3)));
    pipeline.chunk_loaded(ChunkPos::new(0, 0));
    pump_until_quiescent(&mut pipeline, &mut device);
    let gen_above = pipeline
        .meshes
        .loaded()
        .find(|m| m.key == above)
        .unwrap()
        .generation;

    // Editing the top layer of the lower section must re-mesh both.
    let stone = Block::new(reg.id_by_name("stone").unwrap());
    pipeline.edit_block(key, 3, 15, 3, stone);
    pump_until_quiescent(&mut pipeline, &mut device);
    let after = pipeline
        .meshes
        .loaded()
        .find(|m| m.key == above)
        .unwrap()
        .generation;
    assert!(after > gen_above);
}

#[test]
fn unload_mid_churn_releases_every_handle() {
    let reg = registry();
    let (mut pipeline, mut device, key) = loaded_neighbourhood(&reg);
    assert_eq!(device.live_handles(), 1);

    // Kick off a rebuild and unload before it can land.
    let stone = Block::new(reg.id_by_name("stone").unwrap());
    pipeline.edit_block(key, 1, 1, 1, stone);
    pipeline.request_unload(ChunkPos::new(0, 0));
    pump_until_quiescent(&mut pipeline, &mut device);

    assert_eq!(pipeline.meshes.state(key), MeshState::Unloaded);
    assert!(!pipeline.store.contains(key));
    assert_eq!(device.live_handles(), 0);

    // A second unload of the same chunk changes nothing.
    let frees = device.frees;
    pipeline.request_unload(ChunkPos::new(0, 0));
    pump_until_quiescent(&mut pipeline, &mut device);
    assert_eq!(device.frees, frees);
}

#[test]
fn camera_moves_rebuild_only_on_bucket_changes() {
    let reg = registry();
    let (mut pipeline, mut device, key) = loaded_neighbourhood(&reg);
    let gen0 = pipeline.meshes.loaded().next().unwrap().generation;

    // Far camera: detail buckets change, a rebuild lands.
    pipeline.set_camera_section(SectionKey::new(20, 0, 0));
    pump_until_quiescent(&mut pipeline, &mut device);
    let far = pipeline.meshes.loaded().find(|m| m.key == key).unwrap();
    assert!(far.generation > gen0);
    let far_gen = far.generation;
    let far_details = far.details;

    // A nearby far section: same buckets, no rebuild.
    pipeline.set_camera_section(SectionKey::new(21, 0, 0));
    pump_until_quiescent(&mut pipeline, &mut device);
    let same = pipeline.meshes.loaded().find(|m| m.key == key).unwrap();
    assert_eq!(same.details, far_details);
    assert_eq!(same.generation, far_gen);
}
