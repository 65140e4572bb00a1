//! Render-thread side of the mesh pipeline: GPU handle ownership, the
//! bounded upload and free queues, and per-frame visibility collection.
//! Nothing in here is called from workers; the graphics context's thread
//! affinity is enforced by ownership rather than locks.
#![forbid(unsafe_code)]

pub mod device;
pub mod registry;
pub mod visibility;

pub use device::{DeviceError, MeshHandle, NullDevice, RenderDevice};
pub use registry::{LoadedMesh, MeshRegistry, MeshState, RegistryStats};
pub use visibility::{AlwaysVisible, DrawItem, RadiusCull, VisibilityGraph, VisibleSet, collect_visible};

#[cfg(test)]
mod tests {
    use mantle_blocks::{BlockEntityKind, MaterialId};
    use mantle_geom::Vec3;
    use mantle_mesh_cpu::{BlockEntityHandle, BuiltGeometry, DetailSet, Face, MeshBuild};
    use mantle_runtime::BuildResult;
    use mantle_world::{ChunkPos, SectionKey};

    use super::*;

    fn unit_face(min: Vec3) -> MeshBuild {
        let mut m = MeshBuild::default();
        m.add_box_face(
            Face::PosY,
            min,
            min + Vec3::new(1.0, 1.0, 1.0),
            [255; 4],
            MaterialId(0),
            1.0,
        );
        m
    }

    fn geometry(key: SectionKey, translucent: bool, details: DetailSet) -> BuiltGeometry {
        let (x, y, z) = key.world_min();
        let min = Vec3::new(x as f32, y as f32, z as f32);
        let mut g = BuiltGeometry {
            key,
            opaque: unit_face(min),
            translucent: MeshBuild::default(),
            overlay: MeshBuild::default(),
            block_entities: Vec::new(),
            bbox: mantle_geom::Aabb::new(min, min + Vec3::new(1.0, 1.0, 1.0)),
            details,
        };
        if translucent {
            g.translucent = unit_face(min);
        }
        g
    }

    fn result(key: SectionKey, generation: u64, translucent: bool) -> BuildResult {
        BuildResult {
            key,
            generation,
            geometry: geometry(key, translucent, DetailSet::ALL),
            build_ms: 0,
        }
    }

    #[test]
    fn installs_advance_generations_monotonically() {
        let mut reg = MeshRegistry::new(8, 8);
        let mut dev = NullDevice::new();
        let key = SectionKey::new(0, 0, 0);

        reg.mark_preparing(key, 1);
        assert_eq!(reg.state(key), MeshState::Preparing);
        reg.accept(result(key, 1, false));
        reg.pump(&mut dev);
        assert_eq!(reg.state(key), MeshState::Loaded);
        assert_eq!(dev.live_handles(), 1);

        reg.mark_preparing(key, 2);
        // Still renderable with the old mesh while the rebuild runs.
        assert_eq!(reg.state(key), MeshState::Loaded);
        reg.accept(result(key, 2, false));
        reg.pump(&mut dev);
        reg.pump(&mut dev); // old handle leaves via the free queue
        assert_eq!(dev.live_handles(), 1);
        assert_eq!(reg.stats.frees, 1);

        // A straggler from generation 1 must not reinstall.
        reg.accept(result(key, 1, false));
        reg.pump(&mut dev);
        assert_eq!(reg.stats.stale_discards, 1);
        assert_eq!(dev.live_handles(), 1);
    }

    #[test]
    fn unload_during_build_leaks_no_handles() {
        let mut reg = MeshRegistry::new(8, 8);
        let mut dev = NullDevice::new();
        let key = SectionKey::new(0, 0, 0);

        // Result arrives after the section is gone.
        reg.mark_preparing(key, 1);
        reg.remove(key);
        reg.accept(result(key, 1, false));
        reg.pump(&mut dev);
        assert_eq!(dev.live_handles(), 0);
        assert_eq!(reg.state(key), MeshState::Unloaded);

        // Result was queued for upload when the unload hit; its epoch is
        // stale even though the section loaded again.
        reg.mark_preparing(key, 2);
        reg.accept(result(key, 2, false));
        reg.remove(key);
        reg.mark_preparing(key, 3);
        reg.accept(result(key, 3, false));
        reg.pump(&mut dev);
        assert_eq!(dev.live_handles(), 1);
        let loaded: Vec<_> = reg.loaded().collect();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].generation, 3);
    }

    #[test]
    fn a_failed_build_clears_the_preparing_state() {
        let mut reg = MeshRegistry::new(8, 8);
        let key = SectionKey::new(0, 0, 0);
        reg.mark_preparing(key, 1);
        assert_eq!(reg.state(key), MeshState::Preparing);
        reg.mark_failed(key, 1);
        assert_eq!(reg.state(key), MeshState::Unloaded);

        // A failure from a superseded build leaves the newer one pending.
        reg.mark_preparing(key, 2);
        reg.mark_preparing(key, 3);
        reg.mark_failed(key, 2);
        assert_eq!(reg.state(key), MeshState::Preparing);

        // With an installed mesh the section simply stays loaded.
        let mut dev = NullDevice::new();
        reg.accept(result(key, 3, false));
        reg.pump(&mut dev);
        reg.mark_preparing(key, 4);
        reg.mark_failed(key, 4);
        assert_eq!(reg.state(key), MeshState::Loaded);
    }

    #[test]
    fn repeated_unload_is_a_noop() {
        let mut reg = MeshRegistry::new(8, 8);
        let mut dev = NullDevice::new();
        let key = SectionKey::new(0, 0, 0);
        reg.mark_preparing(key, 1);
        reg.accept(result(key, 1, true));
        reg.pump(&mut dev);
        assert_eq!(dev.live_handles(), 2);

        assert!(reg.remove(key));
        assert!(!reg.remove(key));
        reg.pump(&mut dev);
        assert_eq!(dev.live_handles(), 0);
        assert_eq!(dev.frees, 2);
    }

    #[test]
    fn remove_chunk_unloads_every_section() {
        let mut reg = MeshRegistry::new(8, 8);
        let mut dev = NullDevice::new();
        let chunk = ChunkPos::new(2, 3);
        for y in 0..4 {
            let key = SectionKey { chunk, y };
            reg.mark_preparing(key, 1 + y as u64);
            reg.accept(result(key, 1 + y as u64, false));
        }
        reg.pump(&mut dev);
        assert_eq!(reg.loaded_count(), 4);
        assert_eq!(reg.remove_chunk(chunk), 4);
        assert_eq!(reg.remove_chunk(chunk), 0);
        reg.pump(&mut dev);
        assert_eq!(dev.live_handles(), 0);
    }

    #[test]
    fn upload_budget_bounds_frame_work() {
        let mut reg = MeshRegistry::new(2, 8);
        let mut dev = NullDevice::new();
        for x in 0..5 {
            let key = SectionKey::new(x, 0, 0);
            reg.mark_preparing(key, 1 + x as u64);
            reg.accept(result(key, 1 + x as u64, false));
        }
        reg.pump(&mut dev);
        assert_eq!(dev.uploads, 2);
        assert_eq!(reg.pending_uploads(), 3);
        reg.pump(&mut dev);
        reg.pump(&mut dev);
        assert_eq!(dev.uploads, 5);
        assert_eq!(reg.pending_uploads(), 0);
    }

    #[test]
    fn failed_upload_retries_next_frame() {
        let mut reg = MeshRegistry::new(8, 8);
        let mut dev = NullDevice::new();
        let key = SectionKey::new(0, 0, 0);
        reg.mark_preparing(key, 1);
        reg.accept(result(key, 1, false));

        dev.fail_uploads = true;
        reg.pump(&mut dev);
        assert_eq!(reg.state(key), MeshState::Preparing);
        assert_eq!(reg.pending_uploads(), 1);
        assert_eq!(dev.live_handles(), 0);
        assert_eq!(reg.stats.upload_retries, 1);

        dev.fail_uploads = false;
        reg.pump(&mut dev);
        assert_eq!(reg.state(key), MeshState::Loaded);
    }

    #[test]
    fn draw_lists_sort_by_distance_with_stable_ties() {
        let mut reg = MeshRegistry::new(16, 16);
        let mut dev = NullDevice::new();
        // Two equidistant sections and one close, one far.
        let keys = [
            SectionKey::new(2, 0, 0),
            SectionKey::new(-2, 0, 0),
            SectionKey::new(0, 0, 1),
            SectionKey::new(6, 0, 0),
        ];
        for (i, &key) in keys.iter().enumerate() {
            reg.mark_preparing(key, 1 + i as u64);
            reg.accept(result(key, 1 + i as u64, true));
        }
        reg.pump(&mut dev);

        let cam = Vec3::new(0.5, 0.5, 0.5);
        let set = collect_visible(&reg, cam, &AlwaysVisible);
        let opaque: Vec<SectionKey> = set.opaque.iter().map(|d| d.key).collect();
        assert_eq!(
            opaque,
            vec![
                SectionKey::new(0, 0, 1),
                SectionKey::new(-2, 0, 0), // equidistant pair in key order
                SectionKey::new(2, 0, 0),
                SectionKey::new(6, 0, 0),
            ]
        );
        let translucent: Vec<SectionKey> = set.translucent.iter().map(|d| d.key).collect();
        assert_eq!(
            translucent,
            vec![
                SectionKey::new(6, 0, 0),
                SectionKey::new(-2, 0, 0),
                SectionKey::new(2, 0, 0),
                SectionKey::new(0, 0, 1),
            ]
        );
    }

    #[test]
    fn block_entities_follow_the_near_first_order() {
        let mut reg = MeshRegistry::new(16, 16);
        let mut dev = NullDevice::new();
        let near = SectionKey::new(1, 0, 0);
        let far = SectionKey::new(5, 0, 0);
        for (i, &key) in [far, near].iter().enumerate() {
            reg.mark_preparing(key, 1 + i as u64);
            let mut r = result(key, 1 + i as u64, false);
            r.geometry.block_entities.push(BlockEntityHandle {
                key,
                local: (0, 0, 0),
                kind: BlockEntityKind::Sign,
            });
            reg.accept(r);
        }
        reg.pump(&mut dev);
        let set = collect_visible(&reg, Vec3::ZERO, &AlwaysVisible);
        let keys: Vec<SectionKey> = set.block_entities.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![near, far]);
    }

    #[test]
    fn unsorted_translucency_uses_coarse_buckets() {
        let mut reg = MeshRegistry::new(16, 16);
        let mut dev = NullDevice::new();
        // Two nearby far sections whose fine distances differ but whose
        // coarse buckets match; key order must decide.
        let a = SectionKey::new(40, 0, 0);
        let b = SectionKey::new(40, 0, 1);
        for (i, &key) in [a, b].iter().enumerate() {
            reg.mark_preparing(key, 1 + i as u64);
            let mut r = result(key, 1 + i as u64, true);
            r.geometry.details = DetailSet::ALL.without(DetailSet::SORT_TRANSLUCENT);
            reg.accept(r);
        }
        reg.pump(&mut dev);
        let set = collect_visible(&reg, Vec3::ZERO, &AlwaysVisible);
        let items: Vec<SectionKey> = set.translucent.iter().map(|d| d.key).collect();
        assert_eq!(items, vec![a, b]);
        assert_eq!(set.translucent[0].dist_sq, set.translucent[1].dist_sq);
    }

    #[test]
    fn radius_cull_drops_distant_sections() {
        let mut reg = MeshRegistry::new(16, 16);
        let mut dev = NullDevice::new();
        let near = SectionKey::new(0, 0, 0);
        let far = SectionKey::new(30, 0, 0);
        for (i, &key) in [near, far].iter().enumerate() {
            reg.mark_preparing(key, 1 + i as u64);
            reg.accept(result(key, 1 + i as u64, false));
        }
        reg.pump(&mut dev);
        let cull = RadiusCull {
            center: Vec3::ZERO,
            radius: 64.0,
        };
        let set = collect_visible(&reg, Vec3::ZERO, &cull);
        let keys: Vec<SectionKey> = set.opaque.iter().map(|d| d.key).collect();
        assert_eq!(keys, vec![near]);
    }
}
