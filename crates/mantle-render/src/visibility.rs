use mantle_geom::{Aabb, Vec3};
use mantle_mesh_cpu::{BlockEntityHandle, DetailSet};
use mantle_world::SectionKey;

use crate::device::MeshHandle;
use crate::registry::{LoadedMesh, MeshRegistry};

/// Spatial culling seam. The registry does not know about frustums or
/// occlusion; callers plug whatever structure they have.
pub trait VisibilityGraph {
    fn is_visible(&self, bbox: Aabb) -> bool;
}

/// No culling; headless tools and tests.
pub struct AlwaysVisible;

impl VisibilityGraph for AlwaysVisible {
    fn is_visible(&self, _bbox: Aabb) -> bool {
        true
    }
}

/// Crude sphere cull around the camera.
pub struct RadiusCull {
    pub center: Vec3,
    pub radius: f32,
}

impl VisibilityGraph for RadiusCull {
    fn is_visible(&self, bbox: Aabb) -> bool {
        !bbox.is_empty() && bbox.center().distance_sq(self.center) <= self.radius * self.radius
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DrawItem {
    pub key: SectionKey,
    pub handle: MeshHandle,
    pub dist_sq: f32,
}

/// One frame's draw lists. Opaque and overlay run front to back for
/// early-z; translucent runs back to front for blending.
#[derive(Default)]
pub struct VisibleSet {
    pub opaque: Vec<DrawItem>,
    pub translucent: Vec<DrawItem>,
    pub overlay: Vec<DrawItem>,
    /// Entities of visible sections, in the opaque lists' near-first order.
    pub block_entities: Vec<BlockEntityHandle>,
}

// Sections too far for per-frame translucency sorting get their sort key
// quantized to section-sized distance buckets so camera jitter cannot
// reorder them.
const SORT_BUCKET: f32 = 16.0;

pub fn collect_visible(
    registry: &MeshRegistry,
    camera: Vec3,
    graph: &dyn VisibilityGraph,
) -> VisibleSet {
    let mut set = VisibleSet::default();
    set.opaque.reserve(registry.loaded_count());
    let mut entities: Vec<(f32, SectionKey, &LoadedMesh)> = Vec::new();
    for mesh in registry.loaded() {
        if !graph.is_visible(mesh.bbox) {
            continue;
        }
        let dist_sq = mesh.bbox.center().distance_sq(camera);
        if !mesh.block_entities.is_empty() {
            entities.push((dist_sq, mesh.key, mesh));
        }
        if let Some(h) = mesh.opaque {
            set.opaque.push(DrawItem {
                key: mesh.key,
                handle: h,
                dist_sq,
            });
        }
        if let Some(h) = mesh.translucent {
            let dist_sq = if mesh.details.contains(DetailSet::SORT_TRANSLUCENT) {
                dist_sq
            } else {
                let bucket = (dist_sq.sqrt() / SORT_BUCKET).floor() * SORT_BUCKET;
                bucket * bucket
            };
            set.translucent.push(DrawItem {
                key: mesh.key,
                handle: h,
                dist_sq,
            });
        }
        if let Some(h) = mesh.overlay {
            set.overlay.push(DrawItem {
                key: mesh.key,
                handle: h,
                dist_sq,
            });
        }
    }
    // Key order breaks distance ties so draw order is stable across frames.
    set.opaque
        .sort_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq).then(a.key.cmp(&b.key)));
    set.overlay
        .sort_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq).then(a.key.cmp(&b.key)));
    set.translucent
        .sort_by(|a, b| b.dist_sq.total_cmp(&a.dist_sq).then(a.key.cmp(&b.key)));
    entities.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    for (_, _, mesh) in entities {
        set.block_entities.extend_from_slice(&mesh.block_entities);
    }
    set
}
