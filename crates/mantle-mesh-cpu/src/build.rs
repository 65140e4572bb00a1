use std::sync::atomic::{AtomicBool, Ordering};

use mantle_blocks::{Block, BlockEntityKind, BlockRegistry, BlockType, MaterialId, RenderPass};
use mantle_geom::{Aabb, Vec3};
use mantle_world::{SECTION_SIZE, SectionKey, SectionSnapshot};

use crate::details::DetailSet;
use crate::face::{ALL_FACES, Face};

/// One vertex stream: interleavable arrays plus a per-quad material id for
/// the external atlas.
#[derive(Default, Clone, Debug)]
pub struct MeshBuild {
    pub pos: Vec<f32>,
    pub norm: Vec<f32>,
    pub uv: Vec<f32>,
    pub col: Vec<u8>,
    pub idx: Vec<u32>,
    pub mats: Vec<MaterialId>,
}

impl MeshBuild {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.mats.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_quad(
        &mut self,
        a: Vec3,
        b: Vec3,
        c: Vec3,
        d: Vec3,
        n: Vec3,
        u1: f32,
        v1: f32,
        rgba: [u8; 4],
        mid: MaterialId,
    ) {
        // 32-bit indices: even a section packed with always-rendered
        // blocks (4096 cells, 6 faces each) stays far below the limit.
        let base = (self.pos.len() / 3) as u32;
        let mut vs = [a, d, c, b];
        let mut uvs = [(0.0, 0.0), (0.0, v1), (u1, v1), (u1, 0.0)];
        // Flip the winding if the emitted quad faces away from its normal.
        let cross = (vs[1] - vs[0]).cross(vs[2] - vs[0]);
        if cross.dot(n) < 0.0 {
            vs.swap(1, 3);
            uvs.swap(1, 3);
        }
        for i in 0..4 {
            self.pos.extend_from_slice(&[vs[i].x, vs[i].y, vs[i].z]);
            self.norm.extend_from_slice(&[n.x, n.y, n.z]);
            self.uv.extend_from_slice(&[uvs[i].0, uvs[i].1]);
            self.col
                .extend_from_slice(&[rgba[0], rgba[1], rgba[2], rgba[3]]);
        }
        self.idx
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.mats.push(mid);
    }

    /// Emits the `face` side of the box `min..max`.
    pub fn add_box_face(
        &mut self,
        face: Face,
        min: Vec3,
        max: Vec3,
        rgba: [u8; 4],
        mid: MaterialId,
        uv_scale: f32,
    ) {
        const FACE_CORNERS: [[usize; 4]; 6] = [
            [0, 2, 6, 4], // PosY
            [5, 7, 3, 1], // NegY
            [6, 2, 3, 7], // PosX
            [0, 4, 5, 1], // NegX
            [4, 6, 7, 5], // PosZ
            [2, 0, 1, 3], // NegZ
        ];
        let corners = [
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(max.x, min.y, max.z),
        ];
        let (u1, v1) = match face {
            Face::PosY | Face::NegY => (max.x - min.x, max.z - min.z),
            Face::PosX | Face::NegX => (max.z - min.z, max.y - min.y),
            Face::PosZ | Face::NegZ => (max.x - min.x, max.y - min.y),
        };
        let ix = FACE_CORNERS[face.index()];
        self.add_quad(
            corners[ix[0]],
            corners[ix[1]],
            corners[ix[2]],
            corners[ix[3]],
            face.normal(),
            u1 * uv_scale,
            v1 * uv_scale,
            rgba,
            mid,
        );
    }
}

/// Renderer hand-off for a block entity (currently signs only).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEntityHandle {
    pub key: SectionKey,
    pub local: (u8, u8, u8),
    pub kind: BlockEntityKind,
}

/// Builder output for one section: the three pass streams, entity
/// hand-offs, a tight bounding box, and the detail set that produced it.
/// Empty streams are a valid result ("built, nothing to draw").
#[derive(Clone, Debug)]
pub struct BuiltGeometry {
    pub key: SectionKey,
    pub opaque: MeshBuild,
    pub translucent: MeshBuild,
    pub overlay: MeshBuild,
    pub block_entities: Vec<BlockEntityHandle>,
    pub bbox: Aabb,
    pub details: DetailSet,
}

impl BuiltGeometry {
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty()
            && self.translucent.is_empty()
            && self.overlay.is_empty()
            && self.block_entities.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.opaque.vertex_count() + self.translucent.vertex_count() + self.overlay.vertex_count()
    }
}

// Fluids hold their surface slightly below the block top while the
// fluid-heights detail is active.
const FLUID_SURFACE: f32 = 0.875;

/// Builds geometry for one section snapshot. Pure and reentrant: no GPU,
/// no shared mutable state. Returns None only when `cancel` was raised
/// mid-build (polled once per block layer); an all-air section still
/// produces an (empty) result.
pub fn build_section(
    reg: &BlockRegistry,
    snap: &SectionSnapshot,
    details: DetailSet,
    cancel: &AtomicBool,
) -> Option<BuiltGeometry> {
    let s = SECTION_SIZE;
    let (bx, by, bz) = snap.key.world_min();
    let base = Vec3::new(bx as f32, by as f32, bz as f32);

    let mut opaque = MeshBuild::default();
    let mut translucent = MeshBuild::default();
    let mut overlay = MeshBuild::default();
    let mut block_entities = Vec::new();
    let mut bbox: Option<Aabb> = None;

    let include = |bbox: &mut Option<Aabb>, min: Vec3, max: Vec3| match bbox {
        Some(bb) => {
            bb.expand(min);
            bb.expand(max);
        }
        None => {
            let mut bb = Aabb::point(min);
            bb.expand(max);
            *bbox = Some(bb);
        }
    };

    for z in 0..s {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        for y in 0..s {
            for x in 0..s {
                let b = snap.buf.get_local(x, y, z);
                if b.is_air() {
                    continue;
                }
                let Some(ty) = reg.get(b.id) else {
                    log::debug!("skipping unregistered block id {} at {:?}", b.id, snap.key);
                    continue;
                };

                if details.contains(DetailSet::ENTITIES) {
                    if let Some(kind) = ty.entity {
                        block_entities.push(BlockEntityHandle {
                            key: snap.key,
                            local: (x as u8, y as u8, z as u8),
                            kind,
                        });
                        let min = base + Vec3::new(x as f32, y as f32, z as f32);
                        include(&mut bbox, min, min + Vec3::new(1.0, 1.0, 1.0));
                    }
                }
                if details.contains(DetailSet::OVERLAY_TEXT)
                    && ty.entity == Some(BlockEntityKind::Sign)
                {
                    emit_sign_plate(&mut overlay, base, x, y, z, ty, details, &mut bbox);
                }

                let min = base + Vec3::new(x as f32, y as f32, z as f32);
                let top = if ty.fluid && details.contains(DetailSet::FLUID_HEIGHTS) {
                    FLUID_SURFACE
                } else {
                    1.0
                };
                let max = min + Vec3::new(1.0, top, 1.0);
                let uv_scale = if ty.fluid && details.contains(DetailSet::FLOWING_FLUID) {
                    0.5
                } else {
                    1.0
                };

                for face in ALL_FACES {
                    if !details.contains(DetailSet::side(face)) {
                        continue;
                    }
                    let (dx, dy, dz) = face.delta();
                    let nb = snap.block_at(x as i32 + dx, y as i32 + dy, z as i32 + dz);
                    if ty.fluid && nb.id == b.id {
                        continue; // fluid never faces itself
                    }
                    if !ty.always_render {
                        if let Some(nt) = reg.get(nb.id) {
                            if nt.occludes_from(face.opposite().index()) {
                                continue;
                            }
                        }
                    }
                    let shade = face_shade(reg, snap, details, x, y, z, face);
                    let rgba = [shade, shade, shade, 255];
                    let stream = match ty.pass {
                        RenderPass::Opaque => &mut opaque,
                        RenderPass::Translucent => &mut translucent,
                    };
                    stream.add_box_face(face, min, max, rgba, ty.material, uv_scale);
                    include(&mut bbox, min, max);
                }
            }
        }
    }

    Some(BuiltGeometry {
        key: snap.key,
        opaque,
        translucent,
        overlay,
        block_entities,
        bbox: bbox.unwrap_or_else(|| Aabb::point(base)),
        details,
    })
}

/// Cheap ambient occlusion: darken a face by the number of solid blocks
/// edge-adjacent to the cell the face looks into. Diagonal samples that
/// would leave the snapshot's one-block border are skipped.
fn face_shade(
    reg: &BlockRegistry,
    snap: &SectionSnapshot,
    details: DetailSet,
    x: usize,
    y: usize,
    z: usize,
    face: Face,
) -> u8 {
    if !details.contains(DetailSet::AMBIENT_OCCLUSION) {
        return 255;
    }
    let (dx, dy, dz) = face.delta();
    let (nx, ny, nz) = (x as i32 + dx, y as i32 + dy, z as i32 + dz);
    let offsets: [(i32, i32, i32); 4] = if dx != 0 {
        [(0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)]
    } else if dy != 0 {
        [(1, 0, 0), (-1, 0, 0), (0, 0, 1), (0, 0, -1)]
    } else {
        [(1, 0, 0), (-1, 0, 0), (0, 1, 0), (0, -1, 0)]
    };
    let mut occluders = 0u32;
    for (ox, oy, oz) in offsets {
        let (sx, sy, sz) = (nx + ox, ny + oy, nz + oz);
        if let Some(nb) = try_block(snap, sx, sy, sz) {
            if reg.get(nb.id).is_some_and(|t| t.solid) {
                occluders += 1;
            }
        }
    }
    255u8.saturating_sub((occluders * 18) as u8)
}

/// Reads a block when at most one axis leaves the section; the snapshot's
/// borders cannot answer diagonal (two-axis) reads.
fn try_block(snap: &SectionSnapshot, x: i32, y: i32, z: i32) -> Option<Block> {
    let s = SECTION_SIZE as i32;
    let out = [x, y, z].iter().filter(|&&c| c < 0 || c >= s).count();
    if out > 1 {
        return None;
    }
    Some(snap.block_at(x, y, z))
}

#[allow(clippy::too_many_arguments)]
fn emit_sign_plate(
    overlay: &mut MeshBuild,
    base: Vec3,
    x: usize,
    y: usize,
    z: usize,
    ty: &BlockType,
    details: DetailSet,
    bbox: &mut Option<Aabb>,
) {
    // Text plate floats just off the front face while the anti-moire
    // detail is active; coplanar otherwise.
    let lift = if details.contains(DetailSet::ANTI_MOIRE) {
        0.01
    } else {
        0.0
    };
    let fx = base.x + x as f32;
    let fy = base.y + y as f32;
    let fz = base.z + z as f32 + 0.51 + lift;
    let a = Vec3::new(fx + 0.1, fy + 0.35, fz);
    let b = Vec3::new(fx + 0.9, fy + 0.35, fz);
    let c = Vec3::new(fx + 0.9, fy + 0.85, fz);
    let d = Vec3::new(fx + 0.1, fy + 0.85, fz);
    overlay.add_quad(
        a,
        b,
        c,
        d,
        Face::PosZ.normal(),
        0.8,
        0.5,
        [255, 255, 255, 255],
        ty.material,
    );
    match bbox {
        Some(bb) => {
            bb.expand(a);
            bb.expand(c);
        }
        None => {
            let mut bb = Aabb::point(a);
            bb.expand(c);
            *bbox = Some(bb);
        }
    }
}
