//! Section keys, block buffers, and the world-side section store the mesh
//! pipeline consumes. The store is the external collaborator boundary: the
//! pipeline only ever reads immutable snapshots captured here.
#![forbid(unsafe_code)]

mod section;
mod store;
mod worldgen;

pub use worldgen::generate_chunk;
pub use section::{
    NeighbourBorders, SECTION_SIZE, SECTION_VOLUME, SectionBuf, SectionSnapshot, face_delta,
};
pub use store::SectionStore;

use serde::{Deserialize, Serialize};

/// Horizontal chunk column position.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }
}

/// Identity of one cubic section: chunk column plus section height index.
/// `Ord` is lexicographic and used as the deterministic scheduler tie-break.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SectionKey {
    pub chunk: ChunkPos,
    pub y: i32,
}

impl SectionKey {
    #[inline]
    pub const fn new(cx: i32, y: i32, cz: i32) -> Self {
        Self {
            chunk: ChunkPos::new(cx, cz),
            y,
        }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            chunk: self.chunk.offset(dx, dz),
            y: self.y + dy,
        }
    }

    /// World-space block coordinate of the section's minimum corner.
    #[inline]
    pub fn world_min(self) -> (i32, i32, i32) {
        let s = SECTION_SIZE as i32;
        (self.chunk.x * s, self.y * s, self.chunk.z * s)
    }

    /// Chebyshev distance in section units; the pipeline's LOD metric.
    #[inline]
    pub fn chebyshev(self, other: SectionKey) -> u32 {
        let dx = (self.chunk.x - other.chunk.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        let dz = (self.chunk.z - other.chunk.z).unsigned_abs();
        dx.max(dy).max(dz)
    }
}
