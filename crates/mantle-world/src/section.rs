use mantle_blocks::Block;

use crate::SectionKey;

/// Sections are fixed-size cubes.
pub const SECTION_SIZE: usize = 16;
pub const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;

/// Grid delta for a face index (PosY, NegY, PosX, NegX, PosZ, NegZ).
#[inline]
pub const fn face_delta(face: usize) -> (i32, i32, i32) {
    match face {
        0 => (0, 1, 0),
        1 => (0, -1, 0),
        2 => (1, 0, 0),
        3 => (-1, 0, 0),
        4 => (0, 0, 1),
        _ => (0, 0, -1),
    }
}

/// Block array for one section, linearized y-major like the chunk buffers
/// the meshers consume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionBuf {
    pub blocks: Vec<Block>,
}

impl SectionBuf {
    pub fn air() -> Self {
        Self {
            blocks: vec![Block::AIR; SECTION_VOLUME],
        }
    }

    pub fn filled(b: Block) -> Self {
        Self {
            blocks: vec![b; SECTION_VOLUME],
        }
    }

    #[inline]
    pub fn idx(x: usize, y: usize, z: usize) -> usize {
        (y * SECTION_SIZE + z) * SECTION_SIZE + x
    }

    #[inline]
    pub fn get_local(&self, x: usize, y: usize, z: usize) -> Block {
        self.blocks[Self::idx(x, y, z)]
    }

    #[inline]
    pub fn set_local(&mut self, x: usize, y: usize, z: usize, b: Block) {
        self.blocks[Self::idx(x, y, z)] = b;
    }

    #[inline]
    pub fn has_non_air(&self) -> bool {
        self.blocks.iter().any(|b| *b != Block::AIR)
    }
}

/// One border plane per face of the section, in face-index order. Planes
/// for unloaded-but-in-range-empty neighbours are all air.
#[derive(Clone, Debug)]
pub struct NeighbourBorders {
    planes: [Vec<Block>; 6],
}

impl NeighbourBorders {
    pub fn all_air() -> Self {
        Self {
            planes: std::array::from_fn(|_| vec![Block::AIR; SECTION_SIZE * SECTION_SIZE]),
        }
    }

    pub fn set_plane(&mut self, face: usize, plane: Vec<Block>) {
        debug_assert_eq!(plane.len(), SECTION_SIZE * SECTION_SIZE);
        self.planes[face] = plane;
    }

    /// Samples the neighbour block adjacent to local `(x, y, z)` through
    /// `face`. The two in-plane coordinates select the cell.
    #[inline]
    pub fn sample(&self, face: usize, x: usize, y: usize, z: usize) -> Block {
        let s = SECTION_SIZE;
        let idx = match face {
            0 | 1 => z * s + x,
            2 | 3 => y * s + z,
            _ => y * s + x,
        };
        self.planes[face][idx]
    }

    /// Extracts the border plane of `buf` that faces `face`'s opposite
    /// neighbour, i.e. the plane a neighbour on side `face` sees.
    pub fn extract_plane(buf: &SectionBuf, face: usize) -> Vec<Block> {
        let s = SECTION_SIZE;
        let mut plane = vec![Block::AIR; s * s];
        match face {
            // neighbour above sees our top layer, etc.
            0 => {
                for z in 0..s {
                    for x in 0..s {
                        plane[z * s + x] = buf.get_local(x, s - 1, z);
                    }
                }
            }
            1 => {
                for z in 0..s {
                    for x in 0..s {
                        plane[z * s + x] = buf.get_local(x, 0, z);
                    }
                }
            }
            2 => {
                for y in 0..s {
                    for z in 0..s {
                        plane[y * s + z] = buf.get_local(s - 1, y, z);
                    }
                }
            }
            3 => {
                for y in 0..s {
                    for z in 0..s {
                        plane[y * s + z] = buf.get_local(0, y, z);
                    }
                }
            }
            4 => {
                for y in 0..s {
                    for x in 0..s {
                        plane[y * s + x] = buf.get_local(x, y, s - 1);
                    }
                }
            }
            _ => {
                for y in 0..s {
                    for x in 0..s {
                        plane[y * s + x] = buf.get_local(x, y, 0);
                    }
                }
            }
        }
        plane
    }
}

/// Immutable point-in-time view of one section plus the six border planes
/// needed for cross-section culling. Captured once at task creation so a
/// build can never be torn by a concurrent edit.
#[derive(Clone, Debug)]
pub struct SectionSnapshot {
    pub key: SectionKey,
    pub buf: SectionBuf,
    pub borders: NeighbourBorders,
    /// Store revision at capture time, for diagnostics.
    pub rev: u64,
}

impl SectionSnapshot {
    /// Reads a block at local coordinates where exactly one axis may be one
    /// step out of range; out-of-range reads resolve through the captured
    /// border planes.
    #[inline]
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Block {
        let s = SECTION_SIZE as i32;
        if y >= s {
            return self.borders.sample(0, x as usize, 0, z as usize);
        }
        if y < 0 {
            return self.borders.sample(1, x as usize, 0, z as usize);
        }
        if x >= s {
            return self.borders.sample(2, 0, y as usize, z as usize);
        }
        if x < 0 {
            return self.borders.sample(3, 0, y as usize, z as usize);
        }
        if z >= s {
            return self.borders.sample(4, x as usize, y as usize, 0);
        }
        if z < 0 {
            return self.borders.sample(5, x as usize, y as usize, 0);
        }
        self.buf.get_local(x as usize, y as usize, z as usize)
    }
}
