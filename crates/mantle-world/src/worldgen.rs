use fastnoise_lite::{FastNoiseLite, NoiseType};
use mantle_blocks::{Block, BlockRegistry};

use crate::section::{SECTION_SIZE, SectionBuf};
use crate::store::SectionStore;
use crate::{ChunkPos, SectionKey};

/// Generates a simple noise-driven terrain column for demos and
/// integration tests and inserts its sections into the store. Returns the
/// keys of the inserted (non-empty) sections.
pub fn generate_chunk(
    store: &SectionStore,
    reg: &BlockRegistry,
    chunk: ChunkPos,
    seed: i32,
) -> Vec<SectionKey> {
    let stone = reg.make_block("stone").unwrap_or(Block::AIR);
    let grass = reg.make_block("grass").unwrap_or(stone);
    let water = reg.make_block("water").unwrap_or(Block::AIR);
    let sign = reg.make_block("sign").unwrap_or(Block::AIR);

    let mut noise = FastNoiseLite::with_seed(seed);
    noise.set_noise_type(Some(NoiseType::OpenSimplex2));
    noise.set_frequency(Some(0.015));

    let s = SECTION_SIZE;
    let (lo, hi) = store.section_range();
    let world_top = (hi + 1) * s as i32;
    let sea_level = world_top / 3;

    let base_x = chunk.x * s as i32;
    let base_z = chunk.z * s as i32;

    let mut heights = [[0i32; SECTION_SIZE]; SECTION_SIZE];
    for (zi, row) in heights.iter_mut().enumerate() {
        for (xi, h) in row.iter_mut().enumerate() {
            let wx = base_x + xi as i32;
            let wz = base_z + zi as i32;
            let n = noise.get_noise_2d(wx as f32, wz as f32); // [-1, 1]
            *h = sea_level + (n * (world_top as f32 * 0.25)) as i32;
        }
    }

    let mut inserted = Vec::new();
    for sy in lo..=hi {
        let base_y = sy * s as i32;
        let mut buf = SectionBuf::air();
        let mut non_air = false;
        for z in 0..s {
            for x in 0..s {
                let h = heights[z][x];
                for y in 0..s {
                    let wy = base_y + y as i32;
                    let b = if wy < h {
                        stone
                    } else if wy == h {
                        if h <= sea_level { stone } else { grass }
                    } else if wy <= sea_level {
                        water
                    } else if wy == h + 1 && !sign.is_air() && marker_here(base_x + x as i32, base_z + z as i32) && h > sea_level
                    {
                        sign
                    } else {
                        Block::AIR
                    };
                    if !b.is_air() {
                        buf.set_local(x, y, z, b);
                        non_air = true;
                    }
                }
            }
        }
        if non_air {
            let key = SectionKey { chunk, y: sy };
            store.insert_section(key, buf);
            inserted.push(key);
        }
    }
    store.mark_chunk_loaded(chunk);
    inserted
}

// Sparse deterministic sign placement so overlay/entity paths get exercised.
#[inline]
fn marker_here(wx: i32, wz: i32) -> bool {
    (wx.wrapping_mul(31) ^ wz.wrapping_mul(17)).rem_euclid(97) == 0
}
