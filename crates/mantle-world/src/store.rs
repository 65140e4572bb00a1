use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use mantle_blocks::Block;

use crate::section::{NeighbourBorders, SectionBuf, SectionSnapshot, face_delta};
use crate::{ChunkPos, SectionKey};

struct SectionEntry {
    buf: SectionBuf,
    rev: u64,
}

struct StoreInner {
    sections: HashMap<SectionKey, SectionEntry>,
    loaded_chunks: HashSet<ChunkPos>,
}

/// Authoritative (pipeline-external) section storage. The pipeline reads
/// immutable snapshots and per-section revisions; edits bump the revision.
pub struct SectionStore {
    inner: RwLock<StoreInner>,
    /// Inclusive vertical section range of the world. Neighbours outside
    /// the range count as air rather than "not yet loaded".
    section_lo: i32,
    section_hi: i32,
}

impl SectionStore {
    pub fn new(section_lo: i32, section_hi: i32) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                sections: HashMap::new(),
                loaded_chunks: HashSet::new(),
            }),
            section_lo,
            section_hi,
        }
    }

    #[inline]
    pub fn section_range(&self) -> (i32, i32) {
        (self.section_lo, self.section_hi)
    }

    #[inline]
    fn in_range(&self, y: i32) -> bool {
        y >= self.section_lo && y <= self.section_hi
    }

    pub fn insert_section(&self, key: SectionKey, buf: SectionBuf) -> u64 {
        let mut inner = self.inner.write().expect("section store poisoned");
        inner.loaded_chunks.insert(key.chunk);
        let entry = inner.sections.entry(key).or_insert(SectionEntry {
            buf: SectionBuf::air(),
            rev: 0,
        });
        entry.buf = buf;
        entry.rev += 1;
        entry.rev
    }

    /// Marks a chunk loaded even when it contributed no sections, so empty
    /// columns do not block neighbour gating forever.
    pub fn mark_chunk_loaded(&self, chunk: ChunkPos) {
        let mut inner = self.inner.write().expect("section store poisoned");
        inner.loaded_chunks.insert(chunk);
    }

    /// Applies one block edit; returns the section's new revision, or None
    /// when the section is not loaded.
    pub fn set_block(&self, key: SectionKey, x: usize, y: usize, z: usize, b: Block) -> Option<u64> {
        let mut inner = self.inner.write().expect("section store poisoned");
        let entry = inner.sections.get_mut(&key)?;
        entry.buf.set_local(x, y, z, b);
        entry.rev += 1;
        Some(entry.rev)
    }

    pub fn rev(&self, key: SectionKey) -> Option<u64> {
        let inner = self.inner.read().expect("section store poisoned");
        inner.sections.get(&key).map(|e| e.rev)
    }

    pub fn contains(&self, key: SectionKey) -> bool {
        let inner = self.inner.read().expect("section store poisoned");
        inner.sections.contains_key(&key)
    }

    pub fn chunk_loaded(&self, chunk: ChunkPos) -> bool {
        let inner = self.inner.read().expect("section store poisoned");
        inner.loaded_chunks.contains(&chunk)
    }

    pub fn section_keys_of(&self, chunk: ChunkPos) -> Vec<SectionKey> {
        let inner = self.inner.read().expect("section store poisoned");
        let mut keys: Vec<SectionKey> = inner
            .sections
            .keys()
            .filter(|k| k.chunk == chunk)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn loaded_section_count(&self) -> usize {
        let inner = self.inner.read().expect("section store poisoned");
        inner.sections.len()
    }

    /// Drops every section of a chunk; returns the removed keys so the
    /// pipeline can cancel and free them.
    pub fn remove_chunk(&self, chunk: ChunkPos) -> Vec<SectionKey> {
        let mut inner = self.inner.write().expect("section store poisoned");
        inner.loaded_chunks.remove(&chunk);
        let keys: Vec<SectionKey> = inner
            .sections
            .keys()
            .filter(|k| k.chunk == chunk)
            .copied()
            .collect();
        for k in &keys {
            inner.sections.remove(k);
        }
        keys
    }

    /// The horizontal neighbour chunks that must load before `key` can be
    /// snapshotted. Empty means the snapshot is ready.
    pub fn missing_neighbours(&self, key: SectionKey) -> Vec<ChunkPos> {
        let inner = self.inner.read().expect("section store poisoned");
        let mut missing = Vec::new();
        for (dx, dz) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            let c = key.chunk.offset(dx, dz);
            if !inner.loaded_chunks.contains(&c) {
                missing.push(c);
            }
        }
        missing
    }

    /// Captures an immutable snapshot of `key` plus neighbour border
    /// planes. Returns None when the section itself is unloaded or when a
    /// horizontal neighbour chunk has not arrived yet (the caller defers;
    /// see `missing_neighbours`). A loaded neighbour chunk with no section
    /// at the required height contributes an air plane.
    pub fn snapshot(&self, key: SectionKey) -> Option<SectionSnapshot> {
        let inner = self.inner.read().expect("section store poisoned");
        let entry = inner.sections.get(&key)?;

        let mut borders = NeighbourBorders::all_air();
        for face in 0..6 {
            let (dx, dy, dz) = face_delta(face);
            let nkey = key.offset(dx, dy, dz);
            if dy != 0 && !self.in_range(nkey.y) {
                continue; // outside the world: air
            }
            if dy == 0 && !inner.loaded_chunks.contains(&nkey.chunk) {
                return None; // neighbour chunk not loaded: defer
            }
            if let Some(n) = inner.sections.get(&nkey) {
                // The neighbour's plane facing us is its opposite-face plane.
                borders.set_plane(face, NeighbourBorders::extract_plane(&n.buf, face ^ 1));
            }
        }

        Some(SectionSnapshot {
            key,
            buf: entry.buf.clone(),
            borders,
            rev: entry.rev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_section(id: u16) -> SectionBuf {
        SectionBuf::filled(Block::new(id))
    }

    #[test]
    fn snapshot_defers_until_neighbour_chunks_load() {
        let store = SectionStore::new(0, 3);
        let key = SectionKey::new(0, 1, 0);
        store.insert_section(key, filled_section(1));
        assert!(store.snapshot(key).is_none());
        assert_eq!(store.missing_neighbours(key).len(), 4);

        for (dx, dz) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            store.mark_chunk_loaded(ChunkPos::new(dx, dz));
        }
        assert!(store.missing_neighbours(key).is_empty());
        let snap = store.snapshot(key).expect("all neighbours loaded");
        // Vertical neighbours are absent but their chunk is ours: air.
        assert_eq!(snap.block_at(0, -1, 0), Block::AIR);
    }

    #[test]
    fn snapshot_captures_neighbour_planes() {
        let store = SectionStore::new(0, 3);
        let key = SectionKey::new(0, 1, 0);
        store.insert_section(key, filled_section(1));
        store.insert_section(key.offset(0, 1, 0), filled_section(2));
        for (dx, dz) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            store.mark_chunk_loaded(ChunkPos::new(dx, dz));
        }
        let snap = store.snapshot(key).unwrap();
        assert_eq!(snap.block_at(3, SECTION_SIZE_I, 3), Block::new(2));
    }

    #[test]
    fn edits_bump_revision() {
        let store = SectionStore::new(0, 0);
        let key = SectionKey::new(0, 0, 0);
        let r1 = store.insert_section(key, SectionBuf::air());
        let r2 = store.set_block(key, 1, 2, 3, Block::new(5)).unwrap();
        assert!(r2 > r1);
        assert_eq!(store.rev(key), Some(r2));
    }

    #[test]
    fn remove_chunk_drops_all_sections() {
        let store = SectionStore::new(0, 3);
        let chunk = ChunkPos::new(2, -1);
        for y in 0..=3 {
            store.insert_section(SectionKey { chunk, y }, SectionBuf::air());
        }
        let removed = store.remove_chunk(chunk);
        assert_eq!(removed.len(), 4);
        assert!(!store.chunk_loaded(chunk));
        assert_eq!(store.loaded_section_count(), 0);
    }

    const SECTION_SIZE_I: i32 = crate::SECTION_SIZE as i32;
}
