use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;

use mantle_mesh_cpu::DetailSet;
use mantle_world::{ChunkPos, SectionKey, SectionSnapshot};

pub(crate) struct QueuedBuild {
    pub key: SectionKey,
    pub snapshot: SectionSnapshot,
    pub details: DetailSet,
    pub generation: u64,
    pub distance: u32,
    pub cancel: Arc<AtomicBool>,
}

/// Pending builds ordered by distance, then key, so dispatch is
/// deterministic under equal priorities. Holds at most one queued entry
/// per key; a resubmission replaces the queued entry and flags any build
/// of that key already running.
#[derive(Default)]
pub(crate) struct PendingQueue {
    queue: BTreeMap<(u32, SectionKey), QueuedBuild>,
    queued_at: HashMap<SectionKey, (u32, SectionKey)>,
    running: HashMap<SectionKey, Arc<AtomicBool>>,
}

impl PendingQueue {
    /// Enqueues a build. Returns true when an older queued entry for the
    /// same key was replaced (the queue length did not change).
    pub fn push(
        &mut self,
        key: SectionKey,
        snapshot: SectionSnapshot,
        details: DetailSet,
        distance: u32,
        generation: u64,
    ) -> bool {
        if let Some(flag) = self.running.get(&key) {
            flag.store(true, Ordering::Relaxed);
        }
        let replaced = match self.queued_at.remove(&key) {
            Some(old) => self.queue.remove(&old).is_some(),
            None => false,
        };
        let slot = (distance, key);
        self.queue.insert(
            slot,
            QueuedBuild {
                key,
                snapshot,
                details,
                generation,
                distance,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        self.queued_at.insert(key, slot);
        replaced
    }

    /// Takes the highest-priority build whose key is not already running.
    pub fn pop(&mut self) -> Option<QueuedBuild> {
        let slot = self
            .queue
            .keys()
            .copied()
            .find(|(_, key)| !self.running.contains_key(key))?;
        let task = self.queue.remove(&slot)?;
        self.queued_at.remove(&task.key);
        self.running.insert(task.key, Arc::clone(&task.cancel));
        Some(task)
    }

    /// Marks a running build finished so a queued successor can dispatch.
    pub fn complete(&mut self, key: SectionKey) {
        self.running.remove(&key);
    }

    /// Cancels every build belonging to `chunk`; returns how many queued
    /// entries were dropped.
    pub fn cancel_chunk(&mut self, chunk: ChunkPos) -> usize {
        let keys: Vec<SectionKey> = self
            .queued_at
            .keys()
            .chain(self.running.keys())
            .filter(|k| k.chunk == chunk)
            .copied()
            .collect();
        let mut dropped = 0;
        for key in keys {
            if self.cancel(key) {
                dropped += 1;
            }
        }
        dropped
    }

    /// Drops any queued build and flags any running build for `key`.
    /// Returns true when a queued entry was removed.
    pub fn cancel(&mut self, key: SectionKey) -> bool {
        if let Some(flag) = self.running.get(&key) {
            flag.store(true, Ordering::Relaxed);
        }
        match self.queued_at.remove(&key) {
            Some(slot) => self.queue.remove(&slot).is_some(),
            None => false,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantle_world::{NeighbourBorders, SectionBuf, SectionSnapshot};

    fn snap(key: SectionKey) -> SectionSnapshot {
        SectionSnapshot {
            key,
            buf: SectionBuf::air(),
            borders: NeighbourBorders::all_air(),
            rev: 1,
        }
    }

    #[test]
    fn pops_closest_first_then_key_order() {
        let mut q = PendingQueue::default();
        let far = SectionKey::new(9, 0, 0);
        let near_a = SectionKey::new(0, 0, 1);
        let near_b = SectionKey::new(0, 1, 0);
        q.push(far, snap(far), DetailSet::ALL, 9, 1);
        q.push(near_a, snap(near_a), DetailSet::ALL, 1, 2);
        q.push(near_b, snap(near_b), DetailSet::ALL, 1, 3);
        // near_b sorts before near_a: its chunk compares lower.
        assert_eq!(q.pop().unwrap().key, near_b);
        assert_eq!(q.pop().unwrap().key, near_a);
        assert_eq!(q.pop().unwrap().key, far);
        assert!(q.pop().is_none());
    }

    #[test]
    fn resubmission_replaces_the_queued_entry() {
        let mut q = PendingQueue::default();
        let k = SectionKey::new(0, 0, 0);
        assert!(!q.push(k, snap(k), DetailSet::ALL, 5, 1));
        assert!(q.push(k, snap(k), DetailSet::ALL, 2, 2));
        assert_eq!(q.queued_len(), 1);
        let got = q.pop().unwrap();
        assert_eq!(got.generation, 2);
        assert_eq!(got.distance, 2);
    }

    #[test]
    fn pop_skips_keys_with_a_running_build() {
        let mut q = PendingQueue::default();
        let k = SectionKey::new(0, 0, 0);
        let other = SectionKey::new(1, 0, 0);
        q.push(k, snap(k), DetailSet::ALL, 0, 1);
        let first = q.pop().unwrap();
        assert_eq!(first.key, k);

        // A successor for the same key queues but cannot dispatch yet.
        q.push(k, snap(k), DetailSet::ALL, 0, 2);
        assert!(first.cancel.load(Ordering::Relaxed));
        q.push(other, snap(other), DetailSet::ALL, 9, 3);
        assert_eq!(q.pop().unwrap().key, other);
        assert!(q.pop().is_none());

        q.complete(k);
        assert_eq!(q.pop().unwrap().generation, 2);
    }

    #[test]
    fn cancel_chunk_sweeps_queued_and_running_sections() {
        let mut q = PendingQueue::default();
        let a = SectionKey::new(2, 0, 2);
        let b = SectionKey::new(2, 1, 2);
        let other = SectionKey::new(0, 0, 0);
        q.push(a, snap(a), DetailSet::ALL, 0, 1);
        q.push(b, snap(b), DetailSet::ALL, 0, 2);
        q.push(other, snap(other), DetailSet::ALL, 5, 3);
        let running = q.pop().unwrap();
        assert_eq!(running.key, a);

        assert_eq!(q.cancel_chunk(ChunkPos::new(2, 2)), 1);
        assert!(running.cancel.load(Ordering::Relaxed));
        assert_eq!(q.queued_len(), 1);
        assert_eq!(q.pop().unwrap().key, other);
    }

    #[test]
    fn cancel_drops_queued_and_flags_running() {
        let mut q = PendingQueue::default();
        let k = SectionKey::new(0, 0, 0);
        q.push(k, snap(k), DetailSet::ALL, 0, 1);
        let running = q.pop().unwrap();
        q.push(k, snap(k), DetailSet::ALL, 0, 2);
        assert!(q.cancel(k));
        assert!(running.cancel.load(Ordering::Relaxed));
        assert_eq!(q.queued_len(), 0);
        assert!(!q.cancel(k));
    }
}
