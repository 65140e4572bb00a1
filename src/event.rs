use std::collections::{BTreeMap, VecDeque};

use mantle_world::{ChunkPos, SectionKey};

/// Why a section rebuild was requested; carried for logging and so
/// deferred rebuilds can be traced back to their trigger.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RebuildCause {
    Edit,
    ChunkLoad,
    NeighbourLoaded,
    DetailChanged,
}

pub enum Event {
    Tick,

    /// Section content changed; a rebuild should be scheduled.
    SectionChanged { key: SectionKey, cause: RebuildCause },

    /// A chunk column finished loading into the store.
    ChunkLoaded { chunk: ChunkPos },
    /// A chunk column should be torn down.
    ChunkUnloadRequested { chunk: ChunkPos },

    /// The camera crossed into a different section.
    CameraSectionChanged { section: SectionKey },
    ViewRadiusChanged { radius: u32 },
}

pub struct EventEnvelope {
    pub id: u64,
    pub tick: u64,
    pub kind: Event,
}

/// Tick-bucketed FIFO event queue. Events emitted for a future tick stay
/// buried until `advance_tick` reaches them.
pub struct EventQueue {
    by_tick: BTreeMap<u64, VecDeque<EventEnvelope>>,
    pub now: u64,
    next_id: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            by_tick: BTreeMap::new(),
            now: 0,
            next_id: 1,
        }
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub fn emit_now(&mut self, kind: Event) -> u64 {
        self.emit_at(self.now, kind)
    }

    pub fn emit_at(&mut self, tick: u64, kind: Event) -> u64 {
        let id = self.alloc_id();
        let env = EventEnvelope { id, tick, kind };
        self.by_tick.entry(tick).or_default().push_back(env);
        id
    }

    pub fn emit_after(&mut self, delta: u64, kind: Event) -> u64 {
        self.emit_at(self.now + delta, kind)
    }

    pub fn pop_ready(&mut self) -> Option<EventEnvelope> {
        self.by_tick.get_mut(&self.now)?.pop_front()
    }

    pub fn advance_tick(&mut self) {
        if let Some(q) = self.by_tick.get(&self.now) {
            if q.is_empty() {
                self.by_tick.remove(&self.now);
            }
        }
        self.now += 1;
    }

    pub fn pending(&self) -> usize {
        self.by_tick.values().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_events_stay_buried_until_their_tick() {
        let mut q = EventQueue::new();
        q.emit_now(Event::Tick);
        q.emit_after(2, Event::ViewRadiusChanged { radius: 4 });
        assert!(matches!(q.pop_ready().map(|e| e.kind), Some(Event::Tick)));
        assert!(q.pop_ready().is_none());
        q.advance_tick();
        assert!(q.pop_ready().is_none());
        q.advance_tick();
        assert!(matches!(
            q.pop_ready().map(|e| e.kind),
            Some(Event::ViewRadiusChanged { radius: 4 })
        ));
    }

    #[test]
    fn ids_are_unique_and_ordering_is_fifo() {
        let mut q = EventQueue::new();
        let a = q.emit_now(Event::Tick);
        let b = q.emit_now(Event::Tick);
        assert_ne!(a, b);
        assert_eq!(q.pop_ready().map(|e| e.id), Some(a));
        assert_eq!(q.pop_ready().map(|e| e.id), Some(b));
    }
}
