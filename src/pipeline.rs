use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use mantle_blocks::{Block, BlockRegistry};
use mantle_geom::Vec3;
use mantle_mesh_cpu::DetailSet;
use mantle_render::{MeshRegistry, RenderDevice, VisibilityGraph, VisibleSet, collect_visible};
use mantle_runtime::SectionTaskScheduler;
use mantle_world::{ChunkPos, SECTION_SIZE, SectionKey, SectionStore};

use crate::config::PipelineConfig;
use crate::event::{Event, EventQueue, RebuildCause};

/// Per-frame pump summary, for the HUD and the logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub events: usize,
    pub results: usize,
    pub deferred: usize,
    pub queued: usize,
    pub inflight: usize,
}

/// Ties the store, the build scheduler, and the render-side registry
/// together. All methods run on the render thread; workers only ever see
/// immutable snapshots handed to them through the scheduler.
pub struct Pipeline {
    pub store: Arc<SectionStore>,
    reg: Arc<BlockRegistry>,
    sched: SectionTaskScheduler,
    pub meshes: MeshRegistry,
    events: EventQueue,
    camera_section: SectionKey,
    view_radius: u32,
    /// Detail set each tracked section was last submitted with.
    submitted_details: HashMap<SectionKey, DetailSet>,
    /// Sections waiting for neighbour chunks before they can build.
    deferred: HashSet<SectionKey>,
}

impl Pipeline {
    pub fn new(reg: Arc<BlockRegistry>, cfg: &PipelineConfig) -> Self {
        Self {
            store: Arc::new(SectionStore::new(cfg.section_lo, cfg.section_hi)),
            sched: SectionTaskScheduler::new(Arc::clone(&reg), cfg.workers),
            reg,
            meshes: MeshRegistry::new(cfg.upload_budget, cfg.free_budget),
            events: EventQueue::new(),
            camera_section: SectionKey::new(0, 0, 0),
            view_radius: cfg.view_radius,
            submitted_details: HashMap::new(),
            deferred: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.reg
    }

    /// Announces that `chunk`'s sections are present in the store.
    pub fn chunk_loaded(&mut self, chunk: ChunkPos) {
        self.events.emit_now(Event::ChunkLoaded { chunk });
    }

    pub fn request_unload(&mut self, chunk: ChunkPos) {
        self.events.emit_now(Event::ChunkUnloadRequested { chunk });
    }

    pub fn set_camera_section(&mut self, section: SectionKey) {
        if section != self.camera_section {
            self.events.emit_now(Event::CameraSectionChanged { section });
        }
    }

    pub fn set_view_radius(&mut self, radius: u32) {
        self.events.emit_now(Event::ViewRadiusChanged { radius });
    }

    pub fn camera_section(&self) -> SectionKey {
        self.camera_section
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_quiescent(&self) -> bool {
        self.sched.is_idle() && self.events.pending() == 0 && self.meshes.pending_uploads() == 0
    }

    /// Writes one block and queues rebuilds for the section and any
    /// neighbour sections that share the touched border.
    pub fn edit_block(&mut self, key: SectionKey, x: usize, y: usize, z: usize, b: Block) {
        if self.store.set_block(key, x, y, z, b).is_none() {
            log::warn!("edit against unloaded section {:?}", key);
            return;
        }
        self.events.emit_now(Event::SectionChanged {
            key,
            cause: RebuildCause::Edit,
        });
        let hi = SECTION_SIZE - 1;
        let touched: [(bool, (i32, i32, i32)); 6] = [
            (y == hi, (0, 1, 0)),
            (y == 0, (0, -1, 0)),
            (x == hi, (1, 0, 0)),
            (x == 0, (-1, 0, 0)),
            (z == hi, (0, 0, 1)),
            (z == 0, (0, 0, -1)),
        ];
        for (on_border, (dx, dy, dz)) in touched {
            if !on_border {
                continue;
            }
            let nb = key.offset(dx, dy, dz);
            if self.store.contains(nb) {
                self.events.emit_now(Event::SectionChanged {
                    key: nb,
                    cause: RebuildCause::Edit,
                });
            }
        }
    }

    /// Runs one frame: drains due events, collects finished builds, and
    /// lets the registry do its budgeted GPU work on `device`.
    pub fn pump(&mut self, device: &mut dyn RenderDevice) -> FrameStats {
        let mut events = 0;
        while let Some(env) = self.events.pop_ready() {
            events += 1;
            self.handle(env.kind);
        }
        self.events.advance_tick();

        let results = self.sched.drain_results();
        let nresults = results.len();
        for r in results {
            self.meshes.accept(r);
        }
        for f in self.sched.drain_failures() {
            self.meshes.mark_failed(f.key, f.generation);
        }
        self.meshes.pump(device);

        FrameStats {
            events,
            results: nresults,
            deferred: self.deferred.len(),
            queued: self.sched.queued(),
            inflight: self.sched.inflight(),
        }
    }

    pub fn visible(&self, camera: Vec3, graph: &dyn VisibilityGraph) -> VisibleSet {
        collect_visible(&self.meshes, camera, graph)
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Tick => {}
            Event::SectionChanged { key, cause } => self.try_submit(key, cause),
            Event::ChunkLoaded { chunk } => self.on_chunk_loaded(chunk),
            Event::ChunkUnloadRequested { chunk } => self.on_chunk_unloaded(chunk),
            Event::CameraSectionChanged { section } => self.on_camera_moved(section),
            Event::ViewRadiusChanged { radius } => self.on_radius_changed(radius),
        }
    }

    fn try_submit(&mut self, key: SectionKey, cause: RebuildCause) {
        match self.store.snapshot(key) {
            Some(snap) => {
                let details = DetailSet::select(key, self.camera_section);
                let distance = key.chebyshev(self.camera_section);
                let generation = self.sched.submit(snap, details, distance);
                self.meshes.mark_preparing(key, generation);
                self.submitted_details.insert(key, details);
                self.deferred.remove(&key);
                log::trace!(
                    "submitted {:?} gen {} dist {} ({:?})",
                    key,
                    generation,
                    distance,
                    cause
                );
            }
            None => {
                if self.store.contains(key) {
                    self.deferred.insert(key);
                    log::debug!("deferred {:?} ({:?}): neighbour chunks missing", key, cause);
                }
            }
        }
    }

    fn on_chunk_loaded(&mut self, chunk: ChunkPos) {
        for key in self.store.section_keys_of(chunk) {
            self.try_submit(key, RebuildCause::ChunkLoad);
        }
        // Sections that were waiting on this chunk can try again.
        for key in self.deferred.iter().copied().collect::<Vec<_>>() {
            if self.store.missing_neighbours(key).is_empty() {
                self.events.emit_now(Event::SectionChanged {
                    key,
                    cause: RebuildCause::NeighbourLoaded,
                });
            }
        }
        // Already-built neighbours rebuild to pick up the fresh border.
        for (dx, dz) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let nb = chunk.offset(dx, dz);
            if !self.store.chunk_loaded(nb) {
                continue;
            }
            for key in self.store.section_keys_of(nb) {
                if self.submitted_details.contains_key(&key) {
                    self.events.emit_now(Event::SectionChanged {
                        key,
                        cause: RebuildCause::NeighbourLoaded,
                    });
                }
            }
        }
    }

    fn on_chunk_unloaded(&mut self, chunk: ChunkPos) {
        let keys = self.store.remove_chunk(chunk);
        self.sched.cancel_chunk(chunk);
        for key in &keys {
            self.submitted_details.remove(key);
            self.deferred.remove(key);
        }
        let removed = self.meshes.remove_chunk(chunk);
        log::debug!(
            "unloaded chunk {:?}: {} sections, {} meshes",
            chunk,
            keys.len(),
            removed
        );
    }

    fn on_camera_moved(&mut self, section: SectionKey) {
        self.camera_section = section;
        let mut changed = Vec::new();
        for (&key, &details) in &self.submitted_details {
            if DetailSet::select(key, section) != details {
                changed.push(key);
            }
        }
        for key in changed {
            self.events.emit_now(Event::SectionChanged {
                key,
                cause: RebuildCause::DetailChanged,
            });
        }
    }

    fn on_radius_changed(&mut self, radius: u32) {
        self.view_radius = radius;
        let cam = self.camera_section.chunk;
        let mut out_of_range: Vec<ChunkPos> = self
            .submitted_details
            .keys()
            .map(|k| k.chunk)
            .filter(|c| {
                (c.x - cam.x)
                    .unsigned_abs()
                    .max((c.z - cam.z).unsigned_abs())
                    > self.view_radius
            })
            .collect();
        out_of_range.sort();
        out_of_range.dedup();
        for chunk in out_of_range {
            self.events.emit_now(Event::ChunkUnloadRequested { chunk });
        }
    }
}
