use std::collections::VecDeque;

use hashbrown::HashMap;

use mantle_geom::Aabb;
use mantle_mesh_cpu::{BlockEntityHandle, BuiltGeometry, DetailSet};
use mantle_runtime::BuildResult;
use mantle_world::{ChunkPos, SectionKey};

use crate::device::{MeshHandle, RenderDevice};

/// Lifecycle of a section's renderable mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshState {
    /// A build was submitted and nothing is installed yet.
    Preparing,
    Loaded,
    Unloaded,
}

/// Installed GPU meshes for one section.
pub struct LoadedMesh {
    pub key: SectionKey,
    pub generation: u64,
    pub details: DetailSet,
    pub bbox: Aabb,
    pub opaque: Option<MeshHandle>,
    pub translucent: Option<MeshHandle>,
    pub overlay: Option<MeshHandle>,
    pub block_entities: Vec<BlockEntityHandle>,
}

struct Entry {
    epoch: u64,
    /// First generation submitted in this load of the section; results
    /// minted before it belong to a previous load and are dropped.
    min_generation: u64,
    /// Newest generation submitted; failures older than this do not
    /// clear the pending flag.
    submitted_generation: u64,
    installed_generation: u64,
    pending: bool,
    loaded: Option<LoadedMesh>,
}

struct PendingUpload {
    key: SectionKey,
    generation: u64,
    epoch: u64,
    geometry: BuiltGeometry,
}

#[derive(Default, Clone, Copy, Debug)]
pub struct RegistryStats {
    pub uploads: usize,
    pub frees: usize,
    pub stale_discards: usize,
    pub upload_retries: usize,
}

/// Render-thread owner of every installed section mesh. Not shared
/// across threads; GPU work only happens inside [`MeshRegistry::pump`],
/// which the render loop calls once per frame with bounded budgets so a
/// burst of finished builds cannot stall a frame.
pub struct MeshRegistry {
    entries: HashMap<SectionKey, Entry>,
    epochs: HashMap<SectionKey, u64>,
    uploads: VecDeque<PendingUpload>,
    frees: VecDeque<MeshHandle>,
    upload_budget: usize,
    free_budget: usize,
    pub stats: RegistryStats,
}

impl MeshRegistry {
    pub fn new(upload_budget: usize, free_budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            epochs: HashMap::new(),
            uploads: VecDeque::new(),
            frees: VecDeque::new(),
            upload_budget: upload_budget.max(1),
            free_budget: free_budget.max(1),
            stats: RegistryStats::default(),
        }
    }

    /// Records that a build was submitted for `key`.
    pub fn mark_preparing(&mut self, key: SectionKey, generation: u64) {
        let epoch = self.epochs.get(&key).copied().unwrap_or(0);
        let entry = self.entries.entry(key).or_insert(Entry {
            epoch,
            min_generation: generation,
            submitted_generation: 0,
            installed_generation: 0,
            pending: false,
            loaded: None,
        });
        entry.pending = true;
        entry.submitted_generation = entry.submitted_generation.max(generation);
    }

    /// Records that the build for `generation` died without a result, so
    /// the section stops reporting as in progress. A failure from a
    /// superseded build leaves a newer pending one alone.
    pub fn mark_failed(&mut self, key: SectionKey, generation: u64) {
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.pending && generation >= entry.submitted_generation {
                entry.pending = false;
            }
        }
    }

    /// Accepts a finished build for later upload. Results for sections
    /// unloaded since submission, or minted before the section's current
    /// load, are dropped here.
    pub fn accept(&mut self, result: BuildResult) {
        let Some(entry) = self.entries.get(&result.key) else {
            self.stats.stale_discards += 1;
            return;
        };
        if result.generation < entry.min_generation
            || result.generation <= entry.installed_generation
        {
            self.stats.stale_discards += 1;
            return;
        }
        self.uploads.push_back(PendingUpload {
            key: result.key,
            generation: result.generation,
            epoch: entry.epoch,
            geometry: result.geometry,
        });
    }

    /// Runs this frame's bounded upload and free work against `device`.
    /// A failed upload keeps the section in its previous state and
    /// retries next frame.
    pub fn pump(&mut self, device: &mut dyn RenderDevice) {
        let mut budget = self.upload_budget;
        while budget > 0 {
            let Some(up) = self.uploads.pop_front() else {
                break;
            };
            budget -= 1;
            let stale = match self.entries.get(&up.key) {
                Some(entry) => {
                    entry.epoch != up.epoch || up.generation <= entry.installed_generation
                }
                None => true,
            };
            if stale {
                self.stats.stale_discards += 1;
                continue;
            }
            match self.install(device, &up) {
                Ok(()) => {}
                Err(e) => {
                    log::warn!("mesh upload for {:?} failed, retrying: {}", up.key, e);
                    self.stats.upload_retries += 1;
                    self.uploads.push_front(up);
                    break;
                }
            }
        }

        for _ in 0..self.free_budget {
            let Some(handle) = self.frees.pop_front() else {
                break;
            };
            device.free(handle);
            self.stats.frees += 1;
        }
    }

    fn install(
        &mut self,
        device: &mut dyn RenderDevice,
        up: &PendingUpload,
    ) -> Result<(), crate::device::DeviceError> {
        let streams = [
            &up.geometry.opaque,
            &up.geometry.translucent,
            &up.geometry.overlay,
        ];
        let mut handles: [Option<MeshHandle>; 3] = [None; 3];
        for (i, mesh) in streams.into_iter().enumerate() {
            if mesh.is_empty() {
                continue;
            }
            match device.upload(mesh) {
                Ok(h) => handles[i] = Some(h),
                Err(e) => {
                    // Roll back the partial batch on the spot.
                    for h in handles.into_iter().flatten() {
                        device.free(h);
                    }
                    return Err(e);
                }
            }
        }
        let [opaque, translucent, overlay] = handles;
        self.stats.uploads += handles.into_iter().flatten().count();

        let entry = self
            .entries
            .get_mut(&up.key)
            .expect("entry checked before install");
        if let Some(old) = entry.loaded.take() {
            self.frees.extend(
                [old.opaque, old.translucent, old.overlay]
                    .into_iter()
                    .flatten(),
            );
        }
        entry.loaded = Some(LoadedMesh {
            key: up.key,
            generation: up.generation,
            details: up.geometry.details,
            bbox: up.geometry.bbox,
            opaque,
            translucent,
            overlay,
            block_entities: up.geometry.block_entities.clone(),
        });
        entry.installed_generation = up.generation;
        entry.pending = false;
        Ok(())
    }

    /// Unloads one section: installed handles go on the free queue, the
    /// epoch advances so queued uploads for the old load die on arrival.
    /// A second remove of the same key is a no-op.
    pub fn remove(&mut self, key: SectionKey) -> bool {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        if let Some(old) = entry.loaded {
            self.frees.extend(
                [old.opaque, old.translucent, old.overlay]
                    .into_iter()
                    .flatten(),
            );
        }
        *self.epochs.entry(key).or_insert(0) += 1;
        true
    }

    /// Unloads every section of `chunk`; returns how many were present.
    pub fn remove_chunk(&mut self, chunk: ChunkPos) -> usize {
        let keys: Vec<SectionKey> = self
            .entries
            .keys()
            .filter(|k| k.chunk == chunk)
            .copied()
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.remove(key) {
                removed += 1;
            }
        }
        removed
    }

    pub fn state(&self, key: SectionKey) -> MeshState {
        match self.entries.get(&key) {
            Some(e) if e.loaded.is_some() => MeshState::Loaded,
            Some(e) if e.pending => MeshState::Preparing,
            _ => MeshState::Unloaded,
        }
    }

    pub fn loaded(&self) -> impl Iterator<Item = &LoadedMesh> {
        self.entries.values().filter_map(|e| e.loaded.as_ref())
    }

    pub fn loaded_count(&self) -> usize {
        self.entries.values().filter(|e| e.loaded.is_some()).count()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    pub fn pending_frees(&self) -> usize {
        self.frees.len()
    }
}
