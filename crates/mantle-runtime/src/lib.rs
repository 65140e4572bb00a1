//! Worker orchestration for section mesh builds.
//!
//! A fixed pool of mesh workers pulls from a shared priority queue:
//! closest section first, deterministic key order on ties, at most one
//! build in flight per section. Resubmitting a section supersedes its
//! queued build and cooperatively cancels a running one; results come
//! back over a channel the render thread drains once per frame.
#![forbid(unsafe_code)]

mod queue;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};

use mantle_blocks::BlockRegistry;
use mantle_mesh_cpu::{BuiltGeometry, DetailSet, build_section};
use mantle_world::{ChunkPos, SectionKey, SectionSnapshot};

use crate::queue::PendingQueue;

/// A finished build. `generation` is the submission ticket the build ran
/// under; installers must ignore results older than what they already
/// hold.
pub struct BuildResult {
    pub key: SectionKey,
    pub generation: u64,
    pub geometry: BuiltGeometry,
    pub build_ms: u32,
}

/// A build that ended without geometry because the builder panicked.
/// Installers use this to stop reporting the section as in progress.
pub struct BuildFailure {
    pub key: SectionKey,
    pub generation: u64,
}

struct Shared {
    reg: Arc<BlockRegistry>,
    pending: Mutex<PendingQueue>,
    work_cv: Condvar,
    shutdown: AtomicBool,
    next_generation: AtomicU64,
    queued: AtomicUsize,
    inflight: AtomicUsize,
}

pub struct SectionTaskScheduler {
    shared: Arc<Shared>,
    res_rx: Receiver<BuildResult>,
    fail_rx: Receiver<BuildFailure>,
    _pool: ThreadPool,
    pub workers: usize,
}

impl SectionTaskScheduler {
    pub fn new(reg: Arc<BlockRegistry>, workers: usize) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(4)
                .max(1)
        } else {
            workers
        };
        let (res_tx, res_rx) = unbounded::<BuildResult>();
        let (fail_tx, fail_rx) = unbounded::<BuildFailure>();
        let shared = Arc::new(Shared {
            reg,
            pending: Mutex::new(PendingQueue::default()),
            work_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_generation: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
        });

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mantle-mesh-{i}"))
            .build()
            .expect("mesh worker pool");
        for _ in 0..workers {
            let shared = Arc::clone(&shared);
            let tx = res_tx.clone();
            let fail = fail_tx.clone();
            pool.spawn(move || worker_loop(&shared, &tx, &fail));
        }

        Self {
            shared,
            res_rx,
            fail_rx,
            _pool: pool,
            workers,
        }
    }

    /// Queues a build for the snapshot's section and returns its
    /// generation ticket. An older queued build for the same key is
    /// replaced; a running one is flagged to stop.
    pub fn submit(&self, snapshot: SectionSnapshot, details: DetailSet, distance: u32) -> u64 {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let key = snapshot.key;
        {
            // Counters move under the queue lock so they always agree
            // with the queue's contents.
            let mut pending = self.shared.pending.lock().expect("pending lock");
            let replaced = pending.push(key, snapshot, details, distance, generation);
            if !replaced {
                self.shared.queued.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.shared.work_cv.notify_one();
        generation
    }

    /// Drops any pending build and cancels any running build for `key`.
    pub fn cancel(&self, key: SectionKey) {
        let mut pending = self.shared.pending.lock().expect("pending lock");
        if pending.cancel(key) {
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Cancels every pending or running build of `chunk`'s sections.
    pub fn cancel_chunk(&self, chunk: ChunkPos) {
        let mut pending = self.shared.pending.lock().expect("pending lock");
        let dropped = pending.cancel_chunk(chunk);
        if dropped > 0 {
            self.shared.queued.fetch_sub(dropped, Ordering::Relaxed);
        }
    }

    pub fn drain_results(&self) -> Vec<BuildResult> {
        self.res_rx.try_iter().collect()
    }

    /// Builds that died without a result; see [`BuildFailure`].
    pub fn drain_failures(&self) -> Vec<BuildFailure> {
        self.fail_rx.try_iter().collect()
    }

    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Relaxed)
    }

    pub fn inflight(&self) -> usize {
        self.shared.inflight.load(Ordering::Relaxed)
    }

    /// True only when no work is queued or running AND every produced
    /// result has been drained. Undelivered channel contents count as
    /// outstanding work.
    pub fn is_idle(&self) -> bool {
        self.queued() == 0
            && self.inflight() == 0
            && self.res_rx.is_empty()
            && self.fail_rx.is_empty()
    }
}

impl Drop for SectionTaskScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.work_cv.notify_all();
    }
}

fn worker_loop(shared: &Shared, tx: &Sender<BuildResult>, fail_tx: &Sender<BuildFailure>) {
    loop {
        let task = {
            let mut pending = shared.pending.lock().expect("pending lock");
            loop {
                if shared.shutdown.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(task) = pending.pop() {
                    // Inflight rises before queued falls, under the lock,
                    // so the pair can never both read zero mid-dispatch.
                    shared.inflight.fetch_add(1, Ordering::Relaxed);
                    shared.queued.fetch_sub(1, Ordering::Relaxed);
                    break task;
                }
                pending = shared.work_cv.wait(pending).expect("pending lock");
            }
        };

        let t0 = Instant::now();
        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            build_section(&shared.reg, &task.snapshot, task.details, &task.cancel)
        }));
        let build_ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;

        // Publish before dropping the inflight count so an idle scheduler
        // never has undelivered results.
        match built {
            Ok(Some(geometry)) => {
                let _ = tx.send(BuildResult {
                    key: task.key,
                    generation: task.generation,
                    geometry,
                    build_ms,
                });
            }
            Ok(None) => {
                log::debug!("build of {:?} cancelled after {}ms", task.key, build_ms);
            }
            Err(_) => {
                log::error!("mesh build panicked for {:?}; result dropped", task.key);
                let _ = fail_tx.send(BuildFailure {
                    key: task.key,
                    generation: task.generation,
                });
            }
        }

        shared.inflight.fetch_sub(1, Ordering::Relaxed);
        {
            let mut pending = shared.pending.lock().expect("pending lock");
            pending.complete(task.key);
        }
        // A queued successor for this key may be dispatchable now.
        shared.work_cv.notify_all();
    }
}
