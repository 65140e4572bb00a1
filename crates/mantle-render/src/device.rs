use std::error::Error;
use std::fmt;

use hashbrown::HashSet;

use mantle_mesh_cpu::MeshBuild;

/// Opaque GPU buffer handle minted by a [`RenderDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

#[derive(Debug)]
pub struct DeviceError(pub String);

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render device: {}", self.0)
    }
}

impl Error for DeviceError {}

/// The GPU boundary. Implementations are not thread-safe by contract:
/// every call must come from the thread that owns the graphics context,
/// which is why uploads and frees funnel through the registry's
/// per-frame pump instead of happening on workers.
pub trait RenderDevice {
    fn upload(&mut self, mesh: &MeshBuild) -> Result<MeshHandle, DeviceError>;
    fn free(&mut self, handle: MeshHandle);
}

/// Headless device: mints handles and tracks live buffers without a GPU.
/// Backs the demo binary and the lifecycle tests; `fail_uploads` lets
/// tests exercise the out-of-memory path.
#[derive(Default)]
pub struct NullDevice {
    next: u64,
    live: HashSet<MeshHandle>,
    pub uploads: usize,
    pub frees: usize,
    pub fail_uploads: bool,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_handles(&self) -> usize {
        self.live.len()
    }
}

impl RenderDevice for NullDevice {
    fn upload(&mut self, mesh: &MeshBuild) -> Result<MeshHandle, DeviceError> {
        if self.fail_uploads {
            return Err(DeviceError("upload rejected".into()));
        }
        debug_assert!(!mesh.is_empty());
        self.next += 1;
        let handle = MeshHandle(self.next);
        self.live.insert(handle);
        self.uploads += 1;
        Ok(handle)
    }

    fn free(&mut self, handle: MeshHandle) {
        if self.live.remove(&handle) {
            self.frees += 1;
        } else {
            log::warn!("free of unknown mesh handle {:?}", handle);
        }
    }
}
