//! Block, material, and registry crate for the mesh pipeline.
#![forbid(unsafe_code)]

pub mod config;
pub mod material;
pub mod registry;
pub mod types;

pub use config::{BlockDef, BlocksConfig};
pub use material::{Material, MaterialCatalog};
pub use registry::{BlockRegistry, BlockType};
pub use types::{Block, BlockEntityKind, BlockId, MaterialId, RenderPass};
