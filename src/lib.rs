//! Chunk mesh pipeline: voxel sections in, prioritized background builds,
//! render-thread uploads and draw lists out.
#![forbid(unsafe_code)]

pub mod config;
pub mod event;
pub mod pipeline;

pub use config::PipelineConfig;
pub use event::{Event, EventQueue, RebuildCause};
pub use pipeline::{FrameStats, Pipeline};

/// Built-in block palette for the demo binary and integration tests.
pub const DEFAULT_BLOCKS_TOML: &str = r#"
unknown_block = "stone"

[[blocks]]
name = "air"
id = 0
solid = false
occludes = false

[[blocks]]
name = "stone"

[[blocks]]
name = "grass"

[[blocks]]
name = "water"
solid = false
fluid = true
pass = "translucent"

[[blocks]]
name = "sign"
solid = false
always_render = true
entity = "sign"
material = "wood"
"#;
