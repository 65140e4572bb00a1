//! CPU-side geometry building for chunk sections.
//!
//! Everything here is pure: a worker hands in an immutable section
//! snapshot plus a detail set and gets vertex streams back. No GPU
//! handles, no shared mutable state, so any number of builds may run
//! concurrently.
#![forbid(unsafe_code)]

pub mod build;
pub mod details;
pub mod face;

pub use build::{BlockEntityHandle, BuiltGeometry, MeshBuild, build_section};
pub use details::DetailSet;
pub use face::{ALL_FACES, Face};
