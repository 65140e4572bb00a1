use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Pipeline tuning knobs, loadable from TOML. Every field is optional in
/// the file; absent fields keep their defaults.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Mesh worker threads; 0 lets the scheduler size itself from the
    /// machine.
    pub workers: usize,
    /// View radius in chunks.
    pub view_radius: u32,
    /// GPU uploads allowed per frame.
    pub upload_budget: usize,
    /// GPU buffer frees allowed per frame.
    pub free_budget: usize,
    /// Lowest section index (inclusive).
    pub section_lo: i32,
    /// Highest section index (inclusive).
    pub section_hi: i32,
    pub seed: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            view_radius: 8,
            upload_budget: 16,
            free_budget: 32,
            section_lo: 0,
            section_hi: 7,
            seed: 1337,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<dyn Error>> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}
