use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::Path;

/// Top-level `blocks.toml` schema.
#[derive(Deserialize, Clone, Debug)]
pub struct BlocksConfig {
    pub blocks: Vec<BlockDef>,
    pub unknown_block: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BlockDef {
    pub name: String,
    /// Explicit id pins a block to a slot; otherwise ids are assigned in
    /// declaration order after the pinned ones.
    pub id: Option<u16>,
    pub solid: Option<bool>,
    pub pass: Option<String>,
    pub fluid: Option<bool>,
    /// Always-rendered blocks are never culled by opaque neighbours
    /// (fluids, plants, partial shapes).
    pub always_render: Option<bool>,
    pub entity: Option<String>,
    pub material: Option<String>,
    /// Override for the derived per-face occlusion; `false` forces the
    /// block to never hide neighbouring faces.
    pub occludes: Option<bool>,
}

impl BlocksConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<dyn Error>> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}
