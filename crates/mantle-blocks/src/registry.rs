use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crate::config::{BlockDef, BlocksConfig};
use crate::material::MaterialCatalog;
use crate::types::{Block, BlockEntityKind, BlockId, MaterialId, RenderPass};

#[derive(Clone, Debug)]
pub struct BlockType {
    pub id: BlockId,
    pub name: String,
    pub solid: bool,
    pub pass: RenderPass,
    pub fluid: bool,
    pub always_render: bool,
    pub entity: Option<BlockEntityKind>,
    pub material: MaterialId,
    /// Bit per face index; set when this block fully hides the
    /// neighbouring face on that side.
    pub occlusion_mask: u8,
}

impl BlockType {
    #[inline]
    pub fn occludes_from(&self, face_index: usize) -> bool {
        (self.occlusion_mask >> face_index) & 1 == 1
    }
}

#[derive(Debug)]
pub struct RegistryError(String);

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block registry: {}", self.0)
    }
}

impl Error for RegistryError {}

#[derive(Clone, Debug, Default)]
pub struct BlockRegistry {
    pub materials: MaterialCatalog,
    pub blocks: Vec<BlockType>,
    pub by_name: HashMap<String, BlockId>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.blocks.get(id as usize)
    }

    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn make_block(&self, name: &str) -> Option<Block> {
        self.id_by_name(name).map(Block::new)
    }

    pub fn from_configs(
        mut materials: MaterialCatalog,
        cfg: BlocksConfig,
    ) -> Result<Self, Box<dyn Error>> {
        // Pinned ids first, then fill gaps in declaration order.
        let mut max_id = 0u16;
        for def in &cfg.blocks {
            if let Some(id) = def.id {
                max_id = max_id.max(id);
            }
        }
        let count = cfg.blocks.len().max(max_id as usize + 1);
        let mut slots: Vec<Option<BlockType>> = vec![None; count];
        let mut by_name = HashMap::new();

        let mut pending: Vec<&BlockDef> = Vec::new();
        for def in &cfg.blocks {
            match def.id {
                Some(id) => {
                    if slots[id as usize].is_some() {
                        return Err(Box::new(RegistryError(format!(
                            "duplicate id {} for block '{}'",
                            id, def.name
                        ))));
                    }
                    slots[id as usize] = Some(Self::compile(def, id, &mut materials)?);
                }
                None => pending.push(def),
            }
        }
        let mut next = 0usize;
        for def in pending {
            while slots[next].is_some() {
                next += 1;
            }
            slots[next] = Some(Self::compile(def, next as u16, &mut materials)?);
        }

        let unknown = cfg.unknown_block.as_deref().unwrap_or("unknown");
        let mut blocks = Vec::with_capacity(slots.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let ty = match slot {
                Some(ty) => ty,
                // Unfilled pinned gaps become inert placeholder blocks.
                None => BlockType {
                    id: i as u16,
                    name: unknown.to_string(),
                    solid: false,
                    pass: RenderPass::Opaque,
                    fluid: false,
                    always_render: false,
                    entity: None,
                    material: materials.ensure(unknown),
                    occlusion_mask: 0,
                },
            };
            by_name.entry(ty.name.clone()).or_insert(ty.id);
            blocks.push(ty);
        }

        Ok(Self {
            materials,
            blocks,
            by_name,
        })
    }

    fn compile(
        def: &BlockDef,
        id: BlockId,
        materials: &mut MaterialCatalog,
    ) -> Result<BlockType, Box<dyn Error>> {
        let pass = match def.pass.as_deref() {
            None | Some("opaque") => RenderPass::Opaque,
            Some("translucent") => RenderPass::Translucent,
            Some(other) => {
                return Err(Box::new(RegistryError(format!(
                    "block '{}': unknown pass '{}'",
                    def.name, other
                ))));
            }
        };
        let entity = match def.entity.as_deref() {
            None => None,
            Some("sign") => Some(BlockEntityKind::Sign),
            Some(other) => {
                return Err(Box::new(RegistryError(format!(
                    "block '{}': unknown entity kind '{}'",
                    def.name, other
                ))));
            }
        };
        let solid = def.solid.unwrap_or(true);
        let fluid = def.fluid.unwrap_or(false);
        let always_render = def.always_render.unwrap_or(fluid);
        let occludes = def.occludes.unwrap_or(
            solid && !fluid && !always_render && pass == RenderPass::Opaque && def.name != "air",
        );
        let material_key = def.material.as_deref().unwrap_or(def.name.as_str());
        Ok(BlockType {
            id,
            name: def.name.clone(),
            solid,
            pass,
            fluid,
            always_render,
            entity,
            material: materials.ensure(material_key),
            occlusion_mask: if occludes { 0x3F } else { 0 },
        })
    }
}
