pub type BlockId = u16;

/// A block instance: registry id plus packed state bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: BlockId,
    pub state: u16,
}

impl Block {
    pub const AIR: Block = Block { id: 0, state: 0 };

    #[inline]
    pub const fn new(id: BlockId) -> Self {
        Self { id, state: 0 }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self.id == Block::AIR.id
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u16);

/// Which draw pass a block's faces belong to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderPass {
    #[default]
    Opaque,
    Translucent,
}

/// Block entity kinds the mesh pipeline knows how to hand off to the
/// renderer. Only signs carry overlay text geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockEntityKind {
    Sign,
}
