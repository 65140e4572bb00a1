use mantle_world::SectionKey;

use crate::face::Face;

/// Bitset of optional mesh features selected per section from camera
/// distance. Orthogonal flags; the builder and collector read them
/// independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DetailSet(u32);

impl DetailSet {
    pub const EMPTY: DetailSet = DetailSet(0);

    pub const ENTITIES: DetailSet = DetailSet(1 << 0);
    pub const OVERLAY_TEXT: DetailSet = DetailSet(1 << 1);
    pub const AMBIENT_OCCLUSION: DetailSet = DetailSet(1 << 2);
    pub const ANTI_MOIRE: DetailSet = DetailSet(1 << 3);
    pub const SORT_TRANSLUCENT: DetailSet = DetailSet(1 << 4);
    pub const FLOWING_FLUID: DetailSet = DetailSet(1 << 5);
    pub const FLUID_HEIGHTS: DetailSet = DetailSet(1 << 6);

    pub const SIDE_POS_Y: DetailSet = DetailSet(1 << 7);
    pub const SIDE_NEG_Y: DetailSet = DetailSet(1 << 8);
    pub const SIDE_POS_X: DetailSet = DetailSet(1 << 9);
    pub const SIDE_NEG_X: DetailSet = DetailSet(1 << 10);
    pub const SIDE_POS_Z: DetailSet = DetailSet(1 << 11);
    pub const SIDE_NEG_Z: DetailSet = DetailSet(1 << 12);

    pub const ALL: DetailSet = DetailSet((1 << 13) - 1);

    /// Builds a set from raw bits, ignoring anything outside the known
    /// flags.
    #[inline]
    pub const fn from_bits(bits: u32) -> DetailSet {
        DetailSet(bits & Self::ALL.0)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: DetailSet) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn with(self, other: DetailSet) -> DetailSet {
        DetailSet(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn without(self, other: DetailSet) -> DetailSet {
        DetailSet(self.0 & !other.0)
    }

    #[inline]
    pub fn side(face: Face) -> DetailSet {
        match face {
            Face::PosY => Self::SIDE_POS_Y,
            Face::NegY => Self::SIDE_NEG_Y,
            Face::PosX => Self::SIDE_POS_X,
            Face::NegX => Self::SIDE_NEG_X,
            Face::PosZ => Self::SIDE_POS_Z,
            Face::NegZ => Self::SIDE_NEG_Z,
        }
    }

    /// Selects the feature set for `section` as seen from
    /// `camera_section`. Pure and total: the orchestrator caches the
    /// result and only re-invokes this when a distance bucket changes.
    ///
    /// Thresholds are discrete Chebyshev-distance buckets; a side flag is
    /// dropped once the section sits more than `SIDE_RANGE` sections away
    /// along that axis on the far side, where that face can no longer be
    /// seen.
    pub fn select(section: SectionKey, camera_section: SectionKey) -> DetailSet {
        let d = section.chebyshev(camera_section);
        let mut details = Self::ALL;

        if d >= 5 {
            details = details.without(Self::ENTITIES);
        }
        if d >= 4 {
            details = details.without(Self::OVERLAY_TEXT);
        }
        if d >= 8 {
            details = details.without(Self::AMBIENT_OCCLUSION);
            details = details.without(Self::SORT_TRANSLUCENT);
            details = details.without(Self::FLUID_HEIGHTS);
        }
        if d >= 6 {
            details = details.without(Self::FLOWING_FLUID);
        }
        if d >= 15 {
            details = details.without(Self::ANTI_MOIRE);
        }

        const SIDE_RANGE: i32 = 3;
        let dx = section.chunk.x - camera_section.chunk.x;
        let dy = section.y - camera_section.y;
        let dz = section.chunk.z - camera_section.chunk.z;
        if dy < -SIDE_RANGE {
            details = details.without(Self::SIDE_NEG_Y);
        }
        if dy > SIDE_RANGE {
            details = details.without(Self::SIDE_POS_Y);
        }
        if dx < -SIDE_RANGE {
            details = details.without(Self::SIDE_NEG_X);
        }
        if dx > SIDE_RANGE {
            details = details.without(Self::SIDE_POS_X);
        }
        if dz < -SIDE_RANGE {
            details = details.without(Self::SIDE_NEG_Z);
        }
        if dz > SIDE_RANGE {
            details = details.without(Self::SIDE_POS_Z);
        }

        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_camera_has_everything() {
        let cam = SectionKey::new(0, 0, 0);
        assert_eq!(DetailSet::select(cam, cam), DetailSet::ALL);
    }

    #[test]
    fn entities_drop_crossing_four_to_five() {
        let cam = SectionKey::new(0, 0, 0);
        let near = DetailSet::select(SectionKey::new(4, 0, 0), cam);
        let far = DetailSet::select(SectionKey::new(5, 0, 0), cam);
        assert!(near.contains(DetailSet::ENTITIES));
        assert!(!far.contains(DetailSet::ENTITIES));
    }

    #[test]
    fn far_side_faces_are_dropped() {
        let cam = SectionKey::new(0, 0, 0);
        // Section far in -X: its -X faces can never be seen.
        let d = DetailSet::select(SectionKey::new(-4, 0, 0), cam);
        assert!(!d.contains(DetailSet::SIDE_NEG_X));
        assert!(d.contains(DetailSet::SIDE_POS_X));
        // Within range both sides stay.
        let d = DetailSet::select(SectionKey::new(-3, 0, 0), cam);
        assert!(d.contains(DetailSet::SIDE_NEG_X));
    }

    #[test]
    fn with_without_round_trip() {
        let d = DetailSet::EMPTY.with(DetailSet::ENTITIES);
        assert!(d.contains(DetailSet::ENTITIES));
        assert!(!d.without(DetailSet::ENTITIES).contains(DetailSet::ENTITIES));
    }
}
