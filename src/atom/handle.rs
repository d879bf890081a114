const TAG_BITS: u32 = 7;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
const ATOM_TAG: u64 = 0x05;
const INDEX_BITS: u32 = 33;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_SHIFT: u32 = TAG_BITS + INDEX_BITS;

pub(crate) const GENERATION_MASK: u32 = (1 << (64 - GENERATION_SHIFT)) - 1;

/// The identity of an interned value.
///
/// An atom is an index into the table's slot array together with the
/// generation of that slot, so a handle kept past its atom's collection is
/// detected instead of silently naming whatever reuses the slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    index: u32,
    generation: u32,
}

impl Atom {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The tagged machine word form of this atom.
    pub fn to_word(self) -> u64 {
        ((self.generation as u64) << GENERATION_SHIFT)
            | ((self.index as u64) << TAG_BITS)
            | ATOM_TAG
    }

    /// Decodes a word produced by [`Atom::to_word`]. Any other word yields
    /// `None`, which is what makes scanning raw words for atoms safe.
    pub fn from_word(word: u64) -> Option<Atom> {
        if word & TAG_MASK != ATOM_TAG {
            return None;
        }

        let index = (word >> TAG_BITS) & INDEX_MASK;
        let generation = (word >> GENERATION_SHIFT) as u32;

        Some(Atom::new(u32::try_from(index).ok()?, generation))
    }
}
