//! Ring identifier space: peer IDs, successor slots, the modular interval
//! predicate every routing decision goes through, and the topology record.

mod state;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

pub use state::RingState;

/// Peer ID type. Also offsets a peer's ports from the configured bases.
pub type PeerId = u16;

/// File key type; only its value modulo the ring size matters for placement.
pub type FileKey = u64;

/// Set of file keys a peer owns and stores locally.
pub type LocalFileSet = BTreeSet<FileKey>;

/// One of the two successor (or predecessor) positions a peer tracks.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    /// Both slots in order.
    pub const BOTH: [Slot; 2] = [Slot::First, Slot::Second];

    /// Wire representation of the slot.
    pub fn number(self) -> u8 {
        match self {
            Slot::First => 1,
            Slot::Second => 2,
        }
    }

    /// Parses the wire representation of a slot.
    pub fn from_number(num: u8) -> Option<Self> {
        match num {
            1 => Some(Slot::First),
            2 => Some(Slot::Second),
            _ => None,
        }
    }

    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Returns true if `v` lies in the clockwise half-open interval `(lo, hi]`
/// of the ring, i.e., walking clockwise from just after `lo`, `v` is reached
/// at or before `hi`.
///
/// When `lo == hi` the walk goes all the way around, so every `v` (`lo`
/// itself included) is inside. This is what lets a lone peer own the whole
/// ID space and accept the first joiner.
#[inline]
pub fn between(lo: PeerId, v: PeerId, hi: PeerId) -> bool {
    match lo.cmp(&hi) {
        Ordering::Less => lo < v && v <= hi,
        Ordering::Greater => v > lo || v <= hi, // wraps through 0
        Ordering::Equal => true,
    }
}

/// Maps a file key to the ID of the peer that should own it.
#[inline]
pub fn owner_of(key: FileKey, ring_size: u16) -> PeerId {
    debug_assert!(ring_size > 0);
    (key % ring_size as FileKey) as PeerId
}
