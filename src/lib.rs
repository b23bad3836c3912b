//! Chordlet: a self-organizing ring of peers. Each peer tracks two
//! successors and two predecessors, probes its successors over datagrams,
//! repairs the ring around silent or departing members, and places file
//! keys at the peer owning `key mod ring_size`, serving them over streams.

#[macro_use]
mod utils;

mod peer;
mod ring;
mod server;

pub use utils::{logger_init, ChordletError, ME};

pub use ring::{
    between, owner_of, FileKey, LocalFileSet, PeerId, RingState, Slot,
};

pub use server::{PeerMsg, ProbeMsg, TRANSFER_APPROVED};

pub use peer::{
    Effect, PeerCommand, PeerConfig, PeerNode, RingPeer, StartMode,
};
