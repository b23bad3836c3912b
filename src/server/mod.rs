//! Networked building blocks of a ring peer: the wire messages, the stream
//! and datagram hubs, the probing ticker, and the local file directory.

mod filestore;
mod heartbeat;
mod messages;
mod probe;
mod transport;

pub use messages::{PeerMsg, ProbeMsg, TRANSFER_APPROVED};

pub(crate) use filestore::FileStore;
pub(crate) use heartbeat::Heartbeater;
pub(crate) use probe::ProbeHub;
pub(crate) use transport::{TransportEvent, TransportHub};
