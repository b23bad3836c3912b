//! Ring peer protocol: membership, liveness probing, failure recovery, and
//! hashed file placement.
//!
//! `RingPeer` is the protocol core. It owns the topology record and the
//! local file set, and its handlers never touch sockets: every outbound
//! action is queued as an `Effect` for `PeerNode` (or a test harness) to
//! carry out. `PeerNode` runs the core on a single task, so each handler is
//! one atomic transaction against the peer's state.

mod command;
mod liveness;
mod membership;
mod node;
mod recovery;
mod storage;

use std::net::{IpAddr, SocketAddr};

use crate::ring::{FileKey, LocalFileSet, PeerId, RingState, Slot};
use crate::server::{PeerMsg, ProbeMsg};
use crate::utils::ChordletError;

use serde::Deserialize;

pub use command::PeerCommand;
pub use node::{PeerNode, StartMode};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Host every peer listens on.
    pub host: String,

    /// A peer's datagram port is this plus its ID.
    pub base_udp_port: u16,

    /// A peer's stream port is this plus its ID.
    pub base_tcp_port: u16,

    /// Modulus mapping file keys onto peer IDs.
    pub ring_size: u16,

    /// Successive unanswered probes tolerated before a successor is
    /// declared dead.
    pub miss_threshold: u8,

    /// Forwards after which a routed request is dropped.
    pub max_hops: u16,

    /// Timeout of outbound stream connects in millisecs.
    pub connect_timeout_ms: u64,

    /// Directory holding the files this peer serves and receives.
    pub storage_dir: String,

    /// Datagram receive buffer size.
    pub recv_buf_size: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            host: "127.0.0.1".into(),
            base_udp_port: 30000,
            base_tcp_port: 40000,
            ring_size: 256,
            miss_threshold: 2,
            max_hops: 256,
            connect_timeout_ms: 3000,
            storage_dir: ".".into(),
            recv_buf_size: 2048,
        }
    }
}

impl PeerConfig {
    /// Parses the config from an optional TOML string on top of defaults,
    /// and checks the values are usable.
    pub fn from_toml(config_str: Option<&str>) -> Result<Self, ChordletError> {
        let config = parsed_config!(config_str => PeerConfig;
                                    host, base_udp_port, base_tcp_port,
                                    ring_size, miss_threshold, max_hops,
                                    connect_timeout_ms, storage_dir,
                                    recv_buf_size)?;
        if config.host.parse::<IpAddr>().is_err() {
            return logged_err!("invalid config.host '{}'", config.host);
        }
        if config.ring_size < 2 {
            return logged_err!("invalid config.ring_size {}", config.ring_size);
        }
        if config.max_hops == 0 {
            return logged_err!("invalid config.max_hops {}", config.max_hops);
        }
        if config.connect_timeout_ms == 0 {
            return logged_err!(
                "invalid config.connect_timeout_ms {}",
                config.connect_timeout_ms
            );
        }
        if config.recv_buf_size < 64 {
            return logged_err!(
                "invalid config.recv_buf_size {}",
                config.recv_buf_size
            );
        }
        Ok(config)
    }

    /// Composes an address from the configured host and a port offset.
    fn addr_at(
        &self,
        base: u16,
        peer: PeerId,
    ) -> Result<SocketAddr, ChordletError> {
        let port = base.checked_add(peer).ok_or_else(|| {
            ChordletError::msg(format!(
                "port of peer {} overflows base {}",
                peer, base
            ))
        })?;
        Ok(SocketAddr::new(self.host.parse()?, port))
    }

    /// Datagram address of a peer.
    pub fn udp_addr(&self, peer: PeerId) -> Result<SocketAddr, ChordletError> {
        self.addr_at(self.base_udp_port, peer)
    }

    /// Stream address of a peer.
    pub fn tcp_addr(&self, peer: PeerId) -> Result<SocketAddr, ChordletError> {
        self.addr_at(self.base_tcp_port, peer)
    }

    /// Maps a datagram source port back to the sending peer's ID.
    pub fn peer_of_udp_port(&self, port: u16) -> Option<PeerId> {
        port.checked_sub(self.base_udp_port)
            .filter(|&id| id < self.ring_size)
    }
}

/// Outbound action requested by a protocol handler.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Effect {
    /// Send a stream message to a peer.
    Send { to: PeerId, msg: PeerMsg },

    /// Send a datagram probe message to a peer.
    Probe { to: PeerId, msg: ProbeMsg },

    /// Transfer the local file of `key` to a peer.
    Transfer { to: PeerId, key: FileKey },
}

/// Protocol core of one ring peer.
pub struct RingPeer {
    /// Configuration parameters struct.
    config: PeerConfig,

    /// Topology view.
    state: RingState,

    /// Keys of files owned and stored here.
    files: LocalFileSet,

    /// Outbound actions queued by handlers, drained by the driver.
    effects: Vec<Effect>,
}

// RingPeer common helpers
impl RingPeer {
    /// Creates a peer core with the given initial topology.
    pub fn new(config: PeerConfig, state: RingState) -> Self {
        RingPeer {
            config,
            state,
            files: LocalFileSet::new(),
            effects: vec![],
        }
    }

    #[inline]
    pub fn me(&self) -> PeerId {
        self.state.me()
    }

    #[inline]
    pub fn state(&self) -> &RingState {
        &self.state
    }

    #[inline]
    pub fn files(&self) -> &LocalFileSet {
        &self.files
    }

    #[inline]
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Drains the outbound actions queued so far.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    #[inline]
    fn send(&mut self, to: PeerId, msg: PeerMsg) {
        self.effects.push(Effect::Send { to, msg });
    }

    #[inline]
    fn probe(&mut self, to: PeerId, msg: ProbeMsg) {
        self.effects.push(Effect::Probe { to, msg });
    }

    /// Passes a routed request on to successor-1, bumping its hop count.
    /// Requests that already took `max_hops` forwards are dropped.
    fn forward(&mut self, msg: PeerMsg) {
        if msg.hops().unwrap_or(0) >= self.config.max_hops {
            pf_warn!("dropping '{}' after {} hops", msg, self.config.max_hops);
            return;
        }
        match self.state.successor(Slot::First) {
            Some(s1) => self.send(s1, msg.forwarded()),
            None => {
                pf_warn!("no successor known yet, dropping '{}'", msg);
            }
        }
    }

    /// Logs my current successors.
    fn log_successors(&self) {
        let show = |id: Option<PeerId>| {
            id.map_or_else(|| "unknown".to_string(), |id| id.to_string())
        };
        pf_info!(
            "my new first successor is Peer {}",
            show(self.state.successor(Slot::First))
        );
        pf_info!(
            "my new second successor is Peer {}",
            show(self.state.successor(Slot::Second))
        );
    }

    /// Synthesized handler of stream messages from peers.
    pub fn handle_peer_msg(
        &mut self,
        msg: PeerMsg,
    ) -> Result<(), ChordletError> {
        match msg {
            PeerMsg::Join { joiner, hops } => self.handle_join(joiner, hops),
            PeerMsg::JoinReply { s1, s2 } => {
                self.handle_join_reply(s1, s2);
                Ok(())
            }
            PeerMsg::SuccessorChange { s2 } => {
                self.handle_successor_change(s2);
                Ok(())
            }
            PeerMsg::Quit {
                leaver,
                s1,
                s2,
                slot,
            } => self.handle_quit(leaver, s1, s2, slot),
            PeerMsg::Vanished { reporter, slot } => {
                self.handle_vanished(reporter, slot)
            }
            PeerMsg::VanishedReply { s1, s2, slot } => {
                self.handle_vanished_reply(s1, s2, slot);
                Ok(())
            }
            PeerMsg::Store { key, hops } => {
                self.store(key, hops);
                Ok(())
            }
            PeerMsg::FileRequest {
                key,
                requester,
                hops,
            } => {
                self.retrieve(key, requester, hops);
                Ok(())
            }
            PeerMsg::NotFound { key, owner } => {
                self.handle_not_found(key, owner);
                Ok(())
            }
            PeerMsg::Transfer { .. } => {
                // transfers are consumed on their own connection
                logged_err!("transfer offer routed to protocol core")
            }
        }
    }

    /// Synthesized handler of datagram messages from peers.
    pub fn handle_probe_msg(&mut self, from: PeerId, msg: ProbeMsg) {
        match msg {
            ProbeMsg::PingRequest { slot } => {
                self.handle_ping_request(from, slot)
            }
            ProbeMsg::PingReply => self.handle_ping_reply(from),
        }
    }
}
