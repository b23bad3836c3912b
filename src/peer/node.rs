//! Ring peer -- networked driver running the protocol core.

use super::*;

use crate::server::{
    FileStore, Heartbeater, ProbeHub, TransportEvent, TransportHub,
};

use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

/// How a peer enters the ring.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StartMode {
    /// Founding member with both successors given up front.
    Init { s1: PeerId, s2: PeerId },

    /// Newcomer asking a known member to place it.
    Join { known: PeerId },
}

/// A running ring peer: the protocol core plus the hubs carrying out its
/// effects. All core state is touched from the single task driving `run`.
pub struct PeerNode {
    /// Protocol core.
    core: RingPeer,

    /// Stream transport module.
    transport_hub: TransportHub,

    /// Datagram probe module.
    probe_hub: ProbeHub,

    /// Probing round ticker.
    heartbeater: Heartbeater,

    /// Local file directory.
    file_store: FileStore,
}

impl PeerNode {
    /// Binds my datagram and stream ports and sets up all modules. In join
    /// mode, also sends the join request to the known member.
    pub async fn new_and_setup(
        me: PeerId,
        mode: StartMode,
        ping_interval: Duration,
        config: PeerConfig,
    ) -> Result<Self, ChordletError> {
        if me >= config.ring_size {
            return logged_err!(
                "peer ID {} outside ring of size {}",
                me,
                config.ring_size
            );
        }

        let state = match mode {
            StartMode::Init { s1, s2 } => {
                RingState::with_successors(me, s1, s2)
            }
            StartMode::Join { .. } => RingState::new(me),
        };

        let file_store =
            FileStore::new_and_setup(me, &config.storage_dir).await?;
        let probe_hub = ProbeHub::new_and_setup(me, &config).await?;
        let transport_hub =
            TransportHub::new_and_setup(me, &config, file_store.clone())
                .await?;
        let heartbeater = Heartbeater::new_and_setup(ping_interval)?;

        let mut node = PeerNode {
            core: RingPeer::new(config, state),
            transport_hub,
            probe_hub,
            heartbeater,
            file_store,
        };
        pf_info!("peer up: {}", node.core.state());

        if let StartMode::Join { known } = mode {
            node.core.start_join(known);
            node.apply_effects().await?;
        }
        Ok(node)
    }

    /// Read-only view of the protocol core.
    pub fn core(&self) -> &RingPeer {
        &self.core
    }

    /// Main event loop. Returns after a `quit` command has been carried out,
    /// or right away when `rx_term` flips, which models an abrupt crash:
    /// no departure notices are sent in that case.
    pub async fn run(
        &mut self,
        mut rx_cmd: mpsc::UnboundedReceiver<PeerCommand>,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ChordletError> {
        let mut cmd_open = true;

        loop {
            tokio::select! {
                // successor probing round
                _ = self.heartbeater.tick() => {
                    self.core.probe_round();
                },

                // datagram probe from some peer
                probe = self.probe_hub.recv_probe() => {
                    let (from, msg) = probe?;
                    self.core.handle_probe_msg(from, msg);
                },

                // stream message or delivery failure
                event = self.transport_hub.recv_event() => {
                    match event? {
                        TransportEvent::Msg(msg) => {
                            if let Err(e) = self.core.handle_peer_msg(msg) {
                                pf_error!("error handling message: {}", e);
                            }
                        }
                        TransportEvent::Unreachable { peer, .. } => {
                            self.core.handle_unreachable(peer);
                        }
                    }
                },

                // operator command
                cmd = rx_cmd.recv(), if cmd_open => {
                    match cmd {
                        Some(cmd) => {
                            if self.core.handle_command(cmd) {
                                self.leave().await;
                                return Ok(());
                            }
                        }
                        None => {
                            pf_debug!("operator input closed");
                            cmd_open = false;
                        }
                    }
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!("peer caught termination signal");
                    return Ok(());
                }
            }

            self.apply_effects().await?;
        }
    }

    /// Carries out every effect the core has queued. Serving a file may turn
    /// out impossible, which feeds back into the core and can queue more.
    async fn apply_effects(&mut self) -> Result<(), ChordletError> {
        loop {
            let effects = self.core.take_effects();
            if effects.is_empty() {
                return Ok(());
            }

            for effect in effects {
                match effect {
                    Effect::Send { to, msg } => {
                        if let Err(e) = self.transport_hub.send_msg(to, msg) {
                            pf_error!("error sending to Peer {}: {}", to, e);
                        }
                    }
                    Effect::Probe { to, msg } => {
                        if let Err(e) = self.probe_hub.send_probe(to, msg).await
                        {
                            pf_warn!("error probing Peer {}: {}", to, e);
                        }
                    }
                    Effect::Transfer { to, key } => {
                        self.start_transfer(to, key).await;
                    }
                }
            }
        }
    }

    /// Looks up the local file of `key` and spawns a task offering it to
    /// `to`. Reports to the core if there is nothing to send.
    async fn start_transfer(&mut self, to: PeerId, key: FileKey) {
        let path = match self.file_store.locate(key).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                pf_warn!("no file backs key {} in storage directory", key);
                self.core.transfer_failed(key, to);
                return;
            }
            Err(e) => {
                pf_error!("error scanning storage directory: {}", e);
                self.core.transfer_failed(key, to);
                return;
            }
        };
        let addr = match self.core.config().tcp_addr(to) {
            Ok(addr) => addr,
            Err(e) => {
                pf_error!("cannot address Peer {}: {}", to, e);
                return;
            }
        };

        let file_store = self.file_store.clone();
        let connect_timeout =
            Duration::from_millis(self.core.config().connect_timeout_ms);
        pf_info!("sending file {} to Peer {}", key, to);
        tokio::spawn(async move {
            match file_store.offer_file(addr, &path, connect_timeout).await {
                Ok(sent) => pf_info!(
                    "file {} sent to Peer {} ({} bytes)",
                    key,
                    to,
                    sent
                ),
                Err(e) => pf_error!(
                    "error sending file {} to Peer {}: {}",
                    key,
                    to,
                    e
                ),
            }
        });
    }

    /// Delivers the queued departure notices synchronously before exiting.
    async fn leave(&mut self) {
        for effect in self.core.take_effects() {
            if let Effect::Send { to, msg } = effect {
                if let Err(e) = self.transport_hub.do_sync_send(to, msg).await {
                    pf_warn!("departure notice to Peer {} lost: {}", to, e);
                }
            }
        }
        pf_info!("left the ring");
    }
}
