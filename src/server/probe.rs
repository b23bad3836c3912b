//! Datagram probe channel between ring peers.

use std::sync::Arc;

use crate::peer::PeerConfig;
use crate::ring::PeerId;
use crate::server::ProbeMsg;
use crate::utils::ChordletError;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The datagram probe module. Owns my bound UDP socket; a listener task
/// decodes incoming probes and identifies senders by their source port.
pub(crate) struct ProbeHub {
    /// Configuration parameters, for peer address mapping.
    config: PeerConfig,

    /// My bound datagram socket, shared with the listener task.
    socket: Arc<UdpSocket>,

    /// Receiver side of the recv channel.
    rx_recv: mpsc::UnboundedReceiver<(PeerId, ProbeMsg)>,

    /// Join handle of the probe listener task.
    _probe_listener_handle: JoinHandle<()>,
}

// ProbeHub public API implementation
impl ProbeHub {
    /// Binds my datagram port and spawns the probe listener task.
    pub(crate) async fn new_and_setup(
        me: PeerId,
        config: &PeerConfig,
    ) -> Result<Self, ChordletError> {
        let bind_addr = config.udp_addr(me)?;
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        pf_debug!("probe socket bound to {}", bind_addr);

        let (tx_recv, rx_recv) = mpsc::unbounded_channel();
        let probe_listener_handle = tokio::spawn(Self::probe_listener_thread(
            config.clone(),
            socket.clone(),
            tx_recv,
        ));

        Ok(ProbeHub {
            config: config.clone(),
            socket,
            rx_recv,
            _probe_listener_handle: probe_listener_handle,
        })
    }

    /// Sends a probe message to a peer's datagram port.
    pub(crate) async fn send_probe(
        &self,
        to: PeerId,
        msg: ProbeMsg,
    ) -> Result<(), ChordletError> {
        let addr = self.config.udp_addr(to)?;
        self.socket.send_to(msg.to_string().as_bytes(), addr).await?;
        pf_trace!("sent probe '{}' to {}", msg, to);
        Ok(())
    }

    /// Waits for the next probe message from some peer.
    pub(crate) async fn recv_probe(
        &mut self,
    ) -> Result<(PeerId, ProbeMsg), ChordletError> {
        match self.rx_recv.recv().await {
            Some((id, msg)) => Ok((id, msg)),
            None => logged_err!("probe recv channel has been closed"),
        }
    }
}

// ProbeHub probe_listener thread implementation
impl ProbeHub {
    /// Probe listener task function.
    async fn probe_listener_thread(
        config: PeerConfig,
        socket: Arc<UdpSocket>,
        tx_recv: mpsc::UnboundedSender<(PeerId, ProbeMsg)>,
    ) {
        pf_debug!("probe_listener thread spawned");

        let mut buf = vec![0; config.recv_buf_size];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(got) => got,
                Err(e) => {
                    // e.g. ICMP port unreachable surfacing from a dead peer
                    pf_trace!("error receiving probe: {}", e);
                    continue;
                }
            };

            let Some(id) = config.peer_of_udp_port(src.port()) else {
                pf_warn!("ignoring datagram from non-peer {}", src);
                continue;
            };
            let msg = match std::str::from_utf8(&buf[..len]) {
                Ok(text) => text.trim().parse::<ProbeMsg>(),
                Err(e) => Err(ChordletError::msg(e)),
            };

            match msg {
                Ok(msg) => {
                    if tx_recv.send((id, msg)).is_err() {
                        break; // hub dropped
                    }
                }
                Err(e) => pf_warn!("bad probe from Peer {}: {}", id, e),
            }
        }

        pf_debug!("probe_listener thread exitted");
    }
}

#[cfg(test)]
mod probe_tests {
    use super::*;
    use crate::ring::Slot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_and_reply() -> Result<(), ChordletError> {
        let config = PeerConfig::from_toml(Some("base_udp_port = 31200"))?;
        let mut hub5 = ProbeHub::new_and_setup(5, &config).await?;
        let mut hub10 = ProbeHub::new_and_setup(10, &config).await?;

        hub5.send_probe(10, ProbeMsg::PingRequest { slot: Slot::First })
            .await?;
        assert_eq!(
            hub10.recv_probe().await?,
            (5, ProbeMsg::PingRequest { slot: Slot::First })
        );
        hub10.send_probe(5, ProbeMsg::PingReply).await?;
        assert_eq!(hub5.recv_probe().await?, (10, ProbeMsg::PingReply));
        Ok(())
    }
}
