//! Stream message module between ring peers.
//!
//! Each protocol message travels on a fresh connection to the receiver's
//! stream port: connect, write one line, close. File transfers ride the same
//! listener but keep their connection open for the payload.

use std::net::SocketAddr;

use crate::peer::PeerConfig;
use crate::ring::PeerId;
use crate::server::{FileStore, PeerMsg};
use crate::utils::{
    safe_frame_read, safe_frame_write, tcp_bind_with_retry,
    tcp_connect_with_timeout, ChordletError,
};

use bytes::BytesMut;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Event surfaced by the transport hub to its owner.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) enum TransportEvent {
    /// A protocol message arrived from some peer.
    Msg(PeerMsg),

    /// A message could not be delivered because `peer` refused or timed out
    /// the connection.
    Unreachable { peer: PeerId, msg: PeerMsg },
}

/// The peer-to-peer stream transport module.
pub(crate) struct TransportHub {
    /// My peer ID.
    me: PeerId,

    /// Configuration parameters, for peer address mapping.
    config: PeerConfig,

    /// Receiver side of the recv channel.
    rx_recv: mpsc::UnboundedReceiver<TransportEvent>,

    /// Sender side of the send channel.
    tx_send: mpsc::UnboundedSender<(PeerId, PeerMsg)>,

    /// Join handle of the peer acceptor thread.
    _peer_acceptor_handle: JoinHandle<()>,

    /// Join handle of the peer messenger thread.
    _peer_messenger_handle: JoinHandle<()>,
}

// TransportHub public API implementation
impl TransportHub {
    /// Creates a new stream transport hub. Binds my stream port, then spawns
    /// the peer acceptor thread, which handles incoming connections, and the
    /// peer messenger thread, which delivers outgoing messages in order.
    pub(crate) async fn new_and_setup(
        me: PeerId,
        config: &PeerConfig,
        file_store: FileStore,
    ) -> Result<Self, ChordletError> {
        let bind_addr = config.tcp_addr(me)?;
        let listener = tcp_bind_with_retry(bind_addr, 10).await?;
        pf_debug!("stream listener bound to {}", bind_addr);

        let (tx_recv, rx_recv) = mpsc::unbounded_channel();
        let (tx_send, rx_send) = mpsc::unbounded_channel();

        let peer_acceptor_handle = tokio::spawn(Self::peer_acceptor_thread(
            listener,
            file_store,
            tx_recv.clone(),
        ));
        let peer_messenger_handle = tokio::spawn(
            Self::peer_messenger_thread(config.clone(), tx_recv, rx_send),
        );

        Ok(TransportHub {
            me,
            config: config.clone(),
            rx_recv,
            tx_send,
            _peer_acceptor_handle: peer_acceptor_handle,
            _peer_messenger_handle: peer_messenger_handle,
        })
    }

    /// Queues a message for delivery to peer `to`. Delivery failures come
    /// back later as `TransportEvent::Unreachable`.
    pub(crate) fn send_msg(
        &mut self,
        to: PeerId,
        msg: PeerMsg,
    ) -> Result<(), ChordletError> {
        if to == self.me {
            return logged_err!("attempting to send '{}' to myself", msg);
        }
        self.tx_send
            .send((to, msg))
            .map_err(|e| ChordletError::msg(e.to_string()))?;
        Ok(())
    }

    /// Delivers a message to peer `to` right away, bypassing the messenger
    /// queue. Used on departure, when nothing will be around to drain it.
    pub(crate) async fn do_sync_send(
        &mut self,
        to: PeerId,
        msg: PeerMsg,
    ) -> Result<(), ChordletError> {
        Self::deliver(self.config.tcp_addr(to)?, &msg, self.connect_timeout())
            .await
    }

    /// Waits for the next transport event.
    pub(crate) async fn recv_event(
        &mut self,
    ) -> Result<TransportEvent, ChordletError> {
        match self.rx_recv.recv().await {
            Some(event) => Ok(event),
            None => logged_err!("transport recv channel has been closed"),
        }
    }

    #[inline]
    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connect_timeout_ms)
    }
}

// TransportHub peer_acceptor thread implementation
impl TransportHub {
    /// Reads the single line on an accepted connection and dispatches it.
    /// Transfer offers are served inline; anything else goes to the owner.
    async fn serve_conn(
        mut stream: TcpStream,
        file_store: &FileStore,
        tx_recv: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), ChordletError> {
        let mut read_buf = BytesMut::new();
        let line = safe_frame_read(&mut read_buf, &mut stream).await?;
        match line.parse::<PeerMsg>()? {
            PeerMsg::Transfer { sender, fname } => {
                pf_info!("receiving file '{}' from Peer {}", fname, sender);
                let path = file_store
                    .accept_file(sender, &fname, read_buf, &mut stream)
                    .await?;
                pf_info!(
                    "file '{}' received from Peer {}, saved as '{}'",
                    fname,
                    sender,
                    path.display()
                );
            }
            msg => {
                pf_trace!("recv '{}'", msg);
                tx_recv.send(TransportEvent::Msg(msg))?;
            }
        }
        Ok(())
    }

    /// Peer acceptor thread function.
    async fn peer_acceptor_thread(
        listener: TcpListener,
        file_store: FileStore,
        tx_recv: mpsc::UnboundedSender<TransportEvent>,
    ) {
        pf_debug!("peer_acceptor thread spawned");

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    pf_warn!("error accepting peer connection: {}", e);
                    continue;
                }
            };

            if let Err(e) =
                Self::serve_conn(stream, &file_store, &tx_recv).await
            {
                pf_error!("error serving connection from {}: {}", addr, e);
            }
            if tx_recv.is_closed() {
                break; // hub dropped
            }
        }

        pf_debug!("peer_acceptor thread exitted");
    }
}

// TransportHub peer_messenger thread implementation
impl TransportHub {
    /// Connects to `addr`, writes `msg` as one line, and closes.
    async fn deliver(
        addr: SocketAddr,
        msg: &PeerMsg,
        connect_timeout: Duration,
    ) -> Result<(), ChordletError> {
        let mut stream = tcp_connect_with_timeout(addr, connect_timeout).await?;
        safe_frame_write(&mut stream, &msg.to_string()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Peer messenger thread function.
    async fn peer_messenger_thread(
        config: PeerConfig,
        tx_recv: mpsc::UnboundedSender<TransportEvent>,
        mut rx_send: mpsc::UnboundedReceiver<(PeerId, PeerMsg)>,
    ) {
        pf_debug!("peer_messenger thread spawned");

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        while let Some((to, msg)) = rx_send.recv().await {
            let result = match config.tcp_addr(to) {
                Ok(addr) => Self::deliver(addr, &msg, connect_timeout).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => pf_trace!("sent '{}' to {}", msg, to),
                Err(e) => {
                    pf_warn!("cannot reach Peer {} with '{}': {}", to, msg, e);
                    if tx_recv
                        .send(TransportEvent::Unreachable { peer: to, msg })
                        .is_err()
                    {
                        break; // hub dropped
                    }
                }
            }
        }

        pf_debug!("peer_messenger thread exitted");
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;
    use rand::Rng;
    use tokio::fs;

    async fn scratch_store(me: PeerId) -> Result<FileStore, ChordletError> {
        let dir = std::env::temp_dir().join(format!(
            "chordlet-transport-{}",
            rand::thread_rng().gen::<u64>()
        ));
        fs::create_dir_all(&dir).await?;
        FileStore::new_and_setup(me, &dir).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_recv_msgs() -> Result<(), ChordletError> {
        let config = PeerConfig::from_toml(Some("base_tcp_port = 41100"))?;
        let mut hub5 =
            TransportHub::new_and_setup(5, &config, scratch_store(5).await?)
                .await?;
        let mut hub10 =
            TransportHub::new_and_setup(10, &config, scratch_store(10).await?)
                .await?;

        hub5.send_msg(10, PeerMsg::Join { joiner: 5, hops: 0 })?;
        hub5.send_msg(10, PeerMsg::SuccessorChange { s2: 20 })?;
        assert_eq!(
            hub10.recv_event().await?,
            TransportEvent::Msg(PeerMsg::Join { joiner: 5, hops: 0 })
        );
        assert_eq!(
            hub10.recv_event().await?,
            TransportEvent::Msg(PeerMsg::SuccessorChange { s2: 20 })
        );
        hub10
            .do_sync_send(5, PeerMsg::JoinReply { s1: 10, s2: 20 })
            .await?;
        assert_eq!(
            hub5.recv_event().await?,
            TransportEvent::Msg(PeerMsg::JoinReply { s1: 10, s2: 20 })
        );
        assert!(hub5.send_msg(5, PeerMsg::SuccessorChange { s2: 1 }).is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn report_unreachable() -> Result<(), ChordletError> {
        let config = PeerConfig::from_toml(Some(
            "base_tcp_port = 41200\nconnect_timeout_ms = 500",
        ))?;
        let mut hub5 =
            TransportHub::new_and_setup(5, &config, scratch_store(5).await?)
                .await?;

        let msg = PeerMsg::Vanished {
            reporter: 5,
            slot: crate::ring::Slot::First,
        };
        hub5.send_msg(77, msg.clone())?;
        assert_eq!(
            hub5.recv_event().await?,
            TransportEvent::Unreachable { peer: 77, msg }
        );
        Ok(())
    }
}
