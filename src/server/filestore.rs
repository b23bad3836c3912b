//! Local file directory: locating files by key, and the two ends of a
//! peer-to-peer file transfer.

use std::path::{Path, PathBuf};

use crate::ring::{FileKey, PeerId};
use crate::server::{PeerMsg, TRANSFER_APPROVED};
use crate::utils::{
    safe_frame_read, safe_frame_write, tcp_connect_with_timeout, ChordletError,
};

use bytes::BytesMut;

use tokio::fs::{self, File};
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::time::Duration;

/// Name prefix of files received from other peers.
pub(crate) const RECEIVED_PREFIX: &str = "received_";

/// Handle to the directory this peer serves files from and saves received
/// files into. Cheap to clone into transfer tasks.
#[derive(Debug, Clone)]
pub(crate) struct FileStore {
    /// My peer ID, announced in transfer offers.
    me: PeerId,

    /// Storage directory.
    dir: PathBuf,
}

impl FileStore {
    /// Creates a file store handle over directory `dir`, which must exist.
    pub(crate) async fn new_and_setup(
        me: PeerId,
        dir: impl AsRef<Path>,
    ) -> Result<Self, ChordletError> {
        let dir = dir.as_ref().to_path_buf();
        if !fs::metadata(&dir).await?.is_dir() {
            return logged_err!(
                "storage path '{}' is not a directory",
                dir.display()
            );
        }
        Ok(FileStore { me, dir })
    }

    /// Finds the local file backing `key`: a file whose name without
    /// extension parses to the key, e.g. `2067.pdf` for key 2067. Received
    /// copies are not served. Ties resolve to the lexicographically smallest
    /// name.
    pub(crate) async fn locate(
        &self,
        key: FileKey,
    ) -> Result<Option<PathBuf>, ChordletError> {
        let mut found: Option<PathBuf> = None;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let (Some(name), Some(stem)) = (
                path.file_name().and_then(|n| n.to_str()),
                path.file_stem().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            if name.starts_with(RECEIVED_PREFIX)
                || name.contains(char::is_whitespace)
                || stem.parse::<FileKey>().ok() != Some(key)
            {
                continue;
            }
            if found.as_ref().map_or(true, |f| path < *f) {
                found = Some(path);
            }
        }
        Ok(found)
    }

    /// Offers the file at `path` to the peer listening at `addr` and streams
    /// it over once approved.
    pub(crate) async fn offer_file(
        &self,
        addr: std::net::SocketAddr,
        path: &Path,
        connect_timeout: Duration,
    ) -> Result<u64, ChordletError> {
        let mut stream = tcp_connect_with_timeout(addr, connect_timeout).await?;
        self.offer_over(&mut stream, path).await
    }

    /// Sender side of the transfer handshake over an established connection:
    /// `TRANSFER` offer line, wait for approval, then raw file bytes until
    /// the write side is shut. Returns the number of bytes sent.
    pub(crate) async fn offer_over<Conn>(
        &self,
        conn: &mut Conn,
        path: &Path,
    ) -> Result<u64, ChordletError>
    where
        Conn: AsyncReadExt + AsyncWriteExt + Unpin,
    {
        let fname = match path.file_name().and_then(|n| n.to_str()) {
            Some(fname) => fname.to_string(),
            None => {
                return logged_err!("unusable file name '{}'", path.display())
            }
        };
        let mut file = File::open(path).await?;

        let offer = PeerMsg::Transfer {
            sender: self.me,
            fname,
        };
        safe_frame_write(conn, &offer.to_string()).await?;

        let mut read_buf = BytesMut::new();
        let answer = safe_frame_read(&mut read_buf, conn).await?;
        if answer != TRANSFER_APPROVED {
            return logged_err!("send request rejected: '{}'", answer);
        }

        let sent = io::copy(&mut file, conn).await?;
        conn.shutdown().await?;
        Ok(sent)
    }

    /// Receiver side of the transfer handshake, after the `TRANSFER` offer
    /// line has been read off `conn`. `read_buf` holds any bytes that
    /// trailed the offer line. Approves the offer and saves the incoming
    /// bytes as `received_<fname>`. Returns the path written.
    pub(crate) async fn accept_file<Conn>(
        &self,
        sender: PeerId,
        fname: &str,
        read_buf: BytesMut,
        conn: &mut Conn,
    ) -> Result<PathBuf, ChordletError>
    where
        Conn: AsyncReadExt + AsyncWriteExt + Unpin,
    {
        if fname.is_empty()
            || fname.contains(['/', '\\'])
            || fname == "."
            || fname == ".."
        {
            safe_frame_write(conn, "REJECTED").await?;
            return logged_err!(
                "rejecting file '{}' from Peer {}: bad name",
                fname,
                sender
            );
        }
        safe_frame_write(conn, TRANSFER_APPROVED).await?;

        let path = self.dir.join(format!("{}{}", RECEIVED_PREFIX, fname));
        let mut file = File::create(&path).await?;
        file.write_all(&read_buf).await?;
        io::copy(conn, &mut file).await?;
        file.flush().await?;
        Ok(path)
    }
}
