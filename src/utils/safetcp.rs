//! Safe TCP bind/connect/read/write helper functions.
//!
//! Stream messages between peers are single text lines terminated by `\n`.
//! A file transfer follows its offer line with raw bytes on the same
//! connection, so readers must keep whatever trails the line.

use std::marker::Unpin;
use std::net::SocketAddr;

use crate::utils::ChordletError;

use bytes::BytesMut;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

/// Upper bound on the length of a single control line.
const MAX_FRAME_LEN: usize = 4096;

/// Receives one `\n`-terminated text frame from readable connection
/// `conn_read`, using `read_buf` as buffer storage for partial reads.
/// Returns:
///   - `Ok(line)` with the line terminator stripped; bytes read past the
///     terminator stay in `read_buf` for the caller
///   - `Err(err)` if the connection closed before any byte arrived, the line
///     grew too long, or any unexpected error occurs
///
/// A peer that closes the connection right after its message without
/// sending the terminator still yields the bytes it sent as one frame.
///
/// CANCELLATION SAFETY: bytes already read before a cancellation stay in
/// `read_buf` and are picked up by the next invocation.
pub(crate) async fn safe_frame_read<Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<String, ChordletError>
where
    Conn: AsyncReadExt + Unpin,
{
    loop {
        if let Some(pos) = read_buf.iter().position(|&b| b == b'\n') {
            let line = read_buf.split_to(pos + 1);
            let text = String::from_utf8(line[..pos].to_vec())?;
            return Ok(text.trim_end_matches('\r').to_string());
        }
        if read_buf.len() > MAX_FRAME_LEN {
            return Err(ChordletError::msg(format!(
                "frame exceeds {} bytes without terminator",
                MAX_FRAME_LEN
            )));
        }

        if conn_read.read_buf(read_buf).await? == 0 {
            // EOF reached
            if read_buf.is_empty() {
                return Err(ChordletError::msg(
                    "connection closed before any frame",
                ));
            }
            let line = read_buf.split();
            let text = String::from_utf8(line.to_vec())?;
            return Ok(text.trim_end().to_string());
        }
    }
}

/// Sends one text frame through writable connection `conn_write`, appending
/// the `\n` terminator.
pub(crate) async fn safe_frame_write<Conn>(
    conn_write: &mut Conn,
    line: &str,
) -> Result<(), ChordletError>
where
    Conn: AsyncWriteExt + Unpin,
{
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    conn_write.write_all(&frame).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ChordletError> {
    loop {
        let socket = if bind_addr.is_ipv6() {
            TcpSocket::new_v6()?
        } else {
            TcpSocket::new_v4()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_nodelay(true)?;

        // binding may fail while a previous incarnation's port lingers
        let err = match socket.bind(bind_addr) {
            Ok(()) => match socket.listen(1024) {
                Ok(listener) => return Ok(listener),
                Err(err) => err,
            },
            Err(err) => err,
        };
        if retries == 0 {
            return Err(err.into());
        }
        retries -= 1;
        time::sleep(Duration::from_secs(1)).await;
    }
}

/// Wrapper over tokio `TcpStream::connect()` bounded by a timeout. A peer
/// that neither accepts nor refuses within `timeout` counts as unreachable.
pub(crate) async fn tcp_connect_with_timeout(
    conn_addr: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream, ChordletError> {
    let stream = time::timeout(timeout, TcpStream::connect(conn_addr)).await??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn frame_keeps_trailing_bytes() -> Result<(), ChordletError> {
        let (mut client, mut server) = duplex(256);
        client.write_all(b"TRANSFER: 20 20.txt\nrawbytes").await?;
        drop(client);

        let mut read_buf = BytesMut::new();
        let line = safe_frame_read(&mut read_buf, &mut server).await?;
        assert_eq!(line, "TRANSFER: 20 20.txt");
        // the rest may or may not have been pulled in yet
        let mut rest = read_buf.to_vec();
        server.read_to_end(&mut rest).await?;
        assert_eq!(rest, b"rawbytes");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn frame_without_terminator() -> Result<(), ChordletError> {
        let (mut client, mut server) = duplex(256);
        client.write_all(b"SCR 7").await?;
        drop(client);

        let mut read_buf = BytesMut::new();
        let line = safe_frame_read(&mut read_buf, &mut server).await?;
        assert_eq!(line, "SCR 7");
        assert!(safe_frame_read(&mut read_buf, &mut server).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn frame_write_read() -> Result<(), ChordletError> {
        let (mut client, mut server) = duplex(256);
        safe_frame_write(&mut client, "APPROVED").await?;
        safe_frame_write(&mut client, "SVR: 10 1").await?;

        let mut read_buf = BytesMut::new();
        assert_eq!(
            safe_frame_read(&mut read_buf, &mut server).await?,
            "APPROVED"
        );
        assert_eq!(
            safe_frame_read(&mut read_buf, &mut server).await?,
            "SVR: 10 1"
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn bind_ipv6_host() -> Result<(), ChordletError> {
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            return Ok(()); // no IPv6 loopback on this host
        }
        let listener = tcp_bind_with_retry("[::1]:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        assert!(addr.is_ipv6());
        let accepting = tokio::spawn(async move { listener.accept().await });
        let mut stream =
            tcp_connect_with_timeout(addr, Duration::from_secs(1)).await?;
        safe_frame_write(&mut stream, "SCR 7").await?;
        let (mut conn, _) = accepting.await??;
        let mut read_buf = BytesMut::new();
        assert_eq!(safe_frame_read(&mut read_buf, &mut conn).await?, "SCR 7");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn connect_refused() -> Result<(), ChordletError> {
        let listener = tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        drop(listener);
        assert!(tcp_connect_with_timeout(addr, Duration::from_millis(500))
            .await
            .is_err());
        Ok(())
    }
}
