use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest envelope accepted off the wire. A frame is at most a header, a
/// 4095 byte payload and a signature, so this leaves plenty of room.
pub const MAX_ENVELOPE_LEN: usize = 64 * 1024;

/// Moves whole frames over a byte stream.
///
/// Each frame travels inside a `u32` big-endian length prefix so the reader
/// knows where one ends and the next begins.
#[async_trait]
pub trait Transport: Send {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// `Ok(None)` when the peer closed the stream between frames.
    async fn recv_frame(&mut self) -> io::Result<Option<Bytes>>;
}

/// A real Tokio-based Transport.
pub struct TokioTransport {
    stream: TcpStream,
}

impl TokioTransport {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

#[async_trait]
impl Transport for TokioTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() > MAX_ENVELOPE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes is too large to send", frame.len()),
            ));
        }
        self.stream.write_u32(frame.len() as u32).await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }

    async fn recv_frame(&mut self) -> io::Result<Option<Bytes>> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        if len > MAX_ENVELOPE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer announced a {len} byte frame"),
            ));
        }

        let mut buf = BytesMut::zeroed(len);
        self.stream.read_exact(&mut buf).await?;
        Ok(Some(buf.freeze()))
    }
}
