//! The passive side of the chunk protocol: answer size queries and chunk
//! requests from files in a share directory.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::{DecodeError, ServeError};
use crate::protocol::{ChunkReply, ChunkRequest};

/// Fixed transfer unit. Files are addressed as zero-based indices of
/// 1024-byte chunks; the final chunk may be shorter.
pub const CHUNK_SIZE: u64 = 1024;

/// Serves chunks of local files over UDP.
///
/// One request, one reply, no session state. A request for a file the
/// directory does not hold produces no reply at all; the requester's bounded
/// retry is the recovery path.
pub struct ChunkServer {
    socket: UdpSocket,
    dir: PathBuf,
    addr: SocketAddr,
}

impl ChunkServer {
    /// Bind a chunk server over the given share directory.
    pub async fn bind(addr: SocketAddr, dir: impl Into<PathBuf>) -> Result<Self, ServeError> {
        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?;
        let dir = dir.into();
        info!("chunk server at {addr} sharing {}", dir.display());
        Ok(Self { socket, dir, addr })
    }

    /// The bound chunk-protocol endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Receive exactly one datagram and answer it.
    ///
    /// Surfaces [`ServeError::MissingFile`] without sending any reply, not
    /// even a partial one. Malformed requests surface as
    /// [`ServeError::BadRequest`].
    pub async fn serve_one(&self) -> Result<(), ServeError> {
        let mut buf = vec![0u8; 512];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let request = ChunkRequest::decode(&buf[..len])?;
        let reply = match request {
            ChunkRequest::Size { name } => {
                let path = self.resolve(&name)?;
                let meta = tokio::fs::metadata(&path)
                    .await
                    .map_err(|_| ServeError::MissingFile(name))?;
                ChunkReply::Size {
                    chunks: meta.len().div_ceil(CHUNK_SIZE),
                }
            }
            ChunkRequest::Chunk { index, name } => {
                // The index comes straight off the wire; an offset that does
                // not fit in u64 can never address a real chunk.
                let offset = index.checked_mul(CHUNK_SIZE).ok_or_else(|| {
                    ServeError::BadRequest(DecodeError::BadNumber(index.to_string()))
                })?;
                let path = self.resolve(&name)?;
                let mut file = File::open(&path)
                    .await
                    .map_err(|_| ServeError::MissingFile(name))?;
                file.seek(SeekFrom::Start(offset)).await?;
                let data = read_up_to(&mut file, CHUNK_SIZE as usize).await?;
                ChunkReply::Chunk { index, data }
            }
        };
        self.socket.send_to(&reply.encode(), from).await?;
        Ok(())
    }

    /// Serve requests forever, logging per-request failures.
    pub async fn run(&self) {
        loop {
            match self.serve_one().await {
                Ok(()) => {}
                Err(ServeError::MissingFile(name)) => {
                    warn!("request for unshared file {name:?}");
                }
                Err(ServeError::BadRequest(err)) => {
                    debug!("dropping malformed chunk request: {err}");
                }
                Err(ServeError::Io(err)) => {
                    warn!("chunk server io error: {err}");
                    // Socket-level trouble; back off briefly rather than spin.
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Map a requested name onto the share directory. Names that try to
    /// navigate elsewhere are treated as not shared.
    fn resolve(&self, name: &str) -> Result<PathBuf, ServeError> {
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ServeError::MissingFile(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

/// Read up to `limit` bytes from the file's current position. Short reads at
/// end of file are expected; only the final chunk is shorter than the limit.
async fn read_up_to(file: &mut File, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut data = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = file.read(&mut data[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}
