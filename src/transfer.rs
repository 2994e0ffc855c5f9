//! The transfer engine: locate providers through the DHT, learn the file's
//! chunk count, fetch chunks in parallel batches, reassemble them in order,
//! and re-announce ourselves as a provider.
//!
//! Chunk exchanges ride on ephemeral sockets, one per worker, so each worker
//! owns its whole request/reply exchange. Batch results are collected from
//! the joined workers into state scoped to this download; nothing is shared
//! across downloads.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use futures::future::join_all;
use rand::Rng;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::error::{DhtError, TransferError};
use crate::node::DhtNode;
use crate::protocol::{ChunkReply, ChunkRequest};

/// Number of chunk indices fetched concurrently per batch.
pub const FETCH_BATCH_SIZE: u64 = 10;

/// How many providers are asked for the file size before giving up.
pub const SIZE_QUERY_ATTEMPTS: usize = 1000;

/// Per-chunk attempt bound; exhausting it fails the whole download.
pub const CHUNK_FETCH_ATTEMPTS: usize = 8;

/// How long one chunk exchange waits for its reply.
const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// State for one in-flight download. Created when the download starts and
/// discarded once the file is reassembled or the attempt fails.
struct TransferState<'a> {
    name: &'a str,
    providers: Vec<SocketAddr>,
    total_chunks: u64,
    next_batch_start: u64,
}

/// Download `file_name` into `dir`, then announce `serve_endpoint` as a new
/// provider.
///
/// Fails with [`TransferError::NoProviders`] when the DHT lookup comes back
/// empty, [`TransferError::SizeUnavailable`] when no provider answers the
/// size query within its attempt bound, and
/// [`TransferError::ChunkUnavailable`] when any chunk exhausts its retries.
pub async fn download(
    node: &DhtNode,
    serve_endpoint: SocketAddr,
    dir: &Path,
    file_name: &str,
) -> Result<(), TransferError> {
    let mut providers = node.find_peers(file_name).await;
    // Never fetch from ourselves: the destination file is about to be
    // truncated, and a re-download would otherwise read it back empty.
    providers.retain(|p| *p != serve_endpoint);
    if providers.is_empty() {
        return Err(TransferError::NoProviders(file_name.to_string()));
    }
    debug!("found {} providers for {file_name:?}", providers.len());

    let total_chunks = discover_size(file_name, &providers).await?;
    info!("downloading {file_name:?}: {total_chunks} chunks");

    let mut state = TransferState {
        name: file_name,
        providers,
        total_chunks,
        next_batch_start: 0,
    };

    // Truncate up front so a repeated download of the same name never
    // appends to stale leftover bytes.
    let path = dir.join(file_name);
    let mut out = File::create(&path).await?;

    while state.next_batch_start < state.total_chunks {
        let batch = state.fetch_batch().await?;
        for (_, data) in batch {
            out.write_all(&data).await?;
        }
    }
    out.flush().await?;

    info!("download of {file_name:?} complete, announcing {serve_endpoint}");
    node.announce(file_name, serve_endpoint).await;
    Ok(())
}

impl TransferState<'_> {
    /// Fetch the next batch: one worker per index, joined, results sorted so
    /// reassembly is strictly ascending regardless of arrival order.
    async fn fetch_batch(&mut self) -> Result<Vec<(u64, Vec<u8>)>, TransferError> {
        let start = self.next_batch_start;
        let end = (start + FETCH_BATCH_SIZE).min(self.total_chunks);
        let workers = (start..end).map(|index| self.fetch_chunk(index));
        let mut batch: Vec<(u64, Vec<u8>)> =
            join_all(workers).await.into_iter().collect::<Result<_, _>>()?;
        batch.sort_by_key(|(index, _)| *index);
        debug!("fetched chunks {start}..{end}");
        self.next_batch_start = end;
        Ok(batch)
    }

    /// Fetch one chunk, retrying with a freshly chosen random provider per
    /// attempt and preferring a different provider than the one that just
    /// failed.
    async fn fetch_chunk(&self, index: u64) -> Result<(u64, Vec<u8>), TransferError> {
        let request = ChunkRequest::Chunk {
            index,
            name: self.name.to_string(),
        }
        .encode();
        let mut failed: Option<SocketAddr> = None;
        for attempt in 1..=CHUNK_FETCH_ATTEMPTS {
            let provider = pick_provider(&self.providers, failed);
            match exchange(&request, provider).await {
                Ok(ChunkReply::Chunk { index: got, data }) if got == index => {
                    return Ok((index, data));
                }
                Ok(other) => {
                    debug!("unexpected reply for chunk {index} from {provider}: {other:?}");
                }
                Err(err) => {
                    debug!("chunk {index} attempt {attempt} via {provider} failed: {err}");
                }
            }
            failed = Some(provider);
        }
        Err(TransferError::ChunkUnavailable {
            name: self.name.to_string(),
            index,
            attempts: CHUNK_FETCH_ATTEMPTS,
        })
    }
}

/// Ask randomly chosen providers for the file's chunk count, bounded by
/// [`SIZE_QUERY_ATTEMPTS`].
async fn discover_size(name: &str, providers: &[SocketAddr]) -> Result<u64, TransferError> {
    let request = ChunkRequest::Size {
        name: name.to_string(),
    }
    .encode();
    for _ in 0..SIZE_QUERY_ATTEMPTS {
        let provider = pick_provider(providers, None);
        match exchange(&request, provider).await {
            Ok(ChunkReply::Size { chunks }) => return Ok(chunks),
            Ok(other) => debug!("unexpected size reply from {provider}: {other:?}"),
            Err(err) => debug!("size query via {provider} failed: {err}"),
        }
    }
    Err(TransferError::SizeUnavailable {
        name: name.to_string(),
        attempts: SIZE_QUERY_ATTEMPTS,
    })
}

/// Pick a random provider, avoiding `avoid` when there is a choice.
/// `providers` is non-empty: `download` rejects empty lookups up front.
fn pick_provider(providers: &[SocketAddr], avoid: Option<SocketAddr>) -> SocketAddr {
    let mut rng = rand::thread_rng();
    let candidates: Vec<SocketAddr> = match avoid {
        Some(avoid) if providers.len() > 1 => {
            providers.iter().copied().filter(|p| *p != avoid).collect()
        }
        _ => providers.to_vec(),
    };
    candidates[rng.gen_range(0..candidates.len())]
}

/// One request/reply exchange over a fresh ephemeral socket.
async fn exchange(request: &[u8], provider: SocketAddr) -> Result<ChunkReply, DhtError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.send_to(request, provider).await?;
    let mut buf = vec![0u8; CHUNK_REPLY_MAX];
    let (len, _) = timeout(CHUNK_REQUEST_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| DhtError::Timeout(provider))??;
    Ok(ChunkReply::decode(&buf[..len])?)
}

/// A chunk reply is the 1024-byte payload plus a short text header.
const CHUNK_REPLY_MAX: usize = crate::serve::CHUNK_SIZE as usize + 64;
