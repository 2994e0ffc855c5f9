//! Error taxonomy for the DHT, the transfer engine, and the chunk server.
//!
//! Protocol-level failures (malformed datagrams) never cross into callers:
//! the listener logs and drops them. Transfer-level failures are surfaced to
//! whoever requested the download and are not retried beyond the bounds
//! stated on the individual variants.

use std::net::SocketAddr;

use thiserror::Error;

/// A datagram that could not be decoded into a known message.
///
/// Always recovered locally: the offending datagram is logged and dropped,
/// and the listener loop continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,

    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid hex identifier")]
    BadHex,

    #[error("invalid endpoint: {0:?}")]
    BadEndpoint(String),

    #[error("invalid number: {0:?}")]
    BadNumber(String),

    #[error("payload shorter than its declared length")]
    TruncatedPayload,
}

impl From<hex::FromHexError> for DecodeError {
    fn from(_: hex::FromHexError) -> Self {
        DecodeError::BadHex
    }
}

/// Failures of DHT RPCs and the node's socket machinery.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),

    #[error("request to {0} timed out")]
    Timeout(SocketAddr),

    #[error("request to {0} was superseded by a newer one")]
    Superseded(SocketAddr),
}

/// Failures of one download attempt. Fatal to that download only.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no providers found for {0:?}")]
    NoProviders(String),

    #[error("could not learn the size of {name:?} after {attempts} attempts")]
    SizeUnavailable { name: String, attempts: usize },

    #[error("chunk {index} of {name:?} unavailable after {attempts} attempts")]
    ChunkUnavailable {
        name: String,
        index: u64,
        attempts: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while answering one chunk-protocol request.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The requested file is not present in the share directory. No reply is
    /// sent; the requester's bounded retry handles it.
    #[error("file {0:?} is not shared here")]
    MissingFile(String),

    #[error("malformed request: {0}")]
    BadRequest(#[from] DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
