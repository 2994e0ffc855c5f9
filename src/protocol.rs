//! Wire codecs for the two UDP protocols.
//!
//! The DHT protocol is pipe-delimited UTF-8 text, one message per datagram,
//! with hex-encoded identifiers and `ip:port` endpoints. The chunk protocol
//! shares the delimiter for its text fields but carries raw file bytes behind
//! an explicit length field, so payloads containing the delimiter byte cannot
//! corrupt framing.

use std::net::SocketAddr;

use crate::core::{ContentHash, NodeId};
use crate::error::DecodeError;

/// A node as carried in a `NODES` reply: identifier plus DHT endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// A DHT protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DhtMessage {
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
    /// `FIND_NODE|<target hex>|<sender hex>`
    FindNode { target: NodeId, sender: NodeId },
    /// `NODES|<id hex>:<ip>:<port>|...`
    Nodes(Vec<NodeRecord>),
    /// `STORE|<hash hex>|<ip>:<port>`
    Store {
        hash: ContentHash,
        provider: SocketAddr,
    },
    /// `FIND_PEERS|<hash hex>|<sender hex>`
    FindPeers { hash: ContentHash, sender: NodeId },
    /// `PEERS|<hash hex>|<ip>:<port>|...`
    Peers {
        hash: ContentHash,
        providers: Vec<SocketAddr>,
    },
}

fn decode_id(field: &str) -> Result<[u8; 20], DecodeError> {
    let bytes = hex::decode(field)?;
    bytes.try_into().map_err(|_| DecodeError::BadHex)
}

fn decode_endpoint(field: &str) -> Result<SocketAddr, DecodeError> {
    field
        .parse()
        .map_err(|_| DecodeError::BadEndpoint(field.to_string()))
}

fn decode_node_record(field: &str) -> Result<NodeRecord, DecodeError> {
    let (id, endpoint) = field
        .split_once(':')
        .ok_or(DecodeError::MissingField("node endpoint"))?;
    Ok(NodeRecord {
        id: decode_id(id)?,
        addr: decode_endpoint(endpoint)?,
    })
}

impl DhtMessage {
    /// Encode into a single datagram body.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DhtMessage::Ping => b"PING".to_vec(),
            DhtMessage::Pong => b"PONG".to_vec(),
            DhtMessage::FindNode { target, sender } => {
                format!("FIND_NODE|{}|{}", hex::encode(target), hex::encode(sender)).into_bytes()
            }
            DhtMessage::Nodes(records) => {
                let mut out = String::from("NODES");
                for record in records {
                    out.push('|');
                    out.push_str(&format!("{}:{}", hex::encode(record.id), record.addr));
                }
                out.into_bytes()
            }
            DhtMessage::Store { hash, provider } => {
                format!("STORE|{}|{}", hex::encode(hash), provider).into_bytes()
            }
            DhtMessage::FindPeers { hash, sender } => {
                format!("FIND_PEERS|{}|{}", hex::encode(hash), hex::encode(sender)).into_bytes()
            }
            DhtMessage::Peers { hash, providers } => {
                let mut out = format!("PEERS|{}", hex::encode(hash));
                for provider in providers {
                    out.push('|');
                    out.push_str(&provider.to_string());
                }
                out.into_bytes()
            }
        }
    }

    /// Decode one datagram. Malformed input is reported per-datagram; the
    /// caller logs and drops it without disturbing the listener loop.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let text = std::str::from_utf8(data).map_err(|_| DecodeError::NotUtf8)?;
        let mut fields = text.split('|');
        let kind = fields.next().ok_or(DecodeError::Empty)?;
        match kind {
            "PING" => Ok(DhtMessage::Ping),
            "PONG" => Ok(DhtMessage::Pong),
            "FIND_NODE" => {
                let target = fields.next().ok_or(DecodeError::MissingField("target"))?;
                let sender = fields.next().ok_or(DecodeError::MissingField("sender"))?;
                Ok(DhtMessage::FindNode {
                    target: decode_id(target)?,
                    sender: decode_id(sender)?,
                })
            }
            "NODES" => {
                let records = fields
                    .map(decode_node_record)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DhtMessage::Nodes(records))
            }
            "STORE" => {
                let hash = fields.next().ok_or(DecodeError::MissingField("hash"))?;
                let provider = fields.next().ok_or(DecodeError::MissingField("provider"))?;
                Ok(DhtMessage::Store {
                    hash: decode_id(hash)?,
                    provider: decode_endpoint(provider)?,
                })
            }
            "FIND_PEERS" => {
                let hash = fields.next().ok_or(DecodeError::MissingField("hash"))?;
                let sender = fields.next().ok_or(DecodeError::MissingField("sender"))?;
                Ok(DhtMessage::FindPeers {
                    hash: decode_id(hash)?,
                    sender: decode_id(sender)?,
                })
            }
            "PEERS" => {
                let hash = fields.next().ok_or(DecodeError::MissingField("hash"))?;
                let providers = fields
                    .map(decode_endpoint)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DhtMessage::Peers {
                    hash: decode_id(hash)?,
                    providers,
                })
            }
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// A request to a chunk server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkRequest {
    /// `size|<filename>`: how many chunks does the file span?
    Size { name: String },
    /// `<index>|<filename>`: the chunk at the given zero-based index.
    Chunk { index: u64, name: String },
}

impl ChunkRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ChunkRequest::Size { name } => format!("size|{name}").into_bytes(),
            ChunkRequest::Chunk { index, name } => format!("{index}|{name}").into_bytes(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let text = std::str::from_utf8(data).map_err(|_| DecodeError::NotUtf8)?;
        let (head, name) = text
            .split_once('|')
            .ok_or(DecodeError::MissingField("filename"))?;
        if name.is_empty() {
            return Err(DecodeError::MissingField("filename"));
        }
        if head == "size" {
            return Ok(ChunkRequest::Size {
                name: name.to_string(),
            });
        }
        let index = head
            .parse()
            .map_err(|_| DecodeError::BadNumber(head.to_string()))?;
        Ok(ChunkRequest::Chunk {
            index,
            name: name.to_string(),
        })
    }
}

/// A reply from a chunk server.
///
/// Chunk payloads are framed with an explicit byte count ahead of the raw
/// bytes; the payload itself is copied into the datagram untransformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkReply {
    /// `sizeof|<chunk_count>`
    Size { chunks: u64 },
    /// `<index>|<byte count>|<raw bytes>`
    Chunk { index: u64, data: Vec<u8> },
}

impl ChunkReply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ChunkReply::Size { chunks } => format!("sizeof|{chunks}").into_bytes(),
            ChunkReply::Chunk { index, data } => {
                let mut out = format!("{index}|{}|", data.len()).into_bytes();
                out.extend_from_slice(data);
                out
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let first = data
            .iter()
            .position(|b| *b == b'|')
            .ok_or(DecodeError::MissingField("delimiter"))?;
        let head =
            std::str::from_utf8(&data[..first]).map_err(|_| DecodeError::NotUtf8)?;
        let rest = &data[first + 1..];
        if head == "sizeof" {
            let count = std::str::from_utf8(rest).map_err(|_| DecodeError::NotUtf8)?;
            let chunks = count
                .parse()
                .map_err(|_| DecodeError::BadNumber(count.to_string()))?;
            return Ok(ChunkReply::Size { chunks });
        }
        let index: u64 = head
            .parse()
            .map_err(|_| DecodeError::BadNumber(head.to_string()))?;
        let second = rest
            .iter()
            .position(|b| *b == b'|')
            .ok_or(DecodeError::MissingField("byte count"))?;
        let count_text =
            std::str::from_utf8(&rest[..second]).map_err(|_| DecodeError::NotUtf8)?;
        let count: usize = count_text
            .parse()
            .map_err(|_| DecodeError::BadNumber(count_text.to_string()))?;
        let payload = &rest[second + 1..];
        if payload.len() != count {
            return Err(DecodeError::TruncatedPayload);
        }
        Ok(ChunkReply::Chunk {
            index,
            data: payload.to_vec(),
        })
    }
}
