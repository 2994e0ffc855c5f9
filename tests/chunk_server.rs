#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use common::patterned_bytes;
use chunkmesh::{ChunkReply, ChunkServer, ServeError};

async fn server_with_file(name: &str, len: usize) -> (ChunkServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(name), patterned_bytes(len)).unwrap();
    let server = ChunkServer::bind("127.0.0.1:0".parse().unwrap(), dir.path())
        .await
        .unwrap();
    (server, dir)
}

async fn one_exchange(server: ChunkServer, request: &[u8]) -> ChunkReply {
    let addr = server.local_addr();
    let serving = tokio::spawn(async move { server.serve_one().await });
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(request, addr).await.unwrap();
    serving.await.unwrap().expect("request served");
    let mut buf = vec![0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .expect("reply arrives")
        .unwrap();
    ChunkReply::decode(&buf[..len]).expect("reply decodes")
}

#[tokio::test]
async fn size_query_reports_ceiling_of_chunk_count() {
    // 2500 bytes at 1024 per chunk spans 3 chunks.
    let (server, _dir) = server_with_file("x.bin", 2500).await;
    let reply = one_exchange(server, b"size|x.bin").await;
    assert_eq!(reply, ChunkReply::Size { chunks: 3 });
}

#[tokio::test]
async fn chunk_query_returns_the_addressed_slice() {
    let payload = patterned_bytes(2500);
    let (server, _dir) = server_with_file("x.bin", 2500).await;
    let reply = one_exchange(server, b"1|x.bin").await;
    match reply {
        ChunkReply::Chunk { index, data } => {
            assert_eq!(index, 1);
            assert_eq!(data, payload[1024..2048]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn final_chunk_is_short() {
    let payload = patterned_bytes(2500);
    let (server, _dir) = server_with_file("x.bin", 2500).await;
    let reply = one_exchange(server, b"2|x.bin").await;
    match reply {
        ChunkReply::Chunk { index, data } => {
            assert_eq!(index, 2);
            assert_eq!(data.len(), 2500 - 2048);
            assert_eq!(data, payload[2048..]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn overflowing_chunk_index_is_rejected_without_panicking() {
    let (server, _dir) = server_with_file("x.bin", 100).await;
    let addr = server.local_addr();
    let serving = tokio::spawn(async move {
        let outcome = server.serve_one().await;
        (server, outcome)
    });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // u64::MAX is a syntactically valid index whose byte offset cannot exist.
    client
        .send_to(b"18446744073709551615|x.bin", addr)
        .await
        .unwrap();

    let (server, outcome) = serving.await.expect("serve task must not panic");
    assert!(matches!(outcome, Err(ServeError::BadRequest(_))));

    let mut buf = vec![0u8; 64];
    let silence = timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(silence.is_err(), "no reply may be sent for an unaddressable index");

    // The same server keeps answering well-formed requests.
    let reply = one_exchange(server, b"size|x.bin").await;
    assert_eq!(reply, ChunkReply::Size { chunks: 1 });
}

#[tokio::test]
async fn unknown_file_surfaces_missing_file_and_sends_no_reply() {
    let (server, _dir) = server_with_file("x.bin", 100).await;
    let addr = server.local_addr();
    let serving = tokio::spawn(async move { server.serve_one().await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"size|nope.bin", addr).await.unwrap();

    let outcome = serving.await.unwrap();
    assert!(matches!(outcome, Err(ServeError::MissingFile(name)) if name == "nope.bin"));

    let mut buf = vec![0u8; 64];
    let silence = timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(silence.is_err(), "no reply may be sent for a missing file");
}

#[tokio::test]
async fn path_traversal_is_treated_as_not_shared() {
    let (server, _dir) = server_with_file("x.bin", 100).await;
    let addr = server.local_addr();
    let serving = tokio::spawn(async move { server.serve_one().await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"size|../x.bin", addr).await.unwrap();

    let outcome = serving.await.unwrap();
    assert!(matches!(outcome, Err(ServeError::MissingFile(_))));
}
