// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests against a live server on an ephemeral port.

use labsink::export::ExportState;
use labsink::logbook::Logbook;
use labsink::store::MessageStore;
use labsink::{Config, LabServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;

struct Harness {
    server: LabServer,
    store: Arc<MessageStore>,
    addr: SocketAddr,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

async fn start_server() -> Harness {
    // Reserve a free port, then hand it to the server.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = Arc::new(Config {
        bind_address: "127.0.0.1".parse().unwrap(),
        port,
        ..Default::default()
    });
    let store = Arc::new(MessageStore::new());

    let server = LabServer::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::new(ExportState::new()),
        Logbook::in_memory(),
        Arc::new(tokio::sync::Notify::new()),
    )
    .unwrap();

    {
        let server = server.clone();
        tokio::spawn(async move { server.run().await });
    }

    let addr = loop {
        if let Some(addr) = server.local_addr() {
            break addr;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    Harness {
        server,
        store,
        addr,
    }
}

fn framed(payload: &str) -> Vec<u8> {
    let mut bytes = vec![STX];
    bytes.extend_from_slice(payload.as_bytes());
    bytes.push(ETX);
    bytes
}

async fn read_byte(stream: &mut TcpStream) -> u8 {
    let mut buf = [0u8; 1];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("response timed out")
        .expect("read failed");
    buf[0]
}

#[tokio::test]
async fn valid_frame_is_acked_and_stored() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    stream
        .write_all(&framed("PATIENT001|GLUCOSE|95.5|mg/dL"))
        .await
        .unwrap();

    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn invalid_patient_id_is_nacked_and_counted() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    stream
        .write_all(&framed("PATIENT1|GLUCOSE|95.5|mg/dL"))
        .await
        .unwrap();

    assert_eq!(read_byte(&mut stream).await, NAK);
    assert!(harness.store.is_empty());
    assert_eq!(
        harness.server.abuse().error_count("127.0.0.1".parse().unwrap()),
        1
    );
}

#[tokio::test]
async fn injection_attempt_is_nacked_before_validation() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    stream
        .write_all(&framed("PATIENT001'; DROP TABLE results"))
        .await
        .unwrap();

    assert_eq!(read_byte(&mut stream).await, NAK);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn stray_etx_is_nacked_and_buffer_discarded() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    stream.write_all(b"garbage\x03").await.unwrap();
    assert_eq!(read_byte(&mut stream).await, NAK);

    // The connection stays open and a well-formed frame still works.
    stream
        .write_all(&framed("PATIENT002|HEMOGLOBIN|14.2|g/dL"))
        .await
        .unwrap();
    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn frame_split_across_writes_is_reassembled() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    stream.write_all(b"\x02PATIENT001|GLU").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"COSE|95.5|mg/dL\x03").await.unwrap();

    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn multiple_frames_in_one_write_are_each_answered() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let mut bytes = framed("PATIENT001|GLUCOSE|95.5|mg/dL");
    bytes.extend(framed("PATIENT002|CHOLESTEROL|180|mg/dL"));
    stream.write_all(&bytes).await.unwrap();

    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(harness.store.len(), 2);
}

#[tokio::test]
async fn oversized_unterminated_stream_is_discarded_and_nacked() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    // Far more unframed bytes than any real frame, with no ETX in sight.
    stream.write_all(&vec![b'A'; 10 * 1024]).await.unwrap();
    assert_eq!(read_byte(&mut stream).await, NAK);

    // The connection survives and a well-formed frame still works.
    stream
        .write_all(&framed("PATIENT003|CHOLESTEROL|180|mg/dL"))
        .await
        .unwrap();
    assert_eq!(read_byte(&mut stream).await, ACK);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn repeated_errors_block_the_address_at_accept_time() {
    let harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    // Errors 1..=10 accumulate; the 11th crosses the block threshold and
    // the server closes the connection after EOT.
    for _ in 0..11 {
        stream.write_all(b"\x03").await.unwrap();
        assert_eq!(read_byte(&mut stream).await, NAK);
    }
    let ip = "127.0.0.1".parse().unwrap();
    loop {
        if harness.server.abuse().is_blocked(ip) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // A fresh connection from the blocked address is closed without any
    // bytes being read: the frame gets no response, only EOF.
    let mut second = TcpStream::connect(harness.addr).await.unwrap();
    second
        .write_all(&framed("PATIENT001|GLUCOSE|95.5|mg/dL"))
        .await
        .ok();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), second.read(&mut buf))
        .await
        .expect("expected EOF, got no close");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_accept_loop() {
    let harness = start_server().await;
    assert!(harness.server.is_running());

    harness.server.shutdown();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while harness.server.is_running() {
        assert!(tokio::time::Instant::now() < deadline, "server did not stop");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
