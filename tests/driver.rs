//! Smoke test for the async driver: a scripted client speaks SLIP-framed
//! datagrams over an in-memory duplex stream and registers with the chat
//! service behind the driver loop.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use slipstack::datagram::{DatagramHeader, PROTO_TRANSPORT};
use slipstack::driver::{run_chat_link, StackConfig};
use slipstack::link::slip::{self, Deframer};
use slipstack::segment::{flags, SegmentHeader};

const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);
const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
const CHAT_PORT: u16 = 6667;
const CLIENT_PORT: u16 = 40001;

fn frame_segment(seg_flags: u16, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let seg = SegmentHeader::new(CLIENT_PORT, CHAT_PORT, seq, ack, seg_flags)
        .encode(payload, CLIENT_ADDR, SERVER_ADDR);
    let raw = DatagramHeader::outbound(PROTO_TRANSPORT, CLIENT_ADDR, SERVER_ADDR).encode(&seg);
    slip::encode(&raw)
}

/// Read from the line until at least one complete datagram arrives, and
/// return every segment extracted.
async fn read_segments<R: AsyncRead + Unpin>(
    line: &mut R,
    deframer: &mut Deframer,
) -> Vec<(SegmentHeader, Vec<u8>)> {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = line.read(&mut buf).await.expect("line read");
        assert!(n > 0, "line closed unexpectedly");
        let datagrams = deframer.feed(&buf[..n]);
        if datagrams.is_empty() {
            continue;
        }
        return datagrams
            .into_iter()
            .map(|raw| {
                let (_, dgram_payload) = DatagramHeader::parse(&raw).unwrap();
                let (header, offset) = SegmentHeader::parse(dgram_payload).unwrap();
                (header, dgram_payload[offset..].to_vec())
            })
            .collect();
    }
}

#[tokio::test]
async fn driver_serves_chat_over_a_duplex_line() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
    let config = StackConfig {
        local_addr: SERVER_ADDR,
        routes: vec![("10.0.0.0/24".to_string(), CLIENT_ADDR.to_string())],
        chat_port: CHAT_PORT,
    };
    let server = tokio::spawn(async move { run_chat_link(server_io, &config).await });

    let exchange = async {
        let mut deframer = Deframer::new();

        // Handshake.
        client_io
            .write_all(&frame_segment(flags::SYN, 100, 0, &[]))
            .await
            .unwrap();
        let segs = read_segments(&mut client_io, &mut deframer).await;
        assert_eq!(segs.len(), 1);
        let (syn_ack, _) = &segs[0];
        assert!(syn_ack.has(flags::SYN) && syn_ack.has(flags::ACK));
        assert_eq!(syn_ack.ack, 101);

        let seq = 101u32;
        let ack = syn_ack.seq.wrapping_add(1);
        client_io
            .write_all(&frame_segment(flags::ACK, seq, ack, &[]))
            .await
            .unwrap();

        // Register a nickname and wait for the welcome numeric.
        client_io
            .write_all(&frame_segment(flags::ACK, seq, ack, b"NICK alice\r\n"))
            .await
            .unwrap();
        let mut received = String::new();
        while !received.contains(":server 001 alice :Welcome\r\n") {
            for (_, payload) in read_segments(&mut client_io, &mut deframer).await {
                received.push_str(&String::from_utf8_lossy(&payload));
            }
        }
        assert!(received.contains(":server 422 alice :MOTD File is missing"));
    };

    timeout(Duration::from_secs(10), exchange)
        .await
        .expect("exchange timed out");
    server.abort();
}
