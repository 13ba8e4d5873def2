//! Async event loop marrying the sans-I/O stack to a real byte stream.
//!
//! The protocol core is synchronous and driven by discrete events; this
//! module supplies those events from a tokio stream carrying SLIP frames
//! (a serial line, or a TCP socket standing in for one). Each loop
//! iteration multiplexes two sources:
//!
//! 1. bytes arriving on the line, deframed and fed to the stack,
//! 2. the earliest retransmission deadline across all connections.
//!
//! After every step it drains the listener's application events into the
//! chat service and flushes the link's outbound frames back to the line.
//! The "disarmed" timer case reuses a far-future sleep guarded out of the
//! select, so at most one timeout future exists at a time.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, Instant as TokioInstant};

use crate::chat::ChatServer;
use crate::link::{slip, SerialLink};
use crate::listener::Listener;
use crate::network::NetworkLayer;

/// A deadline far enough away to stand in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Read chunk size for the serial line.
const READ_BUF: usize = 4096;

/// Node configuration for one stack instance.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Address under which this node accepts local delivery.
    pub local_addr: Ipv4Addr,
    /// Routing entries as `(CIDR, next hop)` strings.
    pub routes: Vec<(String, String)>,
    /// Port the chat service listens on.
    pub chat_port: u16,
}

/// Run a chat-serving stack over one point-to-point line until the line
/// closes or fails.
pub async fn run_chat_link<S>(mut line: S, config: &StackConfig) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut net = NetworkLayer::new(SerialLink::new());
    net.set_local_addr(config.local_addr);
    net.set_routes(
        config
            .routes
            .iter()
            .map(|(cidr, next_hop)| (cidr.as_str(), next_hop.as_str())),
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut tcp = Listener::new(net, config.chat_port);
    let mut chat = ChatServer::new();
    let mut deframer = slip::Deframer::new();
    let mut buf = vec![0u8; READ_BUF];

    loop {
        let deadline = tcp.poll_timeout();

        tokio::select! {
            read = line.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    log::info!("[driver] line closed");
                    return Ok(());
                }
                let now = Instant::now();
                for datagram in deframer.feed(&buf[..n]) {
                    tcp.handle_datagram(now, &datagram);
                }
            }
            _ = sleep_until(TokioInstant::from_std(
                deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE),
            )), if deadline.is_some() => {
                tcp.on_timeout(Instant::now());
            }
        }

        let now = Instant::now();
        while let Some(event) = tcp.poll_event() {
            chat.handle_event(event, &mut tcp, now);
        }
        while let Some(frame) = tcp.network_mut().link_mut().pop_frame() {
            line.write_all(&frame).await?;
        }
        line.flush().await?;
    }
}
