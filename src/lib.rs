//! `slipstack` — an educational IPv4/TCP-style network stack running over
//! SLIP-framed point-to-point serial links.
//!
//! # Architecture
//!
//! ```text
//!  Application (chat service)
//!      ▲ events                 │ write / close
//!      │                        ▼
//!  ┌───────────────────────────────────┐
//!  │             Listener              │  passive open, 4-tuple demux
//!  │   ┌──────────┐   ┌──────────┐     │
//!  │   │Connection│   │Connection│ ... │  retransmission, RTT, AIMD
//!  │   └──────────┘   └──────────┘     │
//!  └────────────────┬──────────────────┘
//!                   │ segments
//!  ┌────────────────▼──────────────────┐
//!  │           NetworkLayer            │  routing, forwarding, TTL, ICMP
//!  └────────────────┬──────────────────┘
//!                   │ datagrams
//!  ┌────────────────▼──────────────────┐
//!  │          LinkLayer (SLIP)         │  framing over a serial line
//!  └───────────────────────────────────┘
//! ```
//!
//! The protocol core is sans-I/O: state machines consume segments and
//! explicit timestamps and emit datagrams through the [`link::LinkLayer`]
//! trait, which makes every reliability mechanism testable without
//! sockets or sleeps. The [`driver`] module supplies the tokio event loop
//! that connects the core to a real byte stream.
//!
//! Each module has a single responsibility:
//! - [`checksum`]   — RFC 1071 sums (plain and pseudo-header)
//! - [`datagram`]   — network-layer wire format
//! - [`icmp`]       — Time-Exceeded diagnostic synthesis
//! - [`route`]      — CIDR parsing and longest-prefix match
//! - [`link`]       — link boundary trait and SLIP codec
//! - [`network`]    — routing, forwarding and local delivery
//! - [`segment`]    — transport-layer wire format
//! - [`timer`]      — RTT estimation and the retransmission timer
//! - [`congestion`] — AIMD congestion controller
//! - [`conn`]       — per-connection reliable-delivery state machine
//! - [`listener`]   — connection map, passive open, application events
//! - [`chat`]       — line-oriented chat service
//! - [`driver`]     — tokio event loop over a serial byte stream

pub mod chat;
pub mod checksum;
pub mod congestion;
pub mod conn;
pub mod datagram;
pub mod driver;
pub mod icmp;
pub mod link;
pub mod listener;
pub mod network;
pub mod route;
pub mod segment;
pub mod timer;

pub use conn::{Connection, State};
pub use listener::{ConnId, Event, Listener};
pub use network::NetworkLayer;
