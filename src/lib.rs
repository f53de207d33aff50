//! # rnetconf - NETCONF over SSH Session Engine
//!
//! `rnetconf` runs the client side of a NETCONF session: it exchanges
//! `<hello>` messages, switches to RFC 6242 chunked framing when both peers
//! speak base 1.1, and correlates any number of concurrently submitted RPCs
//! with their replies by `message-id`.
//!
//! ## Features
//!
//! - **Framing**: incremental end-of-message and chunked decoders with size limits
//! - **Negotiation**: capability exchange and base version selection
//! - **Pipelining**: concurrent RPCs over one session, replies in any order
//! - **Per-request Deadlines**: a timeout affects only the request it belongs to
//! - **Lifecycle**: explicit `idle -> negotiating -> active -> closing -> closed | failed` states
//! - **Session Cache**: reuse of SSH-backed sessions through [`session::MANAGER`]
//! - **Recording**: JSONL session recordings and offline RPC replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rnetconf::config::{ClientConfig, SessionOptions};
//! use rnetconf::session::{ConnectionSecurityOptions, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("192.168.1.1", "admin", "password");
//!     let session = Session::connect(
//!         config,
//!         &ConnectionSecurityOptions::default(),
//!         SessionOptions::default(),
//!     )
//!     .await?;
//!
//!     // Two RPCs in flight at once.
//!     let running = session.submit("<get-config><source><running/></source></get-config>").await?;
//!     let state = session.submit("<get/>").await?;
//!
//!     println!("running: {:?}", running.wait().await?.data);
//!     println!("state: {:?}", state.wait().await?.data);
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::Session`] - one NETCONF session over any byte-stream transport
//! - [`session::NetconfManager`] - cache of SSH-backed sessions
//! - [`framing::Framer`] - incremental message framing
//! - [`message::Message`] - classified hello, reply and notification envelopes
//! - [`error::NetconfError`] - error types for every layer
//! - [`config`] - client configuration, tunables and SSH algorithm lists

pub mod config;
pub mod error;
pub mod framing;
pub mod message;
pub mod session;
pub mod xml;
