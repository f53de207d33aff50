//! NETCONF session engine.
//!
//! This module ties the framer, the capability negotiator and the message
//! correlator together behind [`Session`]. A session owns one transport:
//! a dedicated reader task decodes frames and routes replies to waiters,
//! while callers submit RPCs concurrently through a single serialized
//! writer.
//!
//! # Main Components
//!
//! - [`Session`] - open / submit / execute / close over any [`Transport`]
//! - [`PendingReply`] - handle to one in-flight RPC
//! - [`SessionState`] - lifecycle state machine
//! - [`NetconfManager`] - cache of SSH-backed sessions (singleton via `MANAGER`)
//! - [`SessionRecorder`] / [`SessionReplayer`] - JSONL recording and offline replay

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace, warn};
use moka::future::Cache;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{self, ClientConfig, SessionOptions};
use crate::error::NetconfError;
use crate::framing::{Framer, FramingMode};
use crate::message::{CLOSE_SESSION, Message, Notification, Reply, hello_xml, rpc_xml};

pub use correlator::PendingReply;
pub use manager::{MANAGER, NetconfManager};
pub use negotiate::{ProtocolVersion, SessionInfo, select_version};
pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
    SessionReplayer,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::SshTransport;
pub use state::SessionState;

use correlator::Correlator;

/// The byte stream a session runs over.
///
/// Any reliable, ordered, bidirectional stream works: an SSH `netconf`
/// subsystem channel ([`SshTransport`]), a TCP socket, or an in-memory
/// duplex in tests. Shutting down the write side closes the stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

type BoxedTransport = Box<dyn Transport>;

/// One open NETCONF conversation with a device.
pub struct Session {
    info: SessionInfo,
    options: SessionOptions,
    core: Arc<Correlator>,
    writer: tokio::sync::Mutex<WriteHalf<BoxedTransport>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
    recorder: Option<SessionRecorder>,
}

mod client;
mod correlator;
mod manager;
mod negotiate;
mod recording;
mod security;
mod ssh;
mod state;
