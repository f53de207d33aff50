//! NETCONF message framing.
//!
//! Two framings exist on the wire:
//!
//! - **End-of-message** (NETCONF 1.0, and always for `<hello>`): the payload
//!   followed by the literal marker `]]>]]>`.
//! - **Chunked** (RFC 6242, NETCONF 1.1): one or more chunks of the form
//!   `\n#<size>\n<data>`, terminated by `\n##\n`.
//!
//! [`Framer`] decodes a byte stream incrementally. Bytes may arrive split at
//! any position; complete messages are drained with [`Framer::next_message`]
//! and any remainder is kept for the next push.
//!
//! ```
//! use rnetconf::framing::{Framer, FramingMode};
//!
//! let mut framer = Framer::new();
//! let wire = FramingMode::EndOfMessage.encode(b"<hello/>", 1024);
//! let (head, tail) = wire.split_at(3);
//! assert!(framer.feed(head).unwrap().is_empty());
//! let messages = framer.feed(tail).unwrap();
//! assert_eq!(&messages[0][..], b"<hello/>");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use log::trace;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::NetconfError;

/// End-of-message marker used by NETCONF 1.0 framing.
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

/// Terminator of a chunked message.
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size RFC 6242 permits.
pub const MAX_RFC_CHUNK_SIZE: u64 = 4_294_967_295;

// "4294967295" is ten digits.
const MAX_CHUNK_SIZE_DIGITS: usize = 10;

/// Wire framing in effect for a direction of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// Payload terminated by `]]>]]>`.
    EndOfMessage,
    /// RFC 6242 length-prefixed chunks.
    Chunked,
}

impl FramingMode {
    /// Encodes one payload into a complete frame.
    ///
    /// In chunked mode the payload is split into chunks of at most
    /// `max_chunk_size` bytes.
    pub fn encode(self, payload: &[u8], max_chunk_size: usize) -> Bytes {
        match self {
            FramingMode::EndOfMessage => {
                let mut out = BytesMut::with_capacity(payload.len() + END_OF_MESSAGE.len());
                out.put_slice(payload);
                out.put_slice(END_OF_MESSAGE);
                out.freeze()
            }
            FramingMode::Chunked => {
                let chunk_size = max_chunk_size.clamp(1, MAX_RFC_CHUNK_SIZE as usize);
                let chunks = payload.len().div_ceil(chunk_size);
                let mut out = BytesMut::with_capacity(payload.len() + chunks * 14 + 4);
                for chunk in payload.chunks(chunk_size) {
                    out.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
                    out.put_slice(chunk);
                }
                out.put_slice(END_OF_CHUNKS);
                out.freeze()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    /// Expecting `\n#<size>\n` or `\n##\n`.
    Header,
    /// Inside a chunk body with this many bytes left.
    Body { remaining: usize },
}

/// Streaming encoder/decoder for one session.
///
/// Starts in end-of-message mode. [`Framer::upgrade`] fixes the mode used
/// after the hello exchange and may be called only once.
#[derive(Debug)]
pub struct Framer {
    mode: FramingMode,
    upgraded: bool,
    /// Undecoded bytes from the transport.
    buffer: BytesMut,
    /// Chunk bodies of the message being assembled.
    message: BytesMut,
    chunk_state: ChunkState,
    /// Bytes of `buffer` already searched for the end-of-message marker.
    scanned: usize,
    max_chunk_size: usize,
    max_message_size: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Creates a framer in end-of-message mode with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates a framer with custom chunk and message limits.
    pub fn with_limits(max_chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            mode: FramingMode::EndOfMessage,
            upgraded: false,
            buffer: BytesMut::with_capacity(8 * 1024),
            message: BytesMut::new(),
            chunk_state: ChunkState::Header,
            scanned: 0,
            max_chunk_size,
            max_message_size,
        }
    }

    /// Current framing mode.
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Sets the framing used after the hello exchange.
    ///
    /// Bytes already buffered but not yet decoded are interpreted with the
    /// new mode. Calling this a second time is an error: the framing of a
    /// session is fixed once negotiated.
    pub fn upgrade(&mut self, mode: FramingMode) -> Result<(), NetconfError> {
        if self.upgraded {
            return Err(NetconfError::Framing(format!(
                "framing already fixed to {:?}",
                self.mode
            )));
        }
        self.upgraded = true;
        self.mode = mode;
        self.scanned = 0;
        self.chunk_state = ChunkState::Header;
        self.message.clear();
        Ok(())
    }

    /// Encodes a payload with the current mode.
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        self.mode.encode(payload, self.max_chunk_size)
    }

    /// Appends transport bytes without decoding.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends transport bytes and drains every complete message.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Bytes>, NetconfError> {
        self.push(data);
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Decodes the next complete message, if the buffer holds one.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, NetconfError> {
        match self.mode {
            FramingMode::EndOfMessage => self.next_end_of_message(),
            FramingMode::Chunked => self.next_chunked(),
        }
    }

    /// Number of buffered, undecoded bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.message.len()
    }

    fn next_end_of_message(&mut self) -> Result<Option<Bytes>, NetconfError> {
        // Resume a little before the last scan end so a marker split
        // across pushes is still found.
        let start = self.scanned.saturating_sub(END_OF_MESSAGE.len() - 1);
        let found = self.buffer[start..]
            .windows(END_OF_MESSAGE.len())
            .position(|window| window == END_OF_MESSAGE)
            .map(|pos| start + pos);

        match found {
            Some(pos) => {
                let message = self.buffer.split_to(pos).freeze();
                let _ = self.buffer.split_to(END_OF_MESSAGE.len());
                self.scanned = 0;
                trace!("decoded end-of-message frame of {} bytes", message.len());
                Ok(Some(message))
            }
            None => {
                if self.buffer.len() > self.max_message_size {
                    return Err(NetconfError::Framing(format!(
                        "no end-of-message marker within {} bytes",
                        self.max_message_size
                    )));
                }
                self.scanned = self.buffer.len();
                Ok(None)
            }
        }
    }

    fn next_chunked(&mut self) -> Result<Option<Bytes>, NetconfError> {
        loop {
            match self.chunk_state {
                ChunkState::Header => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buffer[..2] != b"\n#" {
                        return Err(NetconfError::Framing(format!(
                            "malformed chunk header starting with {:?}",
                            String::from_utf8_lossy(&self.buffer[..2])
                        )));
                    }
                    if self.buffer.len() < 3 {
                        return Ok(None);
                    }
                    if self.buffer[2] == b'#' {
                        if self.buffer.len() < END_OF_CHUNKS.len() {
                            return Ok(None);
                        }
                        if self.buffer[3] != b'\n' {
                            return Err(NetconfError::Framing(
                                "malformed end-of-chunks marker".to_string(),
                            ));
                        }
                        let _ = self.buffer.split_to(END_OF_CHUNKS.len());
                        let message = self.message.split().freeze();
                        trace!("decoded chunked frame of {} bytes", message.len());
                        return Ok(Some(message));
                    }

                    let window_end = self.buffer.len().min(2 + MAX_CHUNK_SIZE_DIGITS + 1);
                    let Some(newline) = self.buffer[2..window_end]
                        .iter()
                        .position(|b| *b == b'\n')
                        .map(|pos| pos + 2)
                    else {
                        if self.buffer.len() > 2 + MAX_CHUNK_SIZE_DIGITS {
                            return Err(NetconfError::Framing(
                                "chunk size has too many digits".to_string(),
                            ));
                        }
                        return Ok(None);
                    };

                    let size = parse_chunk_size(&self.buffer[2..newline])?;
                    if size > self.max_chunk_size as u64 {
                        return Err(NetconfError::Framing(format!(
                            "chunk of {size} bytes exceeds maximum {}",
                            self.max_chunk_size
                        )));
                    }
                    let size = size as usize;
                    if self.message.len() + size > self.max_message_size {
                        return Err(NetconfError::Framing(format!(
                            "chunked message exceeds {} bytes",
                            self.max_message_size
                        )));
                    }
                    let _ = self.buffer.split_to(newline + 1);
                    self.chunk_state = ChunkState::Body { remaining: size };
                }
                ChunkState::Body { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(self.buffer.len());
                    let data = self.buffer.split_to(take);
                    self.message.extend_from_slice(&data);
                    self.chunk_state = if take == remaining {
                        ChunkState::Header
                    } else {
                        ChunkState::Body {
                            remaining: remaining - take,
                        }
                    };
                }
            }
        }
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<u64, NetconfError> {
    let valid = !digits.is_empty()
        && digits.len() <= MAX_CHUNK_SIZE_DIGITS
        && digits[0] != b'0'
        && digits.iter().all(u8::is_ascii_digit);
    if !valid {
        return Err(NetconfError::Framing(format!(
            "invalid chunk size {:?}",
            String::from_utf8_lossy(digits)
        )));
    }
    let size = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    if size > MAX_RFC_CHUNK_SIZE {
        return Err(NetconfError::Framing(format!(
            "chunk size {size} out of range"
        )));
    }
    Ok(size)
}
