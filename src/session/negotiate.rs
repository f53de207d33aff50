//! `<hello>` exchange.
//!
//! Both sides send a hello using end-of-message framing. If both advertise
//! base 1.1 all later traffic uses chunked framing, otherwise it stays on
//! end-of-message framing (base 1.0).

use super::*;

/// NETCONF base protocol version in effect after the hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl ProtocolVersion {
    /// Framing used for every message after the hello.
    pub fn framing(self) -> FramingMode {
        match self {
            ProtocolVersion::V1_0 => FramingMode::EndOfMessage,
            ProtocolVersion::V1_1 => FramingMode::Chunked,
        }
    }
}

/// Outcome of a successful hello exchange. Fixed for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Session id assigned by the server.
    pub session_id: Option<u64>,
    pub version: ProtocolVersion,
    pub framing: FramingMode,
    /// Capabilities the peer advertised, in order.
    pub peer_capabilities: Vec<String>,
}

impl SessionInfo {
    /// Whether the peer advertised `capability`. Parameters after `?` are ignored.
    pub fn peer_supports(&self, capability: &str) -> bool {
        self.peer_capabilities
            .iter()
            .any(|cap| cap.split('?').next() == Some(capability))
    }
}

/// Picks the protocol version from both capability lists.
///
/// Base 1.1 is used only when both sides advertise it. Anything else,
/// including a peer that names no base capability at all, falls back to 1.0.
pub fn select_version<L, P>(local: &[L], peer: &[P]) -> ProtocolVersion
where
    L: AsRef<str>,
    P: AsRef<str>,
{
    let local = local.iter().map(|cap| cap.as_ref()).collect::<Vec<&str>>();
    let peer = peer.iter().map(|cap| cap.as_ref()).collect::<Vec<&str>>();

    if advertises(&local, config::BASE_1_1) && advertises(&peer, config::BASE_1_1) {
        ProtocolVersion::V1_1
    } else {
        ProtocolVersion::V1_0
    }
}

fn advertises(capabilities: &[&str], base: &str) -> bool {
    capabilities
        .iter()
        .any(|cap| cap.split('?').next().map(str::trim) == Some(base))
}

/// Capabilities this client advertises.
pub(super) fn local_capabilities(options: &SessionOptions) -> Vec<String> {
    let mut capabilities = vec![config::BASE_1_0.to_string(), config::BASE_1_1.to_string()];
    for cap in &options.capabilities {
        if !capabilities.contains(cap) {
            capabilities.push(cap.clone());
        }
    }
    capabilities
}

/// Sends the local hello and reads the peer's.
///
/// The framer must still be in end-of-message mode. Bytes the peer sent
/// after its hello stay buffered in the framer.
pub(super) async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    framer: &mut Framer,
    options: &SessionOptions,
) -> Result<SessionInfo, NetconfError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let local = local_capabilities(options);
    let hello =
        FramingMode::EndOfMessage.encode(hello_xml(&local).as_bytes(), options.max_chunk_size);
    writer.write_all(&hello).await?;
    writer.flush().await?;
    trace!("sent hello advertising {} capabilities", local.len());

    let frame = tokio::time::timeout(options.hello_timeout, read_hello(reader, framer))
        .await
        .map_err(|_| {
            NetconfError::Negotiation(format!(
                "no hello received within {:?}",
                options.hello_timeout
            ))
        })??;

    let peer = match Message::parse(&frame) {
        Ok(Message::Hello(hello)) => hello,
        Ok(other) => {
            return Err(NetconfError::Negotiation(format!(
                "expected <hello>, got {}",
                match other {
                    Message::Reply(_) => "<rpc-reply>",
                    Message::Notification(_) => "<notification>",
                    Message::Hello(_) => "<hello>",
                }
            )));
        }
        Err(err) => return Err(NetconfError::Negotiation(err.to_string())),
    };

    let version = select_version(&local, &peer.capabilities);
    let peer_caps = peer.capabilities.iter().map(String::as_str).collect::<Vec<_>>();
    if !advertises(&peer_caps, config::BASE_1_0) && !advertises(&peer_caps, config::BASE_1_1) {
        warn!("peer hello names no base capability, assuming base 1.0");
    }
    if peer.session_id.is_none() {
        warn!("peer hello carries no session-id");
    }
    debug!(
        "hello exchanged: session-id {:?}, version {:?}, {} peer capabilities",
        peer.session_id,
        version,
        peer.capabilities.len()
    );

    Ok(SessionInfo {
        session_id: peer.session_id,
        version,
        framing: version.framing(),
        peer_capabilities: peer.capabilities,
    })
}

async fn read_hello<R>(reader: &mut R, framer: &mut Framer) -> Result<bytes::Bytes, NetconfError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        if let Some(frame) = framer.next_message()? {
            return Ok(frame);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(NetconfError::Negotiation(
                "transport closed before hello was received".to_string(),
            ));
        }
        framer.push(&buf[..n]);
    }
}
