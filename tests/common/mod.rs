#![allow(dead_code)]

use rnetconf::config::{BASE_1_0, BASE_1_1, NETCONF_NAMESPACE, SessionOptions};
use rnetconf::framing::{Framer, FramingMode};
use rnetconf::message::Message;
use rnetconf::session::{Session, SessionRecorder};
use rnetconf::xml::Document;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const BOTH_BASES: &[&str] = &[BASE_1_0, BASE_1_1];
pub const ONLY_1_0: &[&str] = &[BASE_1_0];
pub const SESSION_ID: u64 = 7;

/// Scripted NETCONF server on the far end of an in-memory duplex.
pub struct FakeDevice {
    stream: DuplexStream,
    framer: Framer,
    pub framing: FramingMode,
    pub chunk_size: usize,
}

impl FakeDevice {
    /// Returns the client end of the pipe and the device.
    pub fn pair() -> (DuplexStream, FakeDevice) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let device = FakeDevice {
            stream: server,
            framer: Framer::new(),
            framing: FramingMode::EndOfMessage,
            chunk_size: 4096,
        };
        (client, device)
    }

    /// Sends the server hello, reads the client hello and switches framing.
    /// Returns the client's capabilities.
    pub async fn hello(&mut self, capabilities: &[&str], session_id: u64) -> Vec<String> {
        let caps = capabilities
            .iter()
            .map(|cap| format!("<capability>{cap}</capability>"))
            .collect::<String>();
        let hello = format!(
            "<hello xmlns=\"{NETCONF_NAMESPACE}\"><capabilities>{caps}</capabilities><session-id>{session_id}</session-id></hello>"
        );
        self.send_raw(&FramingMode::EndOfMessage.encode(hello.as_bytes(), self.chunk_size))
            .await;

        let frame = self.recv().await.expect("client hello");
        let Message::Hello(client) = Message::parse(frame.as_bytes()).expect("client hello parses")
        else {
            panic!("client sent {frame} instead of hello");
        };
        assert_eq!(client.session_id, None, "client hello must not carry a session-id");

        let chunked = capabilities.contains(&BASE_1_1)
            && client.capabilities.iter().any(|cap| cap == BASE_1_1);
        self.framing = if chunked {
            FramingMode::Chunked
        } else {
            FramingMode::EndOfMessage
        };
        self.framer.upgrade(self.framing).expect("device upgrade");
        client.capabilities
    }

    /// Next complete message from the client, `None` once it closed the stream.
    pub async fn recv(&mut self) -> Option<String> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.framer.next_message().expect("client framing is valid") {
                return Some(String::from_utf8(frame.to_vec()).expect("utf-8 frame"));
            }
            let n = self.stream.read(&mut buf).await.expect("device read");
            if n == 0 {
                return None;
            }
            self.framer.push(&buf[..n]);
        }
    }

    /// Next `<rpc>` from the client with its message-id.
    pub async fn recv_rpc(&mut self) -> (u64, String) {
        let xml = self.recv().await.expect("rpc from client");
        let id = {
            let doc = Document::parse(&xml).expect("rpc is well formed");
            assert_eq!(doc.root().name, "rpc");
            doc.root()
                .attribute("message-id")
                .and_then(|id| id.parse().ok())
                .expect("numeric message-id")
        };
        (id, xml)
    }

    pub async fn send(&mut self, xml: &str) {
        let frame = self.framing.encode(xml.as_bytes(), self.chunk_size);
        self.send_raw(&frame).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("device write");
    }

    pub async fn reply(&mut self, message_id: u64, inner: &str) {
        self.send(&format!(
            "<rpc-reply message-id=\"{message_id}\" xmlns=\"{NETCONF_NAMESPACE}\">{inner}</rpc-reply>"
        ))
        .await;
    }

    pub async fn reply_ok(&mut self, message_id: u64) {
        self.reply(message_id, "<ok/>").await;
    }

    pub async fn notify(&mut self, event_time: &str, inner: &str) {
        self.send(&format!(
            "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\"><eventTime>{event_time}</eventTime>{inner}</notification>"
        ))
        .await;
    }
}

/// Opens a session against a fresh device advertising `capabilities`.
pub async fn open_session(
    capabilities: &[&str],
    options: SessionOptions,
    recorder: Option<SessionRecorder>,
) -> (Session, FakeDevice) {
    let (client, mut device) = FakeDevice::pair();
    let (session, _) = tokio::join!(
        Session::open_with_recorder(client, options, recorder),
        device.hello(capabilities, SESSION_ID)
    );
    (session.expect("session opens"), device)
}
