//! NETCONF envelopes.
//!
//! Incoming frames are classified into [`Message`]s by their root element.
//! Only what the engine needs is extracted: capabilities and session-id from
//! `<hello>`, the `message-id` and any `<rpc-error>` entries from
//! `<rpc-reply>`, and the event time of `<notification>`. The original XML
//! is always kept so callers can interpret payloads themselves.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::NETCONF_NAMESPACE;
use crate::error::NetconfError;
use crate::xml::{Document, escape};

/// A decoded, classified NETCONF message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Reply(Reply),
    Notification(Notification),
}

impl Message {
    /// Parses one decoded frame.
    pub fn parse(frame: &[u8]) -> Result<Self, NetconfError> {
        let xml = std::str::from_utf8(frame).map_err(|e| {
            NetconfError::ProtocolContent(format!("message is not valid utf-8: {e}"))
        })?;
        let doc = Document::parse(xml)?;
        match doc.root().name.as_str() {
            "hello" => Ok(Message::Hello(Hello::from_document(&doc)?)),
            "rpc-reply" => Ok(Message::Reply(Reply::from_document(xml, &doc))),
            "notification" => Ok(Message::Notification(Notification {
                event_time: doc.text_of("eventTime"),
                xml: xml.to_string(),
            })),
            other => Err(NetconfError::ProtocolContent(format!(
                "unexpected root element <{other}>"
            ))),
        }
    }
}

/// Contents of a peer's `<hello>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Capabilities in the order the peer advertised them.
    pub capabilities: Vec<String>,
    /// Session identifier, present only in a server hello.
    pub session_id: Option<u64>,
}

impl Hello {
    fn from_document(doc: &Document<'_>) -> Result<Self, NetconfError> {
        let list = doc.find("capabilities").ok_or_else(|| {
            NetconfError::ProtocolContent("hello has no <capabilities> element".to_string())
        })?;
        let capabilities = doc
            .descendants(list)
            .filter(|el| el.name == "capability")
            .map(|el| doc.text(el))
            .filter(|cap| !cap.is_empty())
            .collect::<Vec<_>>();
        if capabilities.is_empty() {
            return Err(NetconfError::ProtocolContent(
                "hello advertises no capabilities".to_string(),
            ));
        }
        let session_id = match doc.text_of("session-id") {
            Some(text) => Some(text.parse::<u64>().map_err(|_| {
                NetconfError::ProtocolContent(format!("invalid session-id {text:?}"))
            })?),
            None => None,
        };
        Ok(Self {
            capabilities,
            session_id,
        })
    }
}

/// One `<rpc-error>` entry of a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RpcError {
    pub error_type: String,
    pub error_tag: String,
    pub error_severity: String,
    pub error_path: Option<String>,
    pub error_message: Option<String>,
}

impl RpcError {
    /// True for severity `error`; `warning` entries do not fail the RPC.
    pub fn is_error(&self) -> bool {
        !self.error_severity.eq_ignore_ascii_case("warning")
    }
}

/// A correlated `<rpc-reply>`.
///
/// Replies carrying `<rpc-error>` are still replies: the RPC reached the
/// device and the device answered. Use [`Reply::is_ok`] to check the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Reply {
    /// `message-id` attribute as sent by the peer.
    pub message_id: Option<String>,
    /// Whether the reply contains `<ok/>`.
    pub ok: bool,
    /// Inner XML of `<data>`, when present.
    pub data: Option<String>,
    pub errors: Vec<RpcError>,
    /// The complete reply document.
    pub xml: String,
}

impl Reply {
    fn from_document(xml: &str, doc: &Document<'_>) -> Self {
        let root = doc.root();
        let errors = doc
            .find_all("rpc-error")
            .map(|err| {
                let field = |name: &str| {
                    doc.descendants(err)
                        .find(|el| el.name == name)
                        .map(|el| doc.text(el))
                };
                RpcError {
                    error_type: field("error-type").unwrap_or_default(),
                    error_tag: field("error-tag").unwrap_or_default(),
                    error_severity: field("error-severity").unwrap_or_default(),
                    error_path: field("error-path"),
                    error_message: field("error-message"),
                }
            })
            .collect();

        Self {
            message_id: root.attribute("message-id").map(str::to_string),
            ok: doc
                .find_all("ok")
                .any(|el| el.depth == root.depth + 1),
            data: doc
                .find_all("data")
                .find(|el| el.depth == root.depth + 1)
                .map(|el| doc.inner_xml(el).to_string()),
            errors,
            xml: xml.to_string(),
        }
    }

    /// Parses the `message-id` as the numeric id this engine assigns.
    pub fn numeric_id(&self) -> Option<u64> {
        self.message_id.as_deref()?.trim().parse().ok()
    }

    /// True unless an `<rpc-error>` of severity `error` is present.
    pub fn is_ok(&self) -> bool {
        !self.errors.iter().any(RpcError::is_error)
    }

    /// True if any `<rpc-error>` entry is present, warnings included.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A peer-initiated `<notification>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    /// `<eventTime>` text, when present.
    pub event_time: Option<String>,
    /// The complete notification document.
    pub xml: String,
}

impl Notification {
    /// Session id of a `netconf-session-end` event, if this is one.
    pub fn ended_session_id(&self) -> Option<u64> {
        let doc = Document::parse(&self.xml).ok()?;
        let end = doc.find("netconf-session-end")?;
        doc.descendants(end)
            .find(|el| el.name == "session-id")
            .and_then(|el| doc.text(el).parse().ok())
    }
}

/// Builds the local `<hello>` advertising `capabilities`.
pub fn hello_xml<S: AsRef<str>>(capabilities: &[S]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<hello xmlns=\"{NETCONF_NAMESPACE}\"><capabilities>"
    );
    for cap in capabilities {
        xml.push_str("<capability>");
        xml.push_str(&escape(cap.as_ref()));
        xml.push_str("</capability>");
    }
    xml.push_str("</capabilities></hello>");
    xml
}

/// Wraps a caller-supplied body in an `<rpc>` envelope.
pub fn rpc_xml(message_id: u64, body: &str) -> String {
    format!("<rpc message-id=\"{message_id}\" xmlns=\"{NETCONF_NAMESPACE}\">{body}</rpc>")
}

/// Body of the graceful close RPC.
pub const CLOSE_SESSION: &str = "<close-session/>";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_hello() {
        let xml = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>http://example.com/m?module=m&amp;revision=2024-01-01</capability>
  </capabilities>
  <session-id>4711</session-id>
</hello>"#;
        let Message::Hello(hello) = Message::parse(xml.as_bytes()).expect("parse") else {
            panic!("expected hello");
        };
        assert_eq!(hello.session_id, Some(4711));
        assert_eq!(hello.capabilities.len(), 3);
        assert_eq!(
            hello.capabilities[2],
            "http://example.com/m?module=m&revision=2024-01-01"
        );
    }

    #[test]
    fn hello_without_capabilities_is_rejected() {
        let err = Message::parse(b"<hello><session-id>1</session-id></hello>")
            .expect_err("missing capabilities");
        assert!(matches!(err, NetconfError::ProtocolContent(_)));
    }

    #[test]
    fn reply_with_rpc_error_is_still_a_reply() {
        let xml = r#"<rpc-reply message-id="3" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <rpc-error>
    <error-type>application</error-type>
    <error-tag>invalid-value</error-tag>
    <error-severity>error</error-severity>
    <error-message xml:lang="en">bad interface name</error-message>
  </rpc-error>
</rpc-reply>"#;
        let Message::Reply(reply) = Message::parse(xml.as_bytes()).expect("parse") else {
            panic!("expected reply");
        };
        assert_eq!(reply.numeric_id(), Some(3));
        assert!(!reply.is_ok());
        assert_eq!(reply.errors[0].error_tag, "invalid-value");
        assert_eq!(
            reply.errors[0].error_message.as_deref(),
            Some("bad interface name")
        );
    }

    #[test]
    fn warnings_do_not_fail_reply() {
        let xml = r#"<rpc-reply message-id="9"><rpc-error><error-type>application</error-type><error-tag>x</error-tag><error-severity>warning</error-severity></rpc-error><ok/></rpc-reply>"#;
        let Message::Reply(reply) = Message::parse(xml.as_bytes()).expect("parse") else {
            panic!("expected reply");
        };
        assert!(reply.ok);
        assert!(reply.is_ok());
        assert!(reply.has_errors());
    }

    #[test]
    fn reply_exposes_data_content() {
        let xml = r#"<rpc-reply message-id="5"><data><top><ok/></top></data></rpc-reply>"#;
        let Message::Reply(reply) = Message::parse(xml.as_bytes()).expect("parse") else {
            panic!("expected reply");
        };
        assert!(!reply.ok);
        assert_eq!(reply.data.as_deref(), Some("<top><ok/></top>"));
    }

    #[test]
    fn notification_detects_session_end() {
        let xml = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
  <eventTime>2026-10-18T10:00:00Z</eventTime>
  <netconf-session-end xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-notifications">
    <username>admin</username>
    <session-id>12</session-id>
    <termination-reason>killed</termination-reason>
  </netconf-session-end>
</notification>"#;
        let Message::Notification(notification) = Message::parse(xml.as_bytes()).expect("parse")
        else {
            panic!("expected notification");
        };
        assert_eq!(
            notification.event_time.as_deref(),
            Some("2026-10-18T10:00:00Z")
        );
        assert_eq!(notification.ended_session_id(), Some(12));
    }

    #[test]
    fn unknown_root_is_protocol_error() {
        let err = Message::parse(b"<rpc message-id=\"1\"/>").expect_err("not a reply");
        assert!(matches!(err, NetconfError::ProtocolContent(_)));
    }

    #[test]
    fn envelopes_round_trip_through_scanner() {
        let hello = hello_xml(&["urn:ietf:params:netconf:base:1.0", "urn:x?a=1&b=2"]);
        let doc = Document::parse(&hello).expect("hello well formed");
        assert_eq!(doc.find_all("capability").count(), 2);

        let rpc = rpc_xml(17, "<get/>");
        let doc = Document::parse(&rpc).expect("rpc well formed");
        assert_eq!(doc.root().attribute("message-id"), Some("17"));
    }
}
