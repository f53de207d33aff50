//! Connection configuration, engine tunables and SSH algorithm tiers.
//!
//! [`ClientConfig`] describes how to reach a device and is validated before
//! dialing. [`SessionOptions`] holds the only knobs the session engine
//! exposes: timeouts and framing limits. The algorithm lists at the bottom
//! feed [`crate::session::ConnectionSecurityOptions`].

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::NetconfError;

/// IANA-assigned NETCONF over SSH port.
pub const DEFAULT_NETCONF_PORT: u16 = 830;

/// Connect timeout applied when the config leaves it unset.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Base capability for NETCONF 1.0 (end-of-message framing).
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// Base capability for NETCONF 1.1 (chunked framing).
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// Namespace of the NETCONF base protocol elements.
pub const NETCONF_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// SSH subsystem name NETCONF runs on.
pub const NETCONF_SUBSYSTEM: &str = "netconf";

/// Default upper bound for a single chunk, in bytes.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default upper bound for one incomplete message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Device address and credentials for a NETCONF connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClientConfig {
    /// Device hostname or IP address.
    pub host: String,

    /// SSH username.
    pub user: String,

    /// SSH password. May be empty when `key_file` is set.
    #[serde(default)]
    pub password: String,

    /// Private key file used instead of the password.
    #[serde(default)]
    pub key_file: Option<String>,

    /// Passphrase for `key_file`.
    #[serde(default)]
    pub key_passphrase: Option<String>,

    /// SSH port. 0 selects [`DEFAULT_NETCONF_PORT`].
    #[serde(default)]
    pub port: u16,

    /// Connect timeout in seconds. 0 selects [`DEFAULT_CONNECT_TIMEOUT_SECS`].
    #[serde(default)]
    pub timeout_secs: u64,
}

impl ClientConfig {
    /// Creates a password-authenticated config on the default port.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Checks required fields and fills in defaults.
    ///
    /// Returns the normalized config: port 0 becomes 830 and a zero timeout
    /// becomes 30 seconds.
    pub fn validate(mut self) -> Result<Self, NetconfError> {
        if self.host.trim().is_empty() {
            return Err(NetconfError::InvalidConfig("host is empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(NetconfError::InvalidConfig("user is empty".to_string()));
        }
        let has_key = self
            .key_file
            .as_deref()
            .is_some_and(|path| !path.trim().is_empty());
        if self.password.is_empty() && !has_key {
            return Err(NetconfError::InvalidConfig(
                "pass is empty and no key file given".to_string(),
            ));
        }
        if self.port == 0 {
            self.port = DEFAULT_NETCONF_PORT;
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = DEFAULT_CONNECT_TIMEOUT_SECS;
        }
        Ok(self)
    }

    /// Connect timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        let secs = if self.timeout_secs == 0 {
            DEFAULT_CONNECT_TIMEOUT_SECS
        } else {
            self.timeout_secs
        };
        Duration::from_secs(secs)
    }

    /// Cache key and log label, `user@host:port`.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Session engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Default deadline applied by [`crate::session::Session::submit`].
    /// `None` waits indefinitely.
    pub rpc_timeout: Option<Duration>,

    /// Time allowed for the peer's `<hello>` to arrive.
    pub hello_timeout: Duration,

    /// Time allowed for the `<close-session>` reply.
    pub close_timeout: Duration,

    /// Largest chunk accepted from the peer, and the split size for
    /// outgoing chunked messages.
    pub max_chunk_size: usize,

    /// Largest number of bytes buffered for one message before the
    /// terminator must appear.
    pub max_message_size: usize,

    /// Notifications buffered for the caller before new ones are dropped.
    pub notification_capacity: usize,

    /// Capabilities advertised in addition to base 1.0 and 1.1.
    pub capabilities: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rpc_timeout: Some(Duration::from_secs(30)),
            hello_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            notification_capacity: 256,
            capabilities: Vec::new(),
        }
    }
}

/// Modern key exchange algorithms only.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_G16_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Key exchange algorithms for mixed environments.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA256,
    kex::DH_G16_SHA512,
    kex::DH_G18_SHA512,
];

/// All supported key exchange algorithms in order of preference.
///
/// Includes legacy Diffie-Hellman variants for older devices.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub static SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub static BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

/// Every cipher russh offers, including unencrypted modes.
pub static LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CLEAR,
    cipher::NONE,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::NONE,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// All supported host key algorithms, legacy RSA and DSA included.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::SkEcdsaSha2NistP256,
    Algorithm::SkEd25519,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_fills_default_port_and_timeout() {
        let config = ClientConfig::new("10.0.0.1", "admin", "secret")
            .validate()
            .expect("valid config");
        assert_eq!(config.port, 830);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.device_addr(), "admin@10.0.0.1:830");
    }

    #[test]
    fn validate_keeps_explicit_port() {
        let mut config = ClientConfig::new("10.0.0.1", "admin", "secret");
        config.port = 2830;
        config.timeout_secs = 5;
        let config = config.validate().expect("valid config");
        assert_eq!(config.port, 2830);
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        for config in [
            ClientConfig::new("", "admin", "secret"),
            ClientConfig::new("10.0.0.1", "", "secret"),
            ClientConfig::new("10.0.0.1", "admin", ""),
        ] {
            let err = config.validate().expect_err("must be rejected");
            assert!(matches!(err, NetconfError::InvalidConfig(_)));
        }
    }

    #[test]
    fn key_file_replaces_password() {
        let mut config = ClientConfig::new("10.0.0.1", "admin", "");
        config.key_file = Some("/home/admin/.ssh/id_ed25519".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"host":"r1","user":"ops","password":"pw"}"#)
                .expect("parse config");
        let config = config.validate().expect("valid");
        assert_eq!(config.port, DEFAULT_NETCONF_PORT);
        assert!(config.key_file.is_none());
    }
}
