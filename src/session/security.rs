use super::*;

/// SSH algorithm policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only.
    #[default]
    Secure,
    /// Adds widely deployed SHA-1 and CBC variants.
    Balanced,
    /// Everything russh can speak, for old device firmware.
    LegacyCompatible,
}

/// How the SSH leg of a NETCONF session is secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    /// Server host key verification.
    pub server_check: ServerCheckMethod,
    /// Drop the connection after this much silence. `None` keeps idle
    /// sessions open, which notification subscribers rely on.
    pub inactivity_timeout: Option<Duration>,
    /// Interval between SSH keepalives.
    pub keepalive_interval: Option<Duration>,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Modern algorithms, host key checked against `~/.ssh/known_hosts`.
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }

    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            ..Self::secure_default()
        }
    }

    /// Legacy algorithms and no host key check. Lab use only.
    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
            ..Self::secure_default()
        }
    }

    /// Checks the host key against a specific known_hosts file.
    pub fn with_known_hosts_file(mut self, path: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::KnownHostsFile(path.into());
        self
    }

    /// Pins the host key to a base64-encoded public key.
    pub fn with_host_key(mut self, key: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::PublicKey(key.into());
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub(super) fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = match self.level {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}
