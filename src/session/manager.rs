use super::*;

/// Global session manager.
pub static MANAGER: Lazy<NetconfManager> = Lazy::new(NetconfManager::new);

/// Connection parameters a cached session was opened with.
#[derive(Clone)]
struct ConnectionParams {
    password_hash: [u8; 32],
    key_file: Option<String>,
    timeout_secs: u64,
    security: ConnectionSecurityOptions,
    options: SessionOptions,
}

impl ConnectionParams {
    fn new(
        config: &ClientConfig,
        security: &ConnectionSecurityOptions,
        options: &SessionOptions,
    ) -> Self {
        Self {
            password_hash: password_hash(&config.password),
            key_file: config.key_file.clone(),
            timeout_secs: config.timeout_secs,
            security: security.clone(),
            options: options.clone(),
        }
    }

    fn matches(&self, other: &ConnectionParams) -> bool {
        if self.password_hash != other.password_hash {
            debug!("password hash mismatch");
            return false;
        }
        if self.key_file != other.key_file || self.timeout_secs != other.timeout_secs {
            debug!("credential or timeout mismatch");
            return false;
        }
        if self.security != other.security {
            debug!("security options mismatch");
            return false;
        }
        if self.options != other.options {
            debug!("session options mismatch");
            return false;
        }
        true
    }
}

/// SHA-256 of the password; cached sessions never keep the plain text.
fn password_hash(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Cache of SSH-backed NETCONF sessions keyed by `user@host:port`.
///
/// A cached session is reused while it is active and was opened with the
/// same credentials and options. Sessions idle for five minutes are evicted.
pub struct NetconfManager {
    cache: Cache<String, (Arc<Session>, ConnectionParams)>,
}

impl NetconfManager {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(100)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();
        Self { cache }
    }

    /// Gets a cached session or opens a new one with default options.
    pub async fn get(&self, config: ClientConfig) -> Result<Arc<Session>, NetconfError> {
        self.get_with_security(
            config,
            ConnectionSecurityOptions::default(),
            SessionOptions::default(),
        )
        .await
    }

    /// Gets a cached session or opens a new one with explicit options.
    pub async fn get_with_security(
        &self,
        config: ClientConfig,
        security: ConnectionSecurityOptions,
        options: SessionOptions,
    ) -> Result<Arc<Session>, NetconfError> {
        let config = config.validate()?;
        let device_addr = config.device_addr();
        let params = ConnectionParams::new(&config, &security, &options);

        if let Some((session, cached)) = self.cache.get(&device_addr).await {
            if session.is_active() && cached.matches(&params) {
                debug!("reusing cached netconf session for {device_addr}");
                return Ok(session);
            }
            debug!(
                "cached netconf session for {device_addr} is {} or stale, replacing",
                session.state()
            );
            self.evict(&device_addr, session).await;
        } else {
            debug!("cache miss, opening netconf session for {device_addr}");
        }

        self.open(config, device_addr, params, None).await
    }

    /// Opens a fresh, recorded session and caches it in place of any
    /// existing one for the same device.
    pub async fn get_with_recording(
        &self,
        config: ClientConfig,
        level: SessionRecordLevel,
    ) -> Result<(Arc<Session>, SessionRecorder), NetconfError> {
        let config = config.validate()?;
        let device_addr = config.device_addr();
        let security = ConnectionSecurityOptions::default();
        let options = SessionOptions::default();
        let params = ConnectionParams::new(&config, &security, &options);

        if let Some((session, _)) = self.cache.get(&device_addr).await {
            self.evict(&device_addr, session).await;
        }

        let recorder = SessionRecorder::new(level);
        let session = self
            .open(config, device_addr, params, Some(recorder.clone()))
            .await?;
        Ok((session, recorder))
    }

    /// Runs one RPC on the managed session for `config`.
    pub async fn execute(&self, config: ClientConfig, body: &str) -> Result<Reply, NetconfError> {
        let session = self.get(config).await?;
        session.execute(body).await
    }

    /// Gracefully closes and forgets the session for `device_addr`.
    ///
    /// Returns `Ok` if no session was cached.
    pub async fn close(&self, device_addr: &str) -> Result<(), NetconfError> {
        let Some((session, _)) = self.cache.remove(device_addr).await else {
            return Ok(());
        };
        if session.is_active() {
            session.close().await?;
        }
        Ok(())
    }

    /// Number of cached sessions.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn open(
        &self,
        config: ClientConfig,
        device_addr: String,
        params: ConnectionParams,
        recorder: Option<SessionRecorder>,
    ) -> Result<Arc<Session>, NetconfError> {
        let session = Session::connect_with_recorder(
            config,
            &params.security,
            params.options.clone(),
            recorder,
        )
        .await?;
        let session = Arc::new(session);
        self.cache
            .insert(device_addr.clone(), (session.clone(), params))
            .await;
        debug!("netconf session for {device_addr} cached");
        Ok(session)
    }

    async fn evict(&self, device_addr: &str, session: Arc<Session>) {
        self.cache.invalidate(device_addr).await;
        if !session.is_active() {
            return;
        }
        if let Err(err) = session.close().await {
            debug!("error closing replaced session {device_addr}: {err}");
        }
    }
}

impl Default for NetconfManager {
    fn default() -> Self {
        Self::new()
    }
}
