use super::*;

const READ_BUFFER_SIZE: usize = 16 * 1024;

impl Session {
    /// Runs the `<hello>` exchange over `transport` and starts the reader.
    ///
    /// On success the session is `active`. On failure the transport is shut
    /// down and the error returned; no session exists.
    pub async fn open<T: Transport>(
        transport: T,
        options: SessionOptions,
    ) -> Result<Self, NetconfError> {
        Self::open_with_recorder(transport, options, None).await
    }

    /// Same as [`Session::open`], recording session events into `recorder`.
    pub async fn open_with_recorder<T: Transport>(
        transport: T,
        options: SessionOptions,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, NetconfError> {
        let (core, notifications) =
            Correlator::new(options.notification_capacity, recorder.clone());
        let core = Arc::new(core);

        let transport: BoxedTransport = Box::new(transport);
        let (mut reader, mut writer) = tokio::io::split(transport);
        let mut framer = Framer::with_limits(options.max_chunk_size, options.max_message_size);

        core.transition(SessionState::Negotiating, "open")?;
        let negotiated = negotiate::negotiate(&mut reader, &mut writer, &mut framer, &options)
            .await
            .and_then(|info| framer.upgrade(info.framing).map(|()| info));
        let info = match negotiated {
            Ok(info) => info,
            Err(err) => {
                core.fail(err.to_string());
                let _ = writer.shutdown().await;
                return Err(err);
            }
        };

        core.set_session_id(info.session_id);
        core.transition(SessionState::Active, "open")?;
        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::SessionOpened {
                session_id: info.session_id,
                framing: info.framing,
                capabilities: info.peer_capabilities.clone(),
            });
        }
        debug!(
            "netconf session {:?} active using {:?} framing",
            info.session_id, info.framing
        );

        let handle = tokio::spawn(read_loop(reader, framer, core.clone(), recorder.clone()));

        Ok(Self {
            info,
            options,
            core,
            writer: tokio::sync::Mutex::new(writer),
            reader: Mutex::new(Some(handle)),
            notifications: Mutex::new(Some(notifications)),
            recorder,
        })
    }

    /// Dials the device over SSH, opens the `netconf` subsystem and runs
    /// [`Session::open`] on the resulting channel.
    pub async fn connect(
        config: ClientConfig,
        security: &ConnectionSecurityOptions,
        options: SessionOptions,
    ) -> Result<Self, NetconfError> {
        Self::connect_with_recorder(config, security, options, None).await
    }

    pub async fn connect_with_recorder(
        config: ClientConfig,
        security: &ConnectionSecurityOptions,
        options: SessionOptions,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, NetconfError> {
        let transport = ssh::connect(config, security).await?;
        Self::open_with_recorder(transport, options, recorder).await
    }

    /// Negotiated parameters.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn session_id(&self) -> Option<u64> {
        self.info.session_id
    }

    pub fn framing(&self) -> FramingMode {
        self.info.framing
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Why the session failed, once it has.
    pub fn failure(&self) -> Option<String> {
        self.core.failure()
    }

    /// Number of RPCs still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.core.pending_len()
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    /// Takes the notification stream. Returns `None` after the first call.
    ///
    /// Notifications that arrive while the channel is full, or after the
    /// receiver is dropped, are discarded.
    pub fn notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Sends `body` inside an `<rpc>` envelope using the default RPC timeout.
    ///
    /// Returns once the request is on the wire. Await the reply with
    /// [`PendingReply::wait`]; any number of requests may be in flight.
    pub async fn submit(&self, body: &str) -> Result<PendingReply, NetconfError> {
        self.submit_with_timeout(body, self.options.rpc_timeout)
            .await
    }

    /// Sends `body` with an explicit deadline. `None` waits indefinitely.
    pub async fn submit_with_timeout(
        &self,
        body: &str,
        timeout: Option<Duration>,
    ) -> Result<PendingReply, NetconfError> {
        // Reject without queueing on the writer.
        self.core.ensure_active("submit")?;
        let mut writer = self.writer.lock().await;
        let (message_id, rx) = self.core.register("submit")?;
        let pending = PendingReply::new(message_id, timeout, rx, self.core.clone());
        self.write_rpc(&mut writer, message_id, body).await?;
        Ok(pending)
    }

    /// Sends `body` and waits for its reply.
    pub async fn execute(&self, body: &str) -> Result<Reply, NetconfError> {
        self.submit(body).await?.wait().await
    }

    pub async fn execute_with_timeout(
        &self,
        body: &str,
        timeout: Option<Duration>,
    ) -> Result<Reply, NetconfError> {
        self.submit_with_timeout(body, timeout).await?.wait().await
    }

    /// Gracefully ends the session with `<close-session>`.
    ///
    /// Pending requests fail with [`NetconfError::SessionTerminated`] as soon
    /// as closing starts. The transport is shut down whatever the outcome;
    /// if the peer did not confirm the close the session ends up `failed`
    /// and [`NetconfError::CloseFailed`] is returned.
    ///
    /// On a session that already failed this still forces the transport
    /// down, then returns [`NetconfError::InvalidState`].
    pub async fn close(&self) -> Result<(), NetconfError> {
        let mut writer = self.writer.lock().await;
        if self.core.state() == SessionState::Failed {
            debug!(
                "forcing transport of failed netconf session {:?} down",
                self.info.session_id
            );
            shutdown_writer(&mut writer).await;
            drop(writer);
            self.stop_reader();
            return Err(NetconfError::InvalidState {
                operation: "close",
                state: SessionState::Failed,
            });
        }
        self.core.transition(SessionState::Closing, "close")?;
        debug!("closing netconf session {:?}", self.info.session_id);

        // The writer is held for the close frame only, not for the reply.
        let sent = self.send_close(&mut writer).await;
        drop(writer);
        let outcome = match sent {
            Ok(pending) => close_outcome(pending.wait().await, &self.core),
            Err(err) => Err(err),
        };

        shutdown_writer(&mut *self.writer.lock().await).await;
        self.stop_reader();

        match outcome {
            Ok(()) => {
                self.core.finish_close();
                if let Some(recorder) = self.recorder.as_ref() {
                    let _ = recorder.record_event(SessionEvent::SessionClosed {
                        reason: "close-session acknowledged".to_string(),
                    });
                }
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                self.core.fail(format!("close-session failed: {reason}"));
                if let Some(recorder) = self.recorder.as_ref() {
                    let _ = recorder.record_event(SessionEvent::SessionClosed {
                        reason: reason.clone(),
                    });
                }
                Err(NetconfError::CloseFailed(reason))
            }
        }
    }

    async fn send_close(
        &self,
        writer: &mut WriteHalf<BoxedTransport>,
    ) -> Result<PendingReply, NetconfError> {
        let (message_id, rx) = self.core.register_close()?;
        let pending = PendingReply::new(
            message_id,
            Some(self.options.close_timeout),
            rx,
            self.core.clone(),
        );
        self.write_rpc(writer, message_id, CLOSE_SESSION).await?;
        Ok(pending)
    }

    async fn write_rpc(
        &self,
        writer: &mut WriteHalf<BoxedTransport>,
        message_id: u64,
        body: &str,
    ) -> Result<(), NetconfError> {
        let frame = self
            .info
            .framing
            .encode(rpc_xml(message_id, body).as_bytes(), self.options.max_chunk_size);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::RpcSent {
                message_id,
                body: body.to_string(),
            });
        }

        let mut written = writer.write_all(&frame).await;
        if written.is_ok() {
            written = writer.flush().await;
        }
        if let Err(err) = written {
            self.core.fail(format!("write failed: {err}"));
            return Err(NetconfError::Transport(err));
        }
        trace!("sent rpc {message_id} ({} bytes)", frame.len());
        Ok(())
    }

    /// Aborts the reader task without waiting for EOF.
    fn stop_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                trace!("aborting netconf reader task");
            }
            handle.abort();
        }
    }
}

async fn shutdown_writer(writer: &mut WriteHalf<BoxedTransport>) {
    if let Err(err) = writer.shutdown().await {
        trace!("transport shutdown failed: {err}");
    }
}

/// Interprets the reply to `<close-session>`.
fn close_outcome(
    reply: Result<Reply, NetconfError>,
    core: &Correlator,
) -> Result<(), NetconfError> {
    match reply {
        Ok(reply) if reply.is_ok() => Ok(()),
        Ok(reply) => {
            let tags = reply
                .errors
                .iter()
                .map(|err| err.error_tag.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(NetconfError::CloseFailed(format!(
                "peer rejected close-session: {tags}"
            )))
        }
        // The peer dropped the transport right away; that confirms the close.
        Err(NetconfError::SessionTerminated(_)) if core.state() == SessionState::Closed => Ok(()),
        Err(err) => Err(err),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        if !self.core.state().is_terminal() {
            self.core.fail("session dropped".to_string());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info)
            .field("state", &self.core.state())
            .field("pending", &self.core.pending_len())
            .finish()
    }
}

/// Decodes frames until EOF, a fatal error, or the session ends.
async fn read_loop(
    mut reader: ReadHalf<BoxedTransport>,
    mut framer: Framer,
    core: Arc<Correlator>,
    recorder: Option<SessionRecorder>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        loop {
            let frame = match framer.next_message() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    core.fail(err.to_string());
                    return;
                }
            };
            if let Some(recorder) = recorder.as_ref() {
                let _ = recorder.record_raw_frame(String::from_utf8_lossy(&frame).into_owned());
            }
            if let Err(err) = Message::parse(&frame).and_then(|message| core.dispatch(message)) {
                core.fail(err.to_string());
                return;
            }
        }

        if core.state().is_terminal() {
            return;
        }

        match reader.read(&mut buf).await {
            Ok(0) => {
                if framer.buffered() > 0 {
                    warn!(
                        "transport closed with {} undecoded bytes, discarding them",
                        framer.buffered()
                    );
                }
                core.peer_closed();
                return;
            }
            Ok(n) => framer.push(&buf[..n]),
            Err(err) => {
                core.fail(format!("read failed: {err}"));
                return;
            }
        }
    }
}
