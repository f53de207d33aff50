//! Request/reply correlation.
//!
//! ```text
//! submit:  register() -> (message-id, oneshot rx) -> write <rpc> -> PendingReply
//! reader:  dispatch(reply) -> pending.remove(id) -> oneshot tx fires
//! timeout: PendingReply::wait -> expire(id) -> Timeout (if still pending)
//! close:   transition(closing | failed) -> every pending gets SessionTerminated
//! ```
//!
//! The lifecycle state, the message-id counter and the pending set share one
//! mutex so that "check state, assign id, insert" and "change state, drain
//! pending" are each atomic. A pending request is resolved by whoever
//! removes it from the map first.

use super::*;

type ReplySlot = oneshot::Sender<Result<Reply, NetconfError>>;
pub(super) type ReplyReceiver = oneshot::Receiver<Result<Reply, NetconfError>>;

struct PendingRequest {
    submitted_at: Instant,
    responder: ReplySlot,
}

impl PendingRequest {
    fn resolve(self, result: Result<Reply, NetconfError>) {
        // The waiter may have been dropped; nothing left to notify then.
        let _ = self.responder.send(result);
    }
}

struct Inner {
    state: SessionState,
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
    session_id: Option<u64>,
    failure: Option<String>,
}

pub(super) struct Correlator {
    inner: Mutex<Inner>,
    notifications: mpsc::Sender<Notification>,
    recorder: Option<SessionRecorder>,
}

impl Correlator {
    pub(super) fn new(
        notification_capacity: usize,
        recorder: Option<SessionRecorder>,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(notification_capacity.max(1));
        let correlator = Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                next_id: 1,
                pending: HashMap::new(),
                session_id: None,
                failure: None,
            }),
            notifications: tx,
            recorder,
        };
        (correlator, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No code panics while holding this lock; recover rather than poison the session.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn state(&self) -> SessionState {
        self.lock().state
    }

    pub(super) fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub(super) fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    pub(super) fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Fails with [`NetconfError::InvalidState`] unless the session is active.
    pub(super) fn ensure_active(&self, operation: &'static str) -> Result<(), NetconfError> {
        let state = self.state();
        if state != SessionState::Active {
            return Err(NetconfError::InvalidState { operation, state });
        }
        Ok(())
    }

    pub(super) fn set_session_id(&self, session_id: Option<u64>) {
        self.lock().session_id = session_id;
    }

    /// Moves to `next`, failing with [`NetconfError::InvalidState`] if the
    /// transition is not legal from the current state.
    pub(super) fn transition(
        &self,
        next: SessionState,
        operation: &'static str,
    ) -> Result<(), NetconfError> {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            return Err(NetconfError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        let reason = format!("session {next}");
        self.enter(&mut inner, next, &reason);
        Ok(())
    }

    /// Marks the session failed unless it already ended.
    pub(super) fn fail(&self, reason: String) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        warn!("netconf session failed: {reason}");
        inner.failure = Some(reason.clone());
        self.enter(&mut inner, SessionState::Failed, &reason);
    }

    /// The peer closed its side of the transport.
    pub(super) fn peer_closed(&self) {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Active => {
                debug!("peer closed the netconf session");
                self.enter(&mut inner, SessionState::Closing, "peer closed the session");
                self.enter(&mut inner, SessionState::Closed, "peer closed the session");
            }
            SessionState::Closing => {
                self.enter(&mut inner, SessionState::Closed, "transport closed");
            }
            SessionState::Closed | SessionState::Failed => {}
            SessionState::Idle | SessionState::Negotiating => {
                let reason = "transport closed before negotiation".to_string();
                inner.failure = Some(reason.clone());
                self.enter(&mut inner, SessionState::Failed, &reason);
            }
        }
    }

    /// Completes a graceful close. A no-op if the reader already observed EOF.
    pub(super) fn finish_close(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Closing {
            self.enter(&mut inner, SessionState::Closed, "session closed");
        }
    }

    fn enter(&self, inner: &mut Inner, next: SessionState, reason: &str) {
        let previous = inner.state;
        inner.state = next;
        debug!("netconf session state {previous} -> {next}");
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
        if next.drains_pending() || next.is_terminal() {
            for (message_id, request) in inner.pending.drain() {
                trace!("failing pending rpc {message_id}: {reason}");
                request.resolve(Err(NetconfError::SessionTerminated(reason.to_string())));
            }
        }
    }

    /// Assigns the next message-id and inserts its pending entry.
    ///
    /// Only accepted while `active`.
    pub(super) fn register(
        &self,
        operation: &'static str,
    ) -> Result<(u64, ReplyReceiver), NetconfError> {
        self.register_in(SessionState::Active, operation)
    }

    /// Registers the `<close-session>` request, which is sent while `closing`.
    pub(super) fn register_close(
        &self,
    ) -> Result<(u64, ReplyReceiver), NetconfError> {
        self.register_in(SessionState::Closing, "close")
    }

    fn register_in(
        &self,
        required: SessionState,
        operation: &'static str,
    ) -> Result<(u64, ReplyReceiver), NetconfError> {
        let mut inner = self.lock();
        if inner.state != required {
            return Err(NetconfError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        let message_id = inner.next_id;
        let Some(next_id) = message_id.checked_add(1) else {
            let reason = "message-id space exhausted".to_string();
            inner.failure = Some(reason.clone());
            self.enter(&mut inner, SessionState::Failed, &reason);
            return Err(NetconfError::MessageIdExhausted);
        };
        inner.next_id = next_id;

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(
            message_id,
            PendingRequest {
                submitted_at: Instant::now(),
                responder: tx,
            },
        );
        Ok((message_id, rx))
    }

    /// Removes an expired request. Returns false if it was already resolved.
    pub(super) fn expire(&self, message_id: u64) -> bool {
        let removed = self.lock().pending.remove(&message_id);
        let Some(request) = removed else {
            return false;
        };
        debug!(
            "rpc {message_id} timed out after {:?}",
            request.submitted_at.elapsed()
        );
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::RequestTimedOut { message_id });
        }
        true
    }

    /// Drops a request whose waiter went away.
    pub(super) fn cancel(&self, message_id: u64) {
        if self.lock().pending.remove(&message_id).is_some() {
            trace!("rpc {message_id} abandoned by caller");
        }
    }

    /// Routes one decoded message.
    ///
    /// Replies go to the waiter with the matching message-id; replies that
    /// match nothing are logged and dropped. Notifications go to the
    /// notification channel without blocking. A second `<hello>` is a
    /// protocol violation.
    pub(super) fn dispatch(&self, message: Message) -> Result<(), NetconfError> {
        match message {
            Message::Hello(_) => Err(NetconfError::ProtocolContent(
                "unexpected <hello> after negotiation".to_string(),
            )),
            Message::Reply(reply) => {
                self.resolve_reply(reply);
                Ok(())
            }
            Message::Notification(notification) => {
                self.deliver_notification(notification);
                Ok(())
            }
        }
    }

    fn resolve_reply(&self, reply: Reply) {
        let message_id = reply.numeric_id();
        let request = message_id.and_then(|id| self.lock().pending.remove(&id));

        let (Some(message_id), Some(request)) = (message_id, request) else {
            warn!(
                "discarding rpc-reply with unmatched message-id {:?}",
                reply.message_id
            );
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::UnmatchedReply {
                    message_id: reply.message_id.clone(),
                });
            }
            return;
        };

        trace!(
            "rpc {message_id} answered after {:?}",
            request.submitted_at.elapsed()
        );
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ReplyReceived {
                message_id,
                ok: reply.is_ok(),
                xml: reply.xml.clone(),
            });
        }
        request.resolve(Ok(reply));
    }

    fn deliver_notification(&self, notification: Notification) {
        {
            let mut inner = self.lock();
            let ended = notification.ended_session_id();
            if inner.state == SessionState::Active
                && ended.is_some()
                && ended == inner.session_id
            {
                debug!("peer reported end of session {ended:?}");
                self.enter(&mut inner, SessionState::Closing, "peer ended the session");
            }
        }

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::NotificationReceived {
                xml: notification.xml.clone(),
            });
        }
        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("notification channel full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("no notification receiver, dropping notification");
            }
        }
    }

    #[cfg(test)]
    pub(super) fn set_next_id(&self, next_id: u64) {
        self.lock().next_id = next_id;
    }
}

/// Handle to one in-flight RPC.
///
/// Await the reply with [`PendingReply::wait`]. Dropping the handle without
/// waiting abandons the request; a reply arriving later is discarded.
pub struct PendingReply {
    message_id: u64,
    deadline: Option<Instant>,
    rx: ReplyReceiver,
    core: Arc<Correlator>,
    settled: bool,
}

impl PendingReply {
    pub(super) fn new(
        message_id: u64,
        timeout: Option<Duration>,
        rx: ReplyReceiver,
        core: Arc<Correlator>,
    ) -> Self {
        Self {
            message_id,
            deadline: timeout.map(|t| Instant::now() + t),
            rx,
            core,
            settled: false,
        }
    }

    /// Message-id assigned to this RPC.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Deadline after which the request resolves with a timeout.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Waits for the correlated reply.
    ///
    /// Only this request is affected by its deadline; the session and other
    /// pending requests carry on.
    pub async fn wait(mut self) -> Result<Reply, NetconfError> {
        let received = match self.deadline {
            None => (&mut self.rx).await,
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.core.expire(self.message_id) {
                        self.settled = true;
                        return Err(NetconfError::Timeout {
                            message_id: self.message_id,
                        });
                    }
                    // The reader removed the entry first; its result is in the slot.
                    (&mut self.rx).await
                }
            },
        };
        self.settled = true;
        received.unwrap_or_else(|_| {
            Err(NetconfError::SessionTerminated(
                "reply slot dropped".to_string(),
            ))
        })
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("message_id", &self.message_id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled {
            self.core.cancel(self.message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> (Arc<Correlator>, mpsc::Receiver<Notification>) {
        let (core, rx) = Correlator::new(4, None);
        core.transition(SessionState::Negotiating, "open").expect("negotiating");
        core.transition(SessionState::Active, "open").expect("active");
        (Arc::new(core), rx)
    }

    fn reply(id: &str, body: &str) -> Message {
        Message::parse(format!("<rpc-reply message-id=\"{id}\">{body}</rpc-reply>").as_bytes())
            .expect("reply parses")
    }

    #[test]
    fn register_requires_active_state() {
        let (core, _rx) = Correlator::new(4, None);
        let err = core.register("submit").expect_err("idle");
        assert!(matches!(
            err,
            NetconfError::InvalidState {
                state: SessionState::Idle,
                ..
            }
        ));
        core.transition(SessionState::Negotiating, "open").expect("negotiating");
        assert!(core.register("submit").is_err());
        assert_eq!(core.pending_len(), 0);
    }

    #[test]
    fn message_ids_are_monotonic_and_unique() {
        let (core, _rx) = active();
        let ids = (0..100)
            .map(|_| core.register("submit").expect("register").0)
            .collect::<Vec<_>>();
        assert!(ids.windows(2).all(|pair| pair[1] == pair[0] + 1));
        assert_eq!(ids[0], 1);
        assert_eq!(core.pending_len(), 100);
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_waiters() {
        let (core, _rx) = active();
        let (id1, rx1) = core.register("submit").expect("1");
        let (id2, rx2) = core.register("submit").expect("2");
        let (id3, rx3) = core.register("submit").expect("3");

        for id in [id3, id1, id2] {
            core.dispatch(reply(&id.to_string(), &format!("<data>{id}</data>")))
                .expect("dispatch");
        }

        for (id, rx) in [(id1, rx1), (id2, rx2), (id3, rx3)] {
            let reply = rx.await.expect("slot").expect("reply");
            assert_eq!(reply.numeric_id(), Some(id));
            assert_eq!(reply.data, Some(id.to_string()));
        }
        assert_eq!(core.pending_len(), 0);
    }

    #[tokio::test]
    async fn unmatched_reply_leaves_other_requests_alone() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        let (core, _rx) = Correlator::new(4, Some(recorder.clone()));
        core.transition(SessionState::Negotiating, "open").expect("negotiating");
        core.transition(SessionState::Active, "open").expect("active");

        let (id, rx) = core.register("submit").expect("register");
        core.dispatch(reply("999", "<ok/>")).expect("dispatch unmatched");
        core.dispatch(reply("not-a-number", "<ok/>")).expect("dispatch unmatched");
        assert_eq!(core.pending_len(), 1);
        assert!(core.is_active());

        core.dispatch(reply(&id.to_string(), "<ok/>")).expect("dispatch");
        assert!(rx.await.expect("slot").expect("reply").ok);

        let unmatched = recorder
            .entries()
            .expect("entries")
            .into_iter()
            .filter(|e| matches!(e.event, SessionEvent::UnmatchedReply { .. }))
            .count();
        assert_eq!(unmatched, 2);
    }

    #[tokio::test]
    async fn failure_resolves_every_pending_request_once() {
        let (core, _rx) = active();
        let receivers = (0..5)
            .map(|_| core.register("submit").expect("register").1)
            .collect::<Vec<_>>();

        core.fail("read failed".to_string());
        core.fail("second failure is ignored".to_string());

        for rx in receivers {
            let result = rx.await.expect("resolved exactly once");
            assert!(matches!(result, Err(NetconfError::SessionTerminated(_))));
        }
        assert_eq!(core.state(), SessionState::Failed);
        assert_eq!(core.failure().as_deref(), Some("read failed"));
        assert!(core.register("submit").is_err());
    }

    #[tokio::test]
    async fn expire_and_reply_race_has_one_winner() {
        let (core, _rx) = active();
        let (id, rx) = core.register("submit").expect("register");
        assert!(core.expire(id));
        core.dispatch(reply(&id.to_string(), "<ok/>")).expect("late reply");
        assert!(!core.expire(id));
        // The slot was dropped with the expired entry.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn pending_reply_prefers_delivered_reply_over_timeout() {
        let (core, _rx) = active();
        let (id, rx) = core.register("submit").expect("register");
        let pending = PendingReply::new(id, Some(Duration::from_millis(0)), rx, core.clone());
        core.dispatch(reply(&id.to_string(), "<ok/>")).expect("dispatch");
        let reply = pending.wait().await.expect("reply wins");
        assert!(reply.ok);
    }

    #[test]
    fn dropping_pending_reply_cancels_request() {
        let (core, _rx) = active();
        let (id, rx) = core.register("submit").expect("register");
        let pending = PendingReply::new(id, None, rx, core.clone());
        assert_eq!(core.pending_len(), 1);
        drop(pending);
        assert_eq!(core.pending_len(), 0);
    }

    #[test]
    fn concurrent_registration_never_reuses_an_id() {
        let (core, _rx) = active();
        let workers = (0..8)
            .map(|_| {
                let core = core.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .map(|_| core.register("submit").expect("register").0)
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut ids = workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("worker"))
            .collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, (1..=1600).collect::<Vec<u64>>());
        assert_eq!(core.pending_len(), 1600);
    }

    #[test]
    fn ensure_active_reports_current_state() {
        let (core, _rx) = active();
        assert!(core.ensure_active("submit").is_ok());
        core.transition(SessionState::Closing, "close").expect("closing");
        assert!(matches!(
            core.ensure_active("submit"),
            Err(NetconfError::InvalidState {
                state: SessionState::Closing,
                ..
            })
        ));
    }

    #[test]
    fn message_id_overflow_fails_session() {
        let (core, _rx) = active();
        core.set_next_id(u64::MAX);
        let err = core.register("submit").expect_err("exhausted");
        assert!(matches!(err, NetconfError::MessageIdExhausted));
        assert_eq!(core.state(), SessionState::Failed);
    }

    #[test]
    fn second_hello_is_rejected() {
        let (core, _rx) = active();
        let hello = Message::parse(
            b"<hello><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>",
        )
        .expect("hello parses");
        assert!(matches!(
            core.dispatch(hello),
            Err(NetconfError::ProtocolContent(_))
        ));
    }

    #[tokio::test]
    async fn notifications_are_forwarded_and_session_end_closes() {
        let (core, mut rx) = active();
        core.set_session_id(Some(12));
        let (_, pending) = core.register("submit").expect("register");

        let other = Message::parse(
            b"<notification><eventTime>t</eventTime><netconf-session-end><session-id>99</session-id></netconf-session-end></notification>",
        )
        .expect("parse");
        core.dispatch(other).expect("dispatch");
        assert!(core.is_active());

        let ours = Message::parse(
            b"<notification><eventTime>t</eventTime><netconf-session-end><session-id>12</session-id></netconf-session-end></notification>",
        )
        .expect("parse");
        core.dispatch(ours).expect("dispatch");
        assert_eq!(core.state(), SessionState::Closing);
        assert!(matches!(
            pending.await.expect("slot"),
            Err(NetconfError::SessionTerminated(_))
        ));

        assert_eq!(rx.recv().await.expect("first").event_time.as_deref(), Some("t"));
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn peer_close_moves_active_to_closed() {
        let (core, _rx) = active();
        core.peer_closed();
        assert_eq!(core.state(), SessionState::Closed);
    }
}
