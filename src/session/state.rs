use super::*;

/// Lifecycle of a NETCONF session.
///
/// ```text
/// idle -> negotiating -> active -> closing -> closed
///              |           |         |
///              +-----------+---------+--> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport attached, nothing sent yet.
    Idle,
    /// `<hello>` exchange in progress.
    Negotiating,
    /// Accepting RPCs.
    Active,
    /// Close in progress; no new RPCs accepted.
    Closing,
    /// Transport shut down after a graceful or peer-initiated close.
    Closed,
    /// Unrecoverable transport, framing or negotiation error.
    Failed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Negotiating)
            | (Negotiating, Active)
            | (Active, Closing)
            | (Closing, Closed) => true,
            (Closed | Failed, Failed) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    /// True for `closed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Entering this state fails every pending request.
    pub(super) fn drains_pending(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::{self, *};

    const ALL: [SessionState; 6] = [Idle, Negotiating, Active, Closing, Closed, Failed];

    #[test]
    fn happy_path_is_legal() {
        assert!(Idle.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn failed_is_reachable_from_every_live_state() {
        for state in [Idle, Negotiating, Active, Closing] {
            assert!(state.can_transition_to(Failed), "{state} -> failed");
        }
        assert!(!Closed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn no_shortcuts_to_active() {
        assert!(!Idle.can_transition_to(Active));
        assert!(!Closing.can_transition_to(Active));
        assert!(!Active.can_transition_to(Closed));
    }
}
