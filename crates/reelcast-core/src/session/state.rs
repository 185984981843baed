//! Session state machine
//!
//! One `Session` tracks a single creation request from submission to its
//! terminal outcome. The coordinator owns it; a front end only observes it.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::Transition;
use crate::stream::StreamEvent;

/// Line appended to the progress log on normal completion
pub const SUCCESS_MARKER: &str = "Video created successfully!";

/// Message recorded when the stream connection breaks
pub const TRANSPORT_FAILURE_MESSAGE: &str = "Connection to server lost";

/// Message recorded when the caller cancels
pub const CANCELLED_MESSAGE: &str = "Cancelled by caller";

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    Creating,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

/// Why a session ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// The server sent an `ERROR` line
    Job,
    /// The connection dropped or errored before a terminal line
    Transport,
    /// The caller cancelled
    Cancelled,
}

/// One video creation workflow
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    phase: Phase,
    progress_log: Vec<String>,
    session_id: Option<String>,
    error_message: Option<String>,
    failure: Option<FailureKind>,
    /// Bumped on every `begin`, used to drop events from a stale stream
    attempt: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress_log(&self) -> &[String] {
        &self.progress_log
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn is_creating(&self) -> bool {
        self.phase == Phase::Creating
    }

    /// Enter `Creating`, clearing everything from the previous run.
    ///
    /// Returns `false` without touching state if a run is in progress.
    pub fn begin(&mut self) -> bool {
        if self.is_creating() {
            return false;
        }
        self.phase = Phase::Creating;
        self.progress_log.clear();
        self.session_id = None;
        self.error_message = None;
        self.failure = None;
        self.attempt += 1;
        info!("Session attempt {} started", self.attempt);
        true
    }

    /// Apply one classified stream event
    pub fn apply(&mut self, event: StreamEvent) -> Transition {
        if !self.is_creating() {
            debug!("Ignoring {:?} in phase {:?}", event, self.phase);
            return Transition::Ignored;
        }

        match event {
            StreamEvent::Progress { text } => {
                self.progress_log.push(text);
                Transition::Logged
            }
            StreamEvent::SessionAssigned { id, raw_line } => {
                self.progress_log.push(raw_line);
                match &self.session_id {
                    None => {
                        info!("Session id assigned: {}", id);
                        self.session_id = Some(id.clone());
                        Transition::SessionAssigned { id }
                    }
                    Some(current) => {
                        if *current != id {
                            warn!(
                                "Ignoring second session id {} (keeping {})",
                                id, current
                            );
                        }
                        Transition::Logged
                    }
                }
            }
            StreamEvent::Completion => {
                self.progress_log.push(SUCCESS_MARKER.to_string());
                self.phase = Phase::Completed;
                info!(
                    "Session completed with {} progress lines",
                    self.progress_log.len()
                );
                Transition::Completed
            }
            StreamEvent::Error { message } => {
                warn!("Session failed: {}", message);
                self.fail(FailureKind::Job, message.clone());
                Transition::Failed {
                    kind: FailureKind::Job,
                    message,
                }
            }
        }
    }

    /// Record a broken stream connection
    pub fn fail_transport(&mut self, reason: &str) -> Transition {
        if !self.is_creating() {
            return Transition::Ignored;
        }
        warn!("Stream transport failure: {}", reason);
        self.fail(FailureKind::Transport, TRANSPORT_FAILURE_MESSAGE.to_string());
        Transition::Failed {
            kind: FailureKind::Transport,
            message: TRANSPORT_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Record a caller cancellation
    pub fn cancel(&mut self) -> Transition {
        if !self.is_creating() {
            return Transition::Ignored;
        }
        info!("Session attempt {} cancelled", self.attempt);
        self.fail(FailureKind::Cancelled, CANCELLED_MESSAGE.to_string());
        Transition::Failed {
            kind: FailureKind::Cancelled,
            message: CANCELLED_MESSAGE.to_string(),
        }
    }

    fn fail(&mut self, kind: FailureKind, message: String) {
        self.phase = Phase::Failed;
        self.failure = Some(kind);
        self.error_message = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::parse_line;

    fn creating() -> Session {
        let mut session = Session::new();
        assert!(session.begin());
        session
    }

    fn feed(session: &mut Session, lines: &[&str]) {
        for line in lines {
            session.apply(parse_line(line));
        }
    }

    #[test]
    fn test_initial_state() {
        let session = Session::new();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.progress_log().is_empty());
        assert_eq!(session.session_id(), None);
        assert_eq!(session.error_message(), None);
        assert_eq!(session.attempt(), 0);
    }

    #[test]
    fn test_progress_lines_keep_arrival_order() {
        let mut session = creating();
        let lines = ["one", "two", "", "two", "three"];
        feed(&mut session, &lines);
        assert_eq!(session.progress_log(), &lines);
        assert_eq!(session.phase(), Phase::Creating);
    }

    #[test]
    fn test_first_session_id_wins() {
        let mut session = creating();
        let first = session.apply(parse_line(r#"{"user_id":"first"}"#));
        let second = session.apply(parse_line(r#"{"user_id":"second"}"#));

        assert_eq!(
            first,
            Transition::SessionAssigned {
                id: "first".to_string()
            }
        );
        assert_eq!(second, Transition::Logged);
        assert_eq!(session.session_id(), Some("first"));
        // Both raw lines still land in the log
        assert_eq!(session.progress_log().len(), 2);
    }

    #[test]
    fn test_completion_appends_marker() {
        let mut session = creating();
        feed(&mut session, &["rendering", "DONE"]);
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.progress_log(), &["rendering", SUCCESS_MARKER]);
        assert_eq!(session.error_message(), None);
    }

    #[test]
    fn test_error_fails_without_logging() {
        let mut session = creating();
        feed(&mut session, &["rendering", "ERROR: disk full"]);
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.error_message(), Some("disk full"));
        assert_eq!(session.failure(), Some(FailureKind::Job));
        assert_eq!(session.progress_log(), &["rendering"]);
    }

    #[test]
    fn test_terminal_phase_ignores_further_events() {
        let mut session = creating();
        feed(&mut session, &["DONE"]);
        assert_eq!(session.apply(parse_line("late")), Transition::Ignored);
        assert_eq!(
            session.apply(parse_line("ERROR: late")),
            Transition::Ignored
        );
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.progress_log(), &[SUCCESS_MARKER]);
        assert_eq!(session.fail_transport("eof"), Transition::Ignored);
        assert_eq!(session.cancel(), Transition::Ignored);
    }

    #[test]
    fn test_idle_ignores_events() {
        let mut session = Session::new();
        assert_eq!(session.apply(parse_line("hello")), Transition::Ignored);
        assert!(session.progress_log().is_empty());
    }

    #[test]
    fn test_transport_failure_is_distinct_from_job_error() {
        let mut session = creating();
        feed(&mut session, &["rendering"]);
        session.fail_transport("connection reset");
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.failure(), Some(FailureKind::Transport));
        assert_eq!(session.error_message(), Some(TRANSPORT_FAILURE_MESSAGE));
    }

    #[test]
    fn test_cancel_keeps_session_id() {
        let mut session = creating();
        feed(&mut session, &[r#"{"user_id":"abc"}"#]);
        session.cancel();
        assert_eq!(session.failure(), Some(FailureKind::Cancelled));
        assert_eq!(session.error_message(), Some(CANCELLED_MESSAGE));
        assert_eq!(session.session_id(), Some("abc"));
    }

    #[test]
    fn test_begin_rejects_reentry_and_resets_after_terminal() {
        let mut session = creating();
        feed(&mut session, &[r#"{"user_id":"abc"}"#, "ERROR: boom"]);

        let mut busy = creating();
        assert!(!busy.begin());
        assert_eq!(busy.attempt(), 1);

        assert!(session.begin());
        assert_eq!(session.phase(), Phase::Creating);
        assert_eq!(session.attempt(), 2);
        assert!(session.progress_log().is_empty());
        assert_eq!(session.session_id(), None);
        assert_eq!(session.error_message(), None);
        assert_eq!(session.failure(), None);
    }
}
