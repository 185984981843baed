//! Session transitions
//!
//! Outcome of feeding one event into the state machine.

use serde::Serialize;

use super::state::FailureKind;

/// What an event did to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Transition {
    /// A line was appended to the progress log
    Logged,
    /// The session id became known (line also logged)
    SessionAssigned { id: String },
    /// Session reached `Completed`
    Completed,
    /// Session reached `Failed`
    Failed { kind: FailureKind, message: String },
    /// Session was not accepting events
    Ignored,
}

impl Transition {
    /// Whether the consumer should stop reading the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Completed | Transition::Failed { .. })
    }
}
