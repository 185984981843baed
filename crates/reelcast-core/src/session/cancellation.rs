//! Cancellation support for a running session
//!
//! Each attempt gets its own token so cancelling one stream consumer can
//! never stop the consumer of a later attempt.

use tokio_util::sync::CancellationToken;

/// Cancellation handle for the stream consumer of the current attempt
#[derive(Debug)]
pub struct SessionCancellation {
    token: CancellationToken,
    attempt: u64,
}

impl SessionCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            attempt: 0,
        }
    }

    /// Hand out a fresh token for `attempt`. The previous token is cancelled.
    pub fn arm(&mut self, attempt: u64) -> CancellationToken {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.attempt = attempt;
        self.token.clone()
    }

    /// Cancel the consumer of `attempt`, if that attempt is still armed
    pub fn cancel(&self, attempt: u64) -> bool {
        if self.attempt != attempt || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Attempt the current token belongs to
    pub fn attempt(&self) -> u64 {
        self.attempt
    }
}

impl Default for SessionCancellation {
    fn default() -> Self {
        Self::new()
    }
}
