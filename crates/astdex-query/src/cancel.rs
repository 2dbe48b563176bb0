//! Query cancellation
//!
//! Every query carries a token combining a cancel flag and a deadline. The
//! pipeline checks the token at stage boundaries; CPU-heavy stages run to
//! completion between checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{QueryError, Result};

/// Default query deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Cancellation token with a deadline.
#[derive(Debug, Clone)]
pub struct QueryToken {
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
}

impl Default for QueryToken {
    fn default() -> Self {
        Self::with_deadline(DEFAULT_DEADLINE)
    }
}

impl QueryToken {
    /// Token expiring after the given duration.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now() + timeout,
        }
    }

    /// Request cancellation; observed at the next stage boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Stage-boundary check.
    ///
    /// A token cancels either explicitly or by its deadline expiring; both
    /// surface as `Canceled` at the next yield. `Timeout` is reserved for
    /// operations that outlive an externally imposed wait.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() || self.deadline_exceeded() {
            return Err(QueryError::Canceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_passes() {
        let token = QueryToken::default();
        assert!(token.check().is_ok());
        assert!(token.remaining() > Duration::from_secs(20));
    }

    #[test]
    fn test_cancel_observed() {
        let token = QueryToken::default();
        token.cancel();
        assert!(matches!(token.check(), Err(QueryError::Canceled)));
    }

    #[test]
    fn test_deadline_expiry_cancels() {
        let token = QueryToken::with_deadline(Duration::ZERO);
        assert!(token.deadline_exceeded());
        assert!(matches!(token.check(), Err(QueryError::Canceled)));
        assert_eq!(token.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_clones_share_state() {
        let token = QueryToken::default();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
