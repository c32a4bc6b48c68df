//! Request cancellation signal
//!
//! Lock-free cancellation flag checked at every resource and iteration
//! boundary. In-flight executor calls receive a handle to the same
//! signal so they can abandon blocking work early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Per-request cancellation token
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Handle for an in-flight executor call; observes the same signal
    pub fn child(&self) -> CancelToken {
        self.clone()
    }

    /// Error out when cancellation has been signalled
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is signalled; used to race blocking
    /// executor work against the signal
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_signals_all_holders() {
        let token = CancelToken::new();
        let child = token.child();
        assert!(token.check().is_ok());

        token.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(EngineError::Cancelled)));
    }
}
