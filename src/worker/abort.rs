//! Cooperative cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort flag consulted at batch boundaries. Cloning shares the
/// underlying flag.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out of the current operation when the token is set.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_aborted() {
            Err(crate::error::CoreError::Cancelled.into())
        } else {
            Ok(())
        }
    }
}
