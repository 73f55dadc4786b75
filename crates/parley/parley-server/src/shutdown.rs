use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop signal shared by the accept loop and every worker.
///
/// Cloning shares the same flag. Triggering is idempotent: only the first call
/// changes state.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    stopped: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_idempotent() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(token.is_running());
        assert!(clone.trigger());
        assert!(!token.trigger());
        assert!(!token.is_running());
        assert!(!clone.is_running());
    }
}
