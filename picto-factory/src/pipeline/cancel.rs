//! Cooperative cancellation for in-flight pipeline steps
//!
//! The external generation call cannot be aborted mid-flight; cancellation
//! is a flag consulted exactly once, after the call resolves. A token is
//! created when a step begins and removed when the run resolves, so stale
//! flags never leak into the next run of the same row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-run cancellation flag, shared between the engine and the executor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation of the run holding this token.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Consume the flag at the post-await checkpoint: returns whether
    /// cancellation was requested, clearing it either way.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// Registry of in-flight cancellation tokens, keyed by row identity.
///
/// A "stop" action arrives from outside the executor and only knows the
/// row id; this maps it to the token of the current run.
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<String, CancelToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        CancelRegistry {
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create (or join) the token for a row's current run.
    pub async fn register(&self, row_id: &str) -> CancelToken {
        let mut tokens = self.tokens.lock().await;
        tokens
            .entry(row_id.to_string())
            .or_insert_with(CancelToken::new)
            .clone()
    }

    /// Flag the row's in-flight run for cancellation. Returns false when
    /// nothing is in flight for that row.
    pub async fn cancel(&self, row_id: &str) -> bool {
        let tokens = self.tokens.lock().await;
        match tokens.get(row_id) {
            Some(token) => {
                token.request();
                true
            }
            None => false,
        }
    }

    /// Drop the row's token once its run has resolved.
    pub async fn remove(&self, row_id: &str) {
        let mut tokens = self.tokens.lock().await;
        tokens.remove(row_id);
    }

    /// Flag every in-flight run (batch stop).
    pub async fn cancel_all(&self) {
        let tokens = self.tokens.lock().await;
        for token in tokens.values() {
            token.request();
        }
    }
}

impl Clone for CancelRegistry {
    fn clone(&self) -> Self {
        CancelRegistry {
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        CancelRegistry::new()
    }
}
