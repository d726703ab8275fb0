//! Hierarchical progress reporting and cooperative cancellation.
//!
//! A run owns one [`ProgressLog`] and one [`CancellationToken`]. Nodes receive a
//! [`ProgressInfo`] scoped to `run > node > step`, which they can narrow further
//! with [`ProgressInfo::resolve`] for their own sub-steps.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, polled between steps and at node boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub at: DateTime<Utc>,
    /// Scope path, outermost first.
    pub path: Vec<String>,
    pub message: String,
}

impl ProgressEvent {
    pub fn scope(&self) -> String {
        self.path.join(" | ")
    }
}

/// Write-only receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn record(&self, event: ProgressEvent);
}

/// Default sink: keeps every event for the run handle and mirrors it to `tracing`.
#[derive(Default)]
pub struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
    forward: Option<Arc<dyn ProgressSink>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every event to `sink`.
    pub fn forwarding_to(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            forward: Some(sink),
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ProgressSink for ProgressLog {
    fn record(&self, event: ProgressEvent) {
        tracing::debug!(scope = %event.scope(), "{}", event.message);
        if let Some(forward) = &self.forward {
            forward.record(event.clone());
        }
        self.events.lock().push(event);
    }
}

/// A progress scope handed to nodes.
#[derive(Clone)]
pub struct ProgressInfo {
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    path: Vec<String>,
}

impl ProgressInfo {
    pub fn new(sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            path: Vec::new(),
        }
    }

    /// Child scope.
    pub fn resolve(&self, name: impl Into<String>) -> ProgressInfo {
        let mut path = self.path.clone();
        path.push(name.into());
        Self {
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
            path,
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.sink.record(ProgressEvent {
            at: Utc::now(),
            path: self.path.clone(),
            message: message.into(),
        });
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl std::fmt::Debug for ProgressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressInfo")
            .field("path", &self.path)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest() {
        let log = Arc::new(ProgressLog::new());
        let root = ProgressInfo::new(log.clone(), CancellationToken::new());
        let step = root.resolve("node").resolve("Step 1/2");
        step.log("started");
        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].scope(), "node | Step 1/2");
        assert_eq!(events[0].message, "started");
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let info = ProgressInfo::new(Arc::new(ProgressLog::new()), token.clone());
        let child = info.resolve("child");
        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_forwarding() {
        let inner = Arc::new(ProgressLog::new());
        let outer = Arc::new(ProgressLog::forwarding_to(inner.clone()));
        ProgressInfo::new(outer.clone(), CancellationToken::new()).log("hello");
        assert_eq!(inner.len(), 1);
        assert_eq!(outer.len(), 1);
    }
}
