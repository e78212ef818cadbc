//! Error detection and correction.
//!
//! An [`ErrorHandler`] names an output file to watch, the literal signatures
//! that identify one failure mode, and a state-dependent `correct` operation
//! that applies an escalating remedy and records the attempt in the job's
//! error ledger. The [`HandlerRegistry`] holds handlers in declaration
//! order, which is also their correction priority.

pub mod builtin;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::ControlStore;

/// A detector plus corrector for one recoverable failure mode.
pub trait ErrorHandler: Send + Sync {
    /// Stable identity; also the key under which attempts are recorded in
    /// the error ledger.
    fn name(&self) -> &'static str;

    /// Output artifact to scan, relative to the job's working directory.
    fn watch_file(&self) -> &str;

    /// Literal substrings whose presence indicates this failure.
    fn signatures(&self) -> &[&str];

    /// Whether this handler is evaluated while the process is still running.
    /// Post-mortem handlers (`false`) run once against final output.
    fn is_live_monitor(&self) -> bool {
        true
    }

    /// Total correction attempts this handler may make. A further match once
    /// the ledger reaches this bound is fatal.
    fn max_attempts(&self) -> u32;

    /// Applies the remedy tier selected by the current ledger count, bumps
    /// the ledger, and returns a human-readable description for the audit
    /// trail. The monitor persists the store afterwards.
    fn correct(&self, store: &mut ControlStore, dir: &Path) -> Result<String>;

    /// First signature found in `content`, if any.
    fn first_match(&self, content: &str) -> Option<&str> {
        self.signatures()
            .iter()
            .find(|sig| content.contains(**sig))
            .copied()
    }
}

/// A detected signature match, consumed immediately by the correction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub handler: String,
    pub matched: String,
    pub detected_at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(handler: &str, matched: &str) -> Self {
        Self {
            handler: handler.to_string(),
            matched: matched.to_string(),
            detected_at: Utc::now(),
        }
    }
}

/// Ordered set of handlers. Declaration order is priority order: scanning
/// and correction always iterate front to back.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Appends a handler at the lowest priority so far.
    pub fn register(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.handlers.push(handler);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ErrorHandler>> {
        self.handlers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHandler {
        name: &'static str,
        live: bool,
    }

    impl ErrorHandler for FakeHandler {
        fn name(&self) -> &'static str {
            self.name
        }
        fn watch_file(&self) -> &str {
            "solver.out"
        }
        fn signatures(&self) -> &[&str] {
            &["alpha failure", "beta failure"]
        }
        fn is_live_monitor(&self) -> bool {
            self.live
        }
        fn max_attempts(&self) -> u32 {
            1
        }
        fn correct(&self, store: &mut ControlStore, _dir: &Path) -> Result<String> {
            store.increment_error_count(self.name());
            Ok("noop".into())
        }
    }

    #[test]
    fn registry_preserves_declaration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FakeHandler { name: "first", live: true }));
        registry.register(Arc::new(FakeHandler { name: "second", live: false }));

        let names: Vec<&str> = registry.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn first_match_finds_the_earliest_declared_signature() {
        let handler = FakeHandler { name: "fake", live: true };
        let content = "step 12\nbeta failure in block 3\n";
        assert_eq!(handler.first_match(content), Some("beta failure"));
        assert_eq!(handler.first_match("all good"), None);
    }

    #[test]
    fn error_event_records_identity_and_match() {
        let event = ErrorEvent::new("mixing", "SCF mixing diverged");
        assert_eq!(event.handler, "mixing");
        assert_eq!(event.matched, "SCF mixing diverged");
    }
}
