//! Warnings and errors collected over a session.

use std::collections::HashSet;

use tracing::{error, warn};

/// Session-wide message collector.
///
/// Messages are also emitted through `tracing` as they arrive; the
/// collector keeps them so the caller can report them at the end.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<String>,
    errors: Vec<String>,
    seen: HashSet<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    /// Record a warning unless one with the same key was already recorded.
    pub fn warn_once(&mut self, key: impl Into<String>, message: impl Into<String>) -> bool {
        if !self.seen.insert(key.into()) {
            return false;
        }
        self.warn(message);
        true
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.errors.push(message);
    }

    /// Record an error unless the same message was already recorded.
    pub fn error_once(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if !self.seen.insert(format!("error:{message}")) {
            return false;
        }
        self.error(message);
        true
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}
