//! Tracing sink handle
//!
//! The platform owns one [`TracingController`] and shares it with the engine
//! and any in-flight trace emission; its lifetime equals the platform's.
//! Events go through the `tracing` facade, so whatever subscriber the host
//! installs receives them.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared handle the engine uses to emit trace events.
pub struct TracingController {
    enabled: AtomicBool,
}

impl TracingController {
    /// Create an enabled controller.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Whether emission is currently enabled.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn emission on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Emit a trace event under the given category.
    pub fn trace_event(&self, category: &str, name: &str) {
        if self.enabled() {
            tracing::trace!(category, name, "trace event");
        }
    }
}

impl Default for TracingController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_toggle() {
        let controller = TracingController::new();
        assert!(controller.enabled());
        controller.set_enabled(false);
        assert!(!controller.enabled());
        controller.set_enabled(true);
        assert!(controller.enabled());
    }

    #[test]
    fn test_trace_event_does_not_panic_without_subscriber() {
        let controller = TracingController::new();
        controller.trace_event("scheduler", "post");
        controller.set_enabled(false);
        controller.trace_event("scheduler", "post");
    }
}
