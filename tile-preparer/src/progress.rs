//! Scoped progress reporting and cooperative cancellation.
//!
//! Every long-running step runs inside a named [`Process`]: fractional
//! progress flows to the caller's callback, the callback's return value is
//! the cancellation signal, and the step's wall duration is logged when
//! the scope ends -- on success, early break and error paths alike.

use std::time::Instant;

use tracing::{info, info_span};

/// `(process_name, fraction_complete) -> continue`. Returning `false`
/// cancels the run cooperatively; it is checked at chunk/region
/// granularity, never preemptively.
pub type ProgressCallback = Box<dyn FnMut(&str, f32) -> bool>;

pub struct ProgressManager {
    callback: ProgressCallback,
    canceled: bool,
}

impl std::fmt::Debug for ProgressManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressManager")
            .field("canceled", &self.canceled)
            .finish()
    }
}

impl ProgressManager {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            canceled: false,
        }
    }

    /// A manager that never cancels and reports to nobody.
    pub fn sink() -> Self {
        Self::new(Box::new(|_, _| true))
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Starts a named step. The returned scope borrows the manager
    /// exclusively; steps are strictly sequential.
    pub fn start_process(&mut self, name: &'static str) -> Process<'_> {
        let span = info_span!("process", name);
        Process {
            manager: self,
            name,
            started: Instant::now(),
            last_fraction: 0.0,
            _entered: span.entered(),
        }
    }
}

pub struct Process<'a> {
    manager: &'a mut ProgressManager,
    name: &'static str,
    started: Instant,
    last_fraction: f32,
    _entered: tracing::span::EnteredSpan,
}

impl Process<'_> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Reports monotonic fractional progress and polls for cancellation.
    /// Returns `false` once the run is canceled; callers are expected to
    /// break out of their chunk/region loop in response.
    pub fn update(&mut self, fraction: f32) -> bool {
        if self.manager.canceled {
            return false;
        }
        // Keep the reported fraction monotonic even if chunk accounting
        // briefly regresses at a segment seam.
        self.last_fraction = self.last_fraction.max(fraction.clamp(0.0, 1.0));
        if !(self.manager.callback)(self.name, self.last_fraction) {
            self.manager.canceled = true;
            return false;
        }
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.manager.canceled
    }
}

impl Drop for Process<'_> {
    fn drop(&mut self) {
        info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            canceled = self.manager.canceled,
            "{} finished",
            self.name
        );
    }
}
