//! Cancellation and progress reporting.
//!
//! The fit loop polls a [`CancellationToken`] once at the start of every
//! iteration and tells a [`ProgressSink`] which iteration it is about to run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tracing::info;

pub trait CancellationToken {
    /// `true` once the caller wants the fit to stop.
    fn should_stop(&self) -> bool;
}

impl CancellationToken for AtomicBool {
    fn should_stop(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: CancellationToken + ?Sized> CancellationToken for Arc<T> {
    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}

/// Never asks to stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationToken for NeverCancel {
    fn should_stop(&self) -> bool {
        false
    }
}

/// Cancellation decided by a closure.
pub struct CancelWhen<F>(pub F);

impl<F: Fn() -> bool> CancellationToken for CancelWhen<F> {
    fn should_stop(&self) -> bool {
        (self.0)()
    }
}

pub trait ProgressSink {
    fn report(&mut self, iteration: usize, niter: usize);
}

/// Logs a timestamped line every `ping` iterations (`0` disables).
#[derive(Debug, Clone, Copy)]
pub struct TracingProgress {
    pub ping: usize,
}

impl ProgressSink for TracingProgress {
    fn report(&mut self, iteration: usize, niter: usize) {
        if self.ping == 0 || iteration % self.ping != 0 {
            return;
        }
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        info!(iteration, niter, "=-=-=-=-= iteration {iteration} of {niter} at {now} =-=-=-=-=");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn report(&mut self, _iteration: usize, _niter: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn shared_flag_cancels() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = flag.clone();
        assert!(!token.should_stop());
        flag.store(true, Ordering::Relaxed);
        assert!(token.should_stop());
    }

    #[test]
    fn closure_tokens_are_polled_each_time() {
        let polls = Cell::new(0);
        let token = CancelWhen(|| {
            polls.set(polls.get() + 1);
            polls.get() > 2
        });
        assert!(!token.should_stop());
        assert!(!token.should_stop());
        assert!(token.should_stop());
        assert!(!NeverCancel.should_stop());
    }
}
