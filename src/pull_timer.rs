//! Self-rescheduling pull timer.
//!
//! Periodically asks a pull handler for a fresh value and forwards it to a
//! success handler. The next pull is always scheduled one interval after the
//! previous pull completed (or after the last explicit reset), never on a fixed
//! cadence.
//!
//! The pull handler receives a [`PullCompletion`] that it must complete exactly
//! once, possibly from another task. Completing consumes the handle, so a second
//! completion cannot be expressed:
//!
//! ```compile_fail
//! # use accessory_bridge::PullCompletion;
//! fn complete_twice(completion: PullCompletion<u32>) {
//!     completion.complete(Ok(1));
//!     completion.complete(Ok(2));
//! }
//! ```

use crate::error::Error;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type PullHandler<T> = Box<dyn Fn(PullCompletion<T>) + Send + Sync>;
pub type SuccessHandler<T> = Box<dyn Fn(T) + Send + Sync>;

enum TimerState {
    Idle,
    /// A fire is pending.
    Scheduled { generation: u64, handle: JoinHandle<()> },
    /// The pull handler was called and has not completed yet.
    Firing,
}

struct Inner<T: Send + 'static> {
    interval: Duration,
    pull: PullHandler<T>,
    on_success: SuccessHandler<T>,
    state: Mutex<TimerState>,
    generation: Mutex<u64>,
}

/// Periodic pull trigger. Must be used from within a tokio runtime.
pub struct PullTimer<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> PullTimer<T> {
    pub fn new(
        interval: Duration,
        pull: impl Fn(PullCompletion<T>) + Send + Sync + 'static,
        on_success: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                pull: Box::new(pull),
                on_success: Box::new(on_success),
                state: Mutex::new(TimerState::Idle),
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Schedule the first pull. Restarts the countdown if already running.
    pub fn start(&self) {
        let idle = matches!(*self.inner.state.lock(), TimerState::Idle);
        if idle {
            Inner::schedule(&self.inner);
        } else {
            self.reset_timer();
        }
    }

    /// Push the next pull back to one interval from now. No-op while stopped.
    pub fn reset_timer(&self) {
        Inner::reset(&self.inner);
    }

    /// Cancel the pending pull, if any.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), TimerState::Idle);
        if let TimerState::Scheduled { handle, .. } = previous {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(*self.inner.state.lock(), TimerState::Idle)
    }
}

impl<T: Send + 'static> Drop for PullTimer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> Inner<T> {
    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    fn schedule(this: &Arc<Self>) {
        let generation = this.next_generation();
        let weak = Arc::downgrade(this);
        let deadline = Instant::now() + this.interval;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(generation);
            }
        });

        let previous = std::mem::replace(
            &mut *this.state.lock(),
            TimerState::Scheduled { generation, handle },
        );
        if let TimerState::Scheduled { handle, .. } = previous {
            handle.abort();
        }
    }

    fn reset(this: &Arc<Self>) {
        if matches!(*this.state.lock(), TimerState::Idle) {
            return;
        }
        Self::schedule(this);
    }

    fn fire(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            match &*state {
                TimerState::Scheduled { generation: current, .. } if *current == generation => {
                    // Dropping our own handle detaches it; the task ends right after this call.
                    *state = TimerState::Firing;
                }
                _ => return,
            }
        }

        debug!("[PullTimer] pulling");
        let completion = PullCompletion {
            timer: Arc::downgrade(&self),
            completed: false,
        };
        (self.pull)(completion);
    }

    fn finish(this: &Arc<Self>, result: Result<T, Error>) {
        match result {
            Ok(value) => (this.on_success)(value),
            Err(e) => warn!("[PullTimer] Error occurred while pulling update: {}", e),
        }
        Self::reset(this);
    }
}

/// Single-use completion handle passed to the pull handler.
pub struct PullCompletion<T: Send + 'static> {
    timer: Weak<Inner<T>>,
    completed: bool,
}

impl<T: Send + 'static> PullCompletion<T> {
    /// Report the pull result and schedule the next pull.
    pub fn complete(mut self, result: Result<T, Error>) {
        self.completed = true;
        if let Some(inner) = self.timer.upgrade() {
            Inner::finish(&inner, result);
        }
    }
}

impl<T: Send + 'static> Drop for PullCompletion<T> {
    fn drop(&mut self) {
        if !self.completed {
            warn!("[PullTimer] pull completion dropped without result; timer stalled until reset");
        }
    }
}
