//! Graceful shutdown with a bounded drain.
//!
//! Every long-running transfer holds an [`OperationGuard`] for its whole
//! lifetime. `request_shutdown` stops admission, waits for the in-flight count
//! to reach zero (bounded by the configured timeout), runs the release hooks
//! and signals completion. If the bound elapses first the process is forced
//! down instead.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lockbox_core::config::ShutdownConfig;
use lockbox_core::{VaultError, VaultResult};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type ReleaseHook = Box<dyn FnOnce() + Send>;
type ForceExit = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every operation finished within the bound
    Graceful,
    /// The bound elapsed with operations still running; force-exit was invoked
    TimedOut,
}

struct State {
    admitting: bool,
    in_flight: usize,
}

pub struct ShutdownCoordinator {
    state: Mutex<State>,
    drained: Notify,
    timeout: Duration,
    admit_during_shutdown: bool,
    release: Mutex<Vec<ReleaseHook>>,
    completed: CancellationToken,
    force_exit: ForceExit,
}

impl ShutdownCoordinator {
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            state: Mutex::new(State {
                admitting: true,
                in_flight: 0,
            }),
            drained: Notify::new(),
            timeout: config.timeout(),
            admit_during_shutdown: config.admit_during_shutdown,
            release: Mutex::new(Vec::new()),
            completed: CancellationToken::new(),
            force_exit: Box::new(|| std::process::exit(1)),
        }
    }

    /// Replace the forced-termination action (tests, embedding).
    pub fn with_force_exit(mut self, force_exit: impl Fn() + Send + Sync + 'static) -> Self {
        self.force_exit = Box::new(force_exit);
        self
    }

    /// Register an action to run once draining ends, e.g. closing a listener.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        self.release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Cancelled once shutdown has completed (either outcome).
    pub fn completed(&self) -> CancellationToken {
        self.completed.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    pub fn is_admitting(&self) -> bool {
        self.lock_state().admitting
    }

    /// Register one operation. The count drops when the guard is dropped, so
    /// every exit path ends the operation exactly once.
    ///
    /// Once shutdown was requested this fails with `ShuttingDown`, unless
    /// `admit_during_shutdown` is set.
    pub fn begin_operation(self: &Arc<Self>, label: impl Into<String>) -> VaultResult<OperationGuard> {
        let label = label.into();
        let in_flight = {
            let mut state = self.lock_state();
            if !state.admitting && !self.admit_during_shutdown {
                drop(state);
                warn!(%label, "operation rejected: shutdown in progress");
                return Err(VaultError::ShuttingDown);
            }
            state.in_flight += 1;
            state.in_flight
        };
        info!(%label, in_flight, "operation started");
        Ok(OperationGuard {
            coordinator: Arc::clone(self),
            label,
        })
    }

    fn end_operation(&self, label: &str) {
        let remaining = {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight
        };
        info!(%label, in_flight = remaining, "operation finished");
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Stop admitting, drain, release.
    ///
    /// Returns `TimedOut` only if the force-exit action returns (it does not
    /// with the default `process::exit`).
    pub async fn request_shutdown(&self) -> ShutdownOutcome {
        let in_flight = {
            let mut state = self.lock_state();
            state.admitting = false;
            state.in_flight
        };
        info!(in_flight, timeout = ?self.timeout, "shutdown requested, draining");

        let outcome = match tokio::time::timeout(self.timeout, self.wait_drained()).await {
            Ok(()) => {
                info!("all operations drained");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                error!(
                    in_flight = self.in_flight(),
                    timeout = ?self.timeout,
                    "operations still running after shutdown timeout, forcing exit"
                );
                ShutdownOutcome::TimedOut
            }
        };

        self.run_release_hooks();
        if outcome == ShutdownOutcome::TimedOut {
            (self.force_exit)();
        }
        self.completed.cancel();
        outcome
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn run_release_hooks(&self) {
        let hooks = std::mem::take(&mut *self.release.lock().unwrap_or_else(PoisonError::into_inner));
        for hook in hooks {
            hook();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ShutdownCoordinator")
            .field("admitting", &state.admitting)
            .field("in_flight", &state.in_flight)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registration of one in-flight operation; ends it on drop.
#[derive(Debug)]
pub struct OperationGuard {
    coordinator: Arc<ShutdownCoordinator>,
    label: String,
}

impl OperationGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.coordinator.end_operation(&self.label);
    }
}
