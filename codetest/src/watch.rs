//! Watch-mode rerun controller.
//!
//! A change notification cancels the in-flight run and arms exactly one
//! restart. Notifications arriving while a run is in flight (or while it is
//! being torn down) collapse into that single pending restart.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::types::RunOutcome;
use crate::error::Cancelled;
use crate::io::process::CancelToken;

/// One complete engine run. Must not return before every child it spawned
/// has been reaped.
pub trait Pipeline {
    fn run(&self, cancel: &CancelToken) -> Result<RunOutcome>;
}

impl<F> Pipeline for F
where
    F: Fn(&CancelToken) -> Result<RunOutcome>,
{
    fn run(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        self(cancel)
    }
}

/// Result of one run, handed to the report callback.
#[derive(Debug)]
pub struct RunReport<'a> {
    /// 1-based run number.
    pub run: u64,
    pub result: &'a Result<RunOutcome>,
}

#[derive(Debug)]
struct State {
    pending: bool,
    shutdown: bool,
    active: Option<CancelToken>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives a [`Pipeline`] until shut down, restarting it on every change.
#[derive(Debug)]
pub struct WatchController {
    shared: Arc<Shared>,
}

/// Cloneable, `Send` handle used by file watchers and signal handlers.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    shared: Arc<Shared>,
}

impl WatchHandle {
    /// Request a restart and cancel the run in flight, if any.
    pub fn notify_change(&self) {
        let mut state = self.shared.lock();
        state.pending = true;
        if let Some(active) = &state.active {
            debug!("change detected, cancelling active run");
            active.cancel();
        }
        self.shared.wake.notify_all();
    }

    /// Stop the loop once the current run finishes.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        self.shared.wake.notify_all();
    }
}

impl Default for WatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchController {
    /// Controller armed for an immediate first run.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: true,
                    shutdown: false,
                    active: None,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run until [`WatchHandle::shutdown`]; returns the number of runs started.
    ///
    /// Errors from the pipeline are reported and logged; the loop stays armed.
    pub fn run<P, R>(&self, pipeline: &P, mut on_report: R) -> u64
    where
        P: Pipeline,
        R: FnMut(&RunReport<'_>),
    {
        let mut runs = 0u64;
        while let Some(cancel) = self.begin_run() {
            runs += 1;
            info!(run = runs, "starting run");
            let result = pipeline.run(&cancel);
            self.end_run();

            match &result {
                Ok(outcome) => debug!(run = runs, verdict = ?outcome.verdict, "run finished"),
                Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                    debug!(run = runs, "run cancelled");
                }
                Err(err) => warn!(run = runs, error = %err, "run failed"),
            }
            on_report(&RunReport {
                run: runs,
                result: &result,
            });
        }
        info!(runs, "watch loop stopped");
        runs
    }

    /// Block until a restart is pending, then clear it and install a fresh
    /// token in one step. `None` once shut down.
    fn begin_run(&self) -> Option<CancelToken> {
        let mut state = self.shared.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.pending {
                state.pending = false;
                let token = CancelToken::new();
                state.active = Some(token.clone());
                return Some(token);
            }
            state = self
                .shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn end_run(&self) {
        self.shared.lock().active = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::core::types::Verdict;

    const WAIT: Duration = Duration::from_secs(5);

    fn outcome(verdict: Verdict) -> RunOutcome {
        RunOutcome {
            cases_run: 1,
            verdict,
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn bursts_of_changes_coalesce_into_one_restart() {
        let controller = WatchController::new();
        let handle = controller.handle();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = thread::spawn(move || {
            let pipeline = move |_cancel: &CancelToken| -> Result<RunOutcome> {
                started_tx.send(()).expect("signal start");
                release_rx.recv().expect("release");
                Ok(outcome(Verdict::Passed))
            };
            controller.run(&pipeline, |_| {})
        });

        started_rx.recv_timeout(WAIT).expect("first run");
        handle.notify_change();
        handle.notify_change();
        release_tx.send(()).expect("release first");

        started_rx.recv_timeout(WAIT).expect("second run");
        handle.shutdown();
        release_tx.send(()).expect("release second");

        assert_eq!(worker.join().expect("join"), 2);
        assert!(started_rx.try_recv().is_err());
    }

    #[test]
    fn change_cancels_the_active_run() {
        let controller = WatchController::new();
        let handle = controller.handle();
        let (started_tx, started_rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            let calls = AtomicU64::new(0);
            let pipeline = move |cancel: &CancelToken| -> Result<RunOutcome> {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                started_tx.send(call).expect("signal start");
                if call == 1 {
                    while !cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    return Ok(outcome(Verdict::Cancelled));
                }
                Ok(outcome(Verdict::Passed))
            };
            let mut verdicts = Vec::new();
            let runs = controller.run(&pipeline, |report| {
                if let Ok(outcome) = report.result {
                    verdicts.push(outcome.verdict);
                }
            });
            (runs, verdicts)
        });

        assert_eq!(started_rx.recv_timeout(WAIT).expect("first run"), 1);
        handle.notify_change();
        assert_eq!(started_rx.recv_timeout(WAIT).expect("second run"), 2);
        handle.shutdown();

        let (runs, verdicts) = worker.join().expect("join");
        assert_eq!(runs, 2);
        assert_eq!(verdicts, vec![Verdict::Cancelled, Verdict::Passed]);
    }

    #[test]
    fn failed_run_keeps_the_loop_armed() {
        let controller = WatchController::new();
        let handle = controller.handle();
        let (started_tx, started_rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            let calls = AtomicU64::new(0);
            let pipeline = move |_cancel: &CancelToken| -> Result<RunOutcome> {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                started_tx.send(call).expect("signal start");
                if call == 1 {
                    return Err(anyhow!("compile failed"));
                }
                Ok(outcome(Verdict::Passed))
            };
            let mut failures = 0;
            let runs = controller.run(&pipeline, |report| {
                if report.result.is_err() {
                    failures += 1;
                }
            });
            (runs, failures)
        });

        assert_eq!(started_rx.recv_timeout(WAIT).expect("first run"), 1);
        handle.notify_change();
        assert_eq!(started_rx.recv_timeout(WAIT).expect("second run"), 2);
        handle.shutdown();

        let (runs, failures) = worker.join().expect("join");
        assert_eq!(runs, 2);
        assert_eq!(failures, 1);
    }
}
