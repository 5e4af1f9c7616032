//! The recursive procedure that runs one admitted action.
//!
//! Token policy: the spawner acquires a child's token before launching it,
//! and no execution holds a token across a suspension point. An action with
//! prerequisites gives its token back before joining on them and takes a
//! fresh one before its routine runs; follow-ups are admitted only after
//! the routine's token is released. Tokens are therefore held only while a
//! routine runs (or briefly while being handed over), so the ceiling is never
//! exceeded and nested prerequisites cannot deadlock a small pool.

use futures::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, error, trace, warn};

use super::action::{Action, Routine};
use super::panics::{self, CaughtPanic};
use super::pool::PoolInner;
use crate::core::errors::{PoolError, Result};
use crate::core::gate::AdmissionToken;
use crate::core::tracker::{CompletionGuard, CompletionTracker};

/// Lifecycle of one action invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Admitted,
    ExpandingDependencies,
    Running,
    SpawningContinuations,
    Completed,
}

/// A panic or error raised by a routine, captured at its action's boundary
#[derive(Debug, Clone)]
pub struct Fault {
    label: Option<String>,
    message: String,
    location: Option<String>,
    trace: String,
}

impl Fault {
    pub(crate) fn from_panic(caught: CaughtPanic, label: Option<String>) -> Self {
        let (location, trace) = match caught.site {
            Some(site) => (site.location, site.backtrace),
            None => (None, Backtrace::force_capture().to_string()),
        };

        Self {
            label,
            message: panic_message(caught.payload.as_ref()),
            location,
            trace,
        }
    }

    pub(crate) fn from_error(err: anyhow::Error, label: Option<String>) -> Self {
        let backtrace = err.backtrace();
        let trace = if backtrace.status() == BacktraceStatus::Captured {
            backtrace.to_string()
        } else {
            Backtrace::force_capture().to_string()
        };

        Self {
            label,
            message: format!("{:#}", err),
            location: None,
            trace,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source location of a panic
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// Report text: the message first, then the action label and panic
    /// location if known, then the trace
    pub fn render(&self) -> String {
        let mut report = format!("{}:\n", self.message);
        if let Some(label) = &self.label {
            report.push_str(&format!("action: {}\n", label));
        }
        if let Some(location) = &self.location {
            report.push_str(&format!("panicked at {}\n", location));
        }
        report.push_str(&self.trace);
        report.push('\n');
        report
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "action '{}' faulted: {}", label, self.message),
            None => write!(f, "action faulted: {}", self.message),
        }
    }
}

/// What a routine invocation produced. The scheduler treats both arms alike.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(Vec<Action>),
    Faulted(Fault),
}

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execution statistics kept alongside the gate
#[derive(Debug, Default)]
pub(crate) struct ExecutionCounters {
    pub(crate) running: AtomicUsize,
    pub(crate) peak_running: AtomicUsize,
    pub(crate) actions_completed: AtomicU64,
    pub(crate) routines_faulted: AtomicU64,
}

/// Counts a routine as running for as long as it lives
struct RunningGuard<'a> {
    counters: &'a ExecutionCounters,
}

impl<'a> RunningGuard<'a> {
    fn enter(counters: &'a ExecutionCounters) -> Self {
        let now = counters.running.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_running.fetch_max(now, Ordering::AcqRel);
        Self { counters }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::AcqRel);
    }
}

fn display_label(label: &Option<String>) -> &str {
    label.as_deref().unwrap_or("<unlabeled>")
}

impl PoolInner {
    /// Register `action` on the tracker (and `parent`), wait for its token and
    /// launch it. Returns once launched, not once finished.
    pub(crate) async fn admit(
        self: &Arc<Self>,
        action: Action,
        parent: Option<Arc<CompletionTracker>>,
    ) -> Result<()> {
        // Dropped on the error path, which undoes the registration.
        let completion = CompletionGuard::register(self.tracker.clone(), parent);
        let token = self.gate.acquire().await?;

        let pool = self.clone();
        self.runtime.spawn(pool.execute(action, token, completion));
        Ok(())
    }

    fn execute(
        self: Arc<Self>,
        action: Action,
        token: AdmissionToken,
        completion: CompletionGuard,
    ) -> BoxFuture<'static, ()> {
        async move {
            let _completion = completion;
            let Action {
                routine,
                dependencies,
                label,
            } = action;
            let mut token = Some(token);
            self.transition(&label, ExecutionState::Admitted);

            if !dependencies.is_empty() {
                self.transition(&label, ExecutionState::ExpandingDependencies);
                token = None;

                let join = Arc::new(CompletionTracker::new());
                for dependency in dependencies {
                    if let Err(e) = self.admit(dependency, Some(join.clone())).await {
                        error!(label = display_label(&label), error = %e, "failed to admit prerequisite");
                    }
                }
                join.wait().await;
            }

            let follow_ups = match routine {
                Some(routine) => {
                    let outcome = self.run_routine(routine, &label, token.take()).await;
                    match outcome {
                        Outcome::Completed(follow_ups) => follow_ups,
                        Outcome::Faulted(fault) => {
                            self.report_fault(&fault);
                            Vec::new()
                        }
                    }
                }
                None => Vec::new(),
            };
            drop(token);

            if !follow_ups.is_empty() {
                self.transition(&label, ExecutionState::SpawningContinuations);
                debug!(label = display_label(&label), count = follow_ups.len(), "spawning continuations");
                for follow_up in follow_ups {
                    if let Err(e) = self.admit(follow_up, None).await {
                        error!(label = display_label(&label), error = %e, "failed to admit continuation");
                    }
                }
            }

            self.counters.actions_completed.fetch_add(1, Ordering::Relaxed);
            self.transition(&label, ExecutionState::Completed);
        }
        .boxed()
    }

    /// Run a routine under a token, catching panics and errors.
    /// The token is released when this returns.
    async fn run_routine(
        &self,
        routine: Routine,
        label: &Option<String>,
        token: Option<AdmissionToken>,
    ) -> Outcome {
        let _token = match token {
            Some(token) => token,
            None => match self.gate.acquire().await {
                Ok(token) => token,
                Err(e) => return Outcome::Faulted(Fault::from_error(e.into(), label.clone())),
            },
        };

        self.transition(label, ExecutionState::Running);
        trace!(label = display_label(label), is_async = routine.is_async(), "routine starting");
        let _running = RunningGuard::enter(&self.counters);

        let result = match routine {
            Routine::Blocking(routine) => {
                let handle = self.runtime.spawn_blocking(move || panics::isolate(routine));
                match handle.await {
                    Ok(result) => result,
                    Err(join_error) => {
                        return Outcome::Faulted(Fault::from_error(join_error.into(), label.clone()))
                    }
                }
            }
            Routine::Async(routine) => match panics::isolate(routine) {
                // every poll runs inside its own isolation scope, since the
                // task may move between worker threads
                Ok(mut running) => {
                    future::poll_fn(|cx| match panics::isolate(|| running.poll_unpin(cx)) {
                        Ok(Poll::Ready(result)) => Poll::Ready(Ok(result)),
                        Ok(Poll::Pending) => Poll::Pending,
                        Err(caught) => Poll::Ready(Err(caught)),
                    })
                    .await
                }
                Err(caught) => Err(caught),
            },
        };

        match result {
            Ok(Ok(follow_ups)) => Outcome::Completed(follow_ups),
            Ok(Err(err)) => Outcome::Faulted(Fault::from_error(err, label.clone())),
            Err(caught) => Outcome::Faulted(Fault::from_panic(caught, label.clone())),
        }
    }

    fn report_fault(&self, fault: &Fault) {
        self.counters.routines_faulted.fetch_add(1, Ordering::Relaxed);
        error!(label = fault.label().unwrap_or("<unlabeled>"), message = %fault.message(), "action routine faulted");

        if let Err(e) = self
            .diagnostic_sink()
            .write_report(fault.render().as_bytes())
            .map_err(|e| PoolError::io("write fault report", e))
        {
            warn!(error = %e, category = e.category(), "failed to write fault report to diagnostic sink");
        }
    }

    fn transition(&self, label: &Option<String>, state: ExecutionState) {
        trace!(label = display_label(label), ?state, "action state");
    }
}
