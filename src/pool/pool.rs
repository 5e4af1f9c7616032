use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::action::Action;
use super::diagnostics::{DiagnosticSink, StderrSink};
use super::execution::ExecutionCounters;
use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, Result};
use crate::core::gate::AdmissionGate;
use crate::core::tracker::CompletionTracker;

/// State shared by the pool handle and every running execution
pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) gate: AdmissionGate,
    pub(crate) tracker: Arc<CompletionTracker>,
    pub(crate) runtime: Handle,
    pub(crate) counters: ExecutionCounters,
    closed: AtomicBool,
    sink: RwLock<Arc<dyn DiagnosticSink>>,
}

impl PoolInner {
    pub(crate) fn diagnostic_sink(&self) -> Arc<dyn DiagnosticSink> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Snapshot of pool activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Admission tokens currently held
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Submitted or spawned actions not yet finished
    pub outstanding: usize,
    /// Routines executing right now
    pub running: usize,
    pub peak_running: usize,
    pub actions_completed: u64,
    pub routines_faulted: u64,
    pub closed: bool,
}

/// Bounded-concurrency executor for graphs of [`Action`]s.
///
/// Cloning is cheap and every clone drives the same pool, so routines may
/// capture a handle. A routine that awaits `submit` on its own pool while
/// holding a token can starve a pool of capacity 1; returning follow-up
/// actions is the way to fan out.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool on the current tokio runtime
    pub fn new(config: PoolConfig) -> Result<Self> {
        let handle = Handle::try_current()?;
        Self::with_handle(config, handle)
    }

    /// Create a pool allowing `max_concurrent` executions (0 = host parallelism)
    pub fn with_capacity(max_concurrent: usize) -> Result<Self> {
        Self::new(PoolConfig::with_capacity(max_concurrent))
    }

    /// Create a pool that spawns onto `handle`
    pub fn with_handle(config: PoolConfig, handle: Handle) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity();
        info!(capacity, "ActionPool created");

        Ok(Self {
            inner: Arc::new(PoolInner {
                gate: AdmissionGate::new(capacity),
                tracker: Arc::new(CompletionTracker::new()),
                runtime: handle,
                counters: ExecutionCounters::default(),
                closed: AtomicBool::new(false),
                sink: RwLock::new(Arc::new(StderrSink)),
                config,
            }),
        })
    }

    /// Submit an action and return once it has been admitted.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been closed by [`Pool::wait_and_close`].
    pub async fn submit(&self, action: Action) {
        if let Err(e) = self.try_submit(action).await {
            panic!("{}", e);
        }
    }

    /// Like [`Pool::submit`], but reports a closed pool as [`PoolError::Closed`]
    pub async fn try_submit(&self, action: Action) -> Result<()> {
        if self.is_closed() {
            debug!("submission rejected: pool closed");
            return Err(PoolError::Closed);
        }
        debug!(
            label = action.label().unwrap_or("<unlabeled>"),
            nodes = action.node_count(),
            "action submitted"
        );
        self.inner.admit(action, None).await
    }

    /// Wait until every submitted and spawned action has finished.
    /// The pool stays open.
    pub async fn wait(&self) {
        self.inner.tracker.wait().await;
    }

    /// Close the pool to new submissions, then wait for outstanding work
    pub async fn wait_and_close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(outstanding = self.inner.tracker.outstanding(), "ActionPool closing");
        }
        self.wait().await;
    }

    /// Apply `transform` to every input concurrently and return the results in
    /// input order. `None` marks an element whose transform faulted.
    ///
    /// # Panics
    ///
    /// Panics if the pool is closed and `inputs` is not empty.
    pub async fn map<T, R, F, I>(&self, inputs: I, transform: F) -> Vec<Option<R>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        match self.try_map(inputs, transform).await {
            Ok(results) => results,
            Err(e) => panic!("{}", e),
        }
    }

    /// Like [`Pool::map`], but reports a closed pool as [`PoolError::Closed`]
    pub async fn try_map<T, R, F, I>(&self, inputs: I, transform: F) -> Result<Vec<Option<R>>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let inputs: Vec<T> = inputs.into_iter().collect();
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let slots: Arc<Mutex<Vec<Option<R>>>> =
            Arc::new(Mutex::new((0..inputs.len()).map(|_| None).collect()));
        let transform = Arc::new(transform);
        // Private tracker: unrelated work on the pool does not hold up the map.
        let batch = Arc::new(CompletionTracker::new());
        debug!(count = inputs.len(), "map: submitting leaf actions");

        for (index, input) in inputs.into_iter().enumerate() {
            let slots = slots.clone();
            let transform = transform.clone();
            let action = Action::new(move || {
                let value = transform(input);
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(value);
                Vec::new()
            })
            .labeled(format!("map[{}]", index));

            self.inner.admit(action, Some(batch.clone())).await?;
        }

        batch.wait().await;
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *slots))
    }

    /// Replace the destination of fault reports (standard error by default)
    pub fn set_diagnostic_sink<S>(&self, sink: S)
    where
        S: DiagnosticSink + 'static,
    {
        *self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(sink);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The resolved concurrency ceiling
    pub fn capacity(&self) -> usize {
        self.inner.gate.capacity()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            capacity: self.inner.gate.capacity(),
            in_flight: self.inner.gate.in_flight(),
            peak_in_flight: self.inner.gate.peak_in_flight(),
            outstanding: self.inner.tracker.outstanding(),
            running: counters.running.load(Ordering::Acquire),
            peak_running: counters.peak_running.load(Ordering::Acquire),
            actions_completed: counters.actions_completed.load(Ordering::Relaxed),
            routines_faulted: counters.routines_faulted.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("outstanding", &self.inner.tracker.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::diagnostics::MemorySink;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_requires_runtime() {
        let err = Pool::with_capacity(2).unwrap_err();
        assert!(matches!(err, PoolError::NoRuntime { .. }));
    }

    #[test]
    fn test_with_handle_outside_async_context() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let pool = Pool::with_handle(PoolConfig::with_capacity(3), runtime.handle().clone()).unwrap();
        assert_eq!(pool.capacity(), 3);

        let hits = Arc::new(AtomicUsize::new(0));
        runtime.block_on(async {
            for _ in 0..5 {
                let hits = hits.clone();
                pool.submit(Action::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Vec::new()
                }))
                .await;
            }
            pool.wait_and_close().await;
        });
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_capacity_resolves_to_host_parallelism() {
        let pool = Pool::new(PoolConfig::default()).unwrap();
        assert!(pool.capacity() >= 1);
        assert_eq!(pool.config().max_concurrent, 0);
    }

    #[tokio::test]
    async fn test_try_submit_after_close() {
        let pool = Pool::with_capacity(1).unwrap();
        pool.wait_and_close().await;
        pool.wait_and_close().await;
        assert!(pool.is_closed());

        let err = pool.try_submit(Action::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
        assert!(matches!(pool.try_map(vec![1], |x: i32| x).await, Err(PoolError::Closed)));
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_stats_after_work() {
        let pool = Pool::with_capacity(2).unwrap();
        let sink = MemorySink::new();
        pool.set_diagnostic_sink(sink.clone());

        pool.submit(Action::new(Vec::new)).await;
        pool.submit(Action::new(|| panic!("stats fault"))).await;
        pool.wait().await;

        let stats = pool.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.actions_completed, 2);
        assert_eq!(stats.routines_faulted, 1);
        assert!(!stats.closed);
        assert!(sink.contents_string().starts_with("stats fault"));
    }
}
