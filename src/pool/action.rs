//! Action - a described unit of work
//!
//! An action is an optional work routine plus an ordered list of
//! prerequisite actions. Routines return follow-up actions ("continuations")
//! which the pool schedules after the routine finishes. Actions are consumed
//! by execution and never reused.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;

type BlockingFn = Box<dyn FnOnce() -> anyhow::Result<Vec<Action>> + Send + 'static>;
type AsyncFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Vec<Action>>> + Send + 'static>;

/// The body of an action
pub enum Routine {
    /// Runs on the runtime's blocking thread pool
    Blocking(BlockingFn),
    /// Polled directly on the runtime
    Async(AsyncFn),
}

impl Routine {
    pub fn is_async(&self) -> bool {
        matches!(self, Routine::Async(_))
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Routine::Blocking(_) => f.write_str("Routine::Blocking"),
            Routine::Async(_) => f.write_str("Routine::Async"),
        }
    }
}

/// A unit of work: an optional routine and its prerequisites
#[derive(Debug, Default)]
pub struct Action {
    pub(crate) routine: Option<Routine>,
    pub(crate) dependencies: Vec<Action>,
    pub(crate) label: Option<String>,
}

impl Action {
    /// Blocking routine returning follow-up actions
    pub fn new<F>(routine: F) -> Self
    where
        F: FnOnce() -> Vec<Action> + Send + 'static,
    {
        Self::fallible(move || Ok(routine()))
    }

    /// Blocking routine whose `Err` is reported like a panic
    pub fn fallible<F>(routine: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Vec<Action>> + Send + 'static,
    {
        Self {
            routine: Some(Routine::Blocking(Box::new(routine))),
            ..Self::default()
        }
    }

    /// Async routine returning follow-up actions
    pub fn from_async<F, Fut>(routine: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Vec<Action>> + Send + 'static,
    {
        Self::try_from_async(move || routine().map(Ok))
    }

    /// Async routine whose `Err` is reported like a panic
    pub fn try_from_async<F, Fut>(routine: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Action>>> + Send + 'static,
    {
        Self {
            routine: Some(Routine::Async(Box::new(move || routine().boxed()))),
            ..Self::default()
        }
    }

    /// Routine-less node that completes once all `dependencies` have
    pub fn group<I>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        Self::default().with_dependencies(dependencies)
    }

    /// Add one prerequisite
    pub fn with_dependency(mut self, dependency: Action) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add prerequisites, keeping their order
    pub fn with_dependencies<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        self.dependencies.extend(dependencies);
        self
    }

    /// Name used in fault reports and logs
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn has_routine(&self) -> bool {
        self.routine.is_some()
    }

    pub fn dependencies(&self) -> &[Action] {
        &self.dependencies
    }

    /// Number of actions in this description, prerequisites included.
    /// Follow-ups are unknown until routines run and are not counted.
    pub fn node_count(&self) -> usize {
        1 + self.dependencies.iter().map(Action::node_count).sum::<usize>()
    }
}
