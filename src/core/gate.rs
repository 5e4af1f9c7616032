//! Admission gate: a fixed-capacity counting resource that bounds how many
//! action executions hold a token at once.
//!
//! Tokens are RAII values. Dropping an [`AdmissionToken`] releases it, so a
//! token is returned exactly once on every exit path, unwinding included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

use crate::core::errors::Result;

#[derive(Debug)]
struct GateState {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total_admitted: AtomicUsize,
}

/// Bounded counting resource handing out [`AdmissionToken`]s
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    state: Arc<GateState>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` tokens; a capacity of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(GateState {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                total_admitted: AtomicUsize::new(0),
            }),
        }
    }

    /// Suspend until a token is free, then take it
    pub async fn acquire(&self) -> Result<AdmissionToken> {
        let permit = self.state.semaphore.clone().acquire_owned().await?;
        Ok(self.admit(permit))
    }

    /// Take a token only if one is free right now
    pub fn try_acquire(&self) -> Option<AdmissionToken> {
        match self.state.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(self.admit(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionToken {
        let now = self.state.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        self.state.total_admitted.fetch_add(1, Ordering::Relaxed);
        trace!(in_flight = now, capacity = self.state.capacity, "token acquired");

        AdmissionToken {
            state: self.state.clone(),
            _permit: permit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Tokens currently held
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of tokens ever held at once
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::Acquire)
    }

    /// Tokens handed out since construction
    pub fn total_admitted(&self) -> usize {
        self.state.total_admitted.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.state.semaphore.available_permits()
    }
}

/// One unit of admission; released on drop
#[derive(Debug)]
pub struct AdmissionToken {
    state: Arc<GateState>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        // The permit field drops after this body and wakes at most one waiter.
        let now = self.state.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(in_flight = now, "token released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_tokens_are_bounded_and_released_on_drop() {
        let gate = AdmissionGate::new(2);

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert!(gate.try_acquire().is_none());

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        let third = gate.try_acquire().expect("a token was released");

        drop(second);
        drop(third);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.peak_in_flight(), 2);
        assert_eq!(gate.total_admitted(), 3);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap()
            .unwrap();
        assert_eq!(gate.in_flight(), 0);
    }
}
