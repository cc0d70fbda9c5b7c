use crate::error::HttpError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed-capacity permit pool in front of the synchronous entry points.
///
/// Cloning shares the same pool. Waiters are served in FIFO order by the
/// underlying semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held while a gated call is in flight; releases its slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` permits (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free permit.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Interrupted` if the gate was closed, before or
    /// while waiting.
    pub async fn acquire(&self) -> Result<GatePermit, HttpError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HttpError::Interrupted)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take a permit only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wake all waiters with `Interrupted` and refuse further acquisitions.
    /// Permits already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = ConcurrencyGate::new(2);
        assert_eq!(gate.capacity(), 2);

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().is_none());

        drop(first);
        assert_eq!(gate.available(), 1);
        drop(second);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_third_waiter_blocks_until_release() {
        let gate = ConcurrencyGate::new(2);
        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_permit| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "third acquire should still be waiting");

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after a release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_permit_released_on_error_path() {
        async fn failing(gate: &ConcurrencyGate) -> Result<(), HttpError> {
            let _permit = gate.acquire().await?;
            Err(HttpError::EmptyResult)
        }

        let gate = ConcurrencyGate::new(1);
        assert!(failing(&gate).await.is_err());
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_close_interrupts_waiters() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_permit| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(HttpError::Interrupted)));
        assert!(gate.is_closed());
        drop(held);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
