//! Blocking primitives for the type-check batch.
//!
//! [`Latch`] is the single-producer, many-consumer future used to
//! deduplicate package builds: the task that installs the latch computes
//! the value, everyone else blocks on it. [`Semaphore`] is the counting
//! limiter that bounds CPU-heavy work. Both waits are cancellable through
//! the snapshot's [`CancelToken`]; a timed re-check backstops the
//! cancellation wakeup so no waiter can stay parked across a missed
//! notification.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::FatalError;

const WAIT_RECHECK: Duration = Duration::from_millis(50);

/// A write-once value plus a completion signal.
pub(crate) struct Latch<T> {
  value: Mutex<Option<T>>,
  condvar: Arc<Condvar>,
}

impl<T: Clone> Latch<T> {
  /// Create an empty latch whose waiters wake when `cancel` fires.
  pub(crate) fn new(cancel: &CancelToken) -> Arc<Latch<T>> {
    let latch = Arc::new(Latch {
      value: Mutex::new(None),
      condvar: Arc::new(Condvar::new()),
    });
    cancel.watch(&latch.condvar);
    latch
  }

  /// Create a latch that is already complete. Used to seed a batch with
  /// results carried over from a previous snapshot's import graph.
  pub(crate) fn ready(value: T) -> Arc<Latch<T>> {
    Arc::new(Latch {
      value: Mutex::new(Some(value)),
      condvar: Arc::new(Condvar::new()),
    })
  }

  /// Publish the value and wake all waiters. The installing task is the
  /// only producer; completing twice is a logic error.
  pub(crate) fn complete(&self, value: T) {
    let mut slot = self.value.lock();
    debug_assert!(slot.is_none(), "latch completed twice");
    *slot = Some(value);
    drop(slot);
    self.condvar.notify_all();
  }

  /// Block until the value is published or the token is cancelled.
  pub(crate) fn wait(&self, cancel: &CancelToken) -> Result<T, FatalError> {
    let mut slot = self.value.lock();
    loop {
      if let Some(value) = slot.as_ref() {
        return Ok(value.clone());
      }
      cancel.check()?;
      self.condvar.wait_for(&mut slot, WAIT_RECHECK);
    }
  }

  /// Non-blocking read of the published value, if any.
  pub(crate) fn try_get(&self) -> Option<T> {
    self.value.lock().clone()
  }
}

/// Counting semaphore bounding CPU-parallel work.
pub(crate) struct Semaphore {
  permits: Mutex<usize>,
  condvar: Arc<Condvar>,
}

impl Semaphore {
  pub(crate) fn new(permits: usize, cancel: &CancelToken) -> Semaphore {
    let semaphore = Semaphore {
      permits: Mutex::new(permits.max(1)),
      condvar: Arc::new(Condvar::new()),
    };
    cancel.watch(&semaphore.condvar);
    semaphore
  }

  /// Acquire one permit, blocking until one is free. The wait observes
  /// cancellation.
  pub(crate) fn acquire(&self, cancel: &CancelToken) -> Result<SemaphorePermit<'_>, FatalError> {
    let mut permits = self.permits.lock();
    loop {
      cancel.check()?;
      if *permits > 0 {
        *permits -= 1;
        return Ok(SemaphorePermit { semaphore: self });
      }
      self.condvar.wait_for(&mut permits, WAIT_RECHECK);
    }
  }
}

/// RAII permit; releases on drop.
pub(crate) struct SemaphorePermit<'a> {
  semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
  fn drop(&mut self) {
    let mut permits = self.semaphore.permits.lock();
    *permits += 1;
    drop(permits);
    self.semaphore.condvar.notify_one();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn latch_delivers_to_multiple_waiters() {
    let cancel = CancelToken::new();
    let latch: Arc<Latch<u32>> = Latch::new(&cancel);

    thread::scope(|scope| {
      let mut handles = Vec::new();
      for _ in 0..4 {
        let latch = Arc::clone(&latch);
        let cancel = cancel.clone();
        handles.push(scope.spawn(move || latch.wait(&cancel)));
      }
      latch.complete(7);
      for handle in handles {
        assert_eq!(handle.join().expect("join"), Ok(7));
      }
    });
  }

  #[test]
  fn latch_wait_observes_cancellation() {
    let cancel = CancelToken::new();
    let latch: Arc<Latch<u32>> = Latch::new(&cancel);
    cancel.cancel();
    assert_eq!(latch.wait(&cancel), Err(FatalError::Cancelled));
  }

  #[test]
  fn semaphore_bounds_concurrency() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let cancel = CancelToken::new();
    let semaphore = Semaphore::new(2, &cancel);
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|scope| {
      for _ in 0..8 {
        scope.spawn(|| {
          let _permit = semaphore.acquire(&cancel).expect("acquire");
          let now = active.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(5));
          active.fetch_sub(1, Ordering::SeqCst);
        });
      }
    });

    assert!(peak.load(Ordering::SeqCst) <= 2);
  }

  #[test]
  fn semaphore_acquire_fails_after_cancel() {
    let cancel = CancelToken::new();
    let semaphore = Semaphore::new(1, &cancel);
    let _held = semaphore.acquire(&cancel).expect("first acquire");
    cancel.cancel();
    assert!(matches!(
      semaphore.acquire(&cancel),
      Err(FatalError::Cancelled)
    ));
  }
}
