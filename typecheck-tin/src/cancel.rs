//! Cooperative cancellation root.
//!
//! A [`CancelToken`] is carried by a snapshot and observed by every
//! long-running operation: before acquiring the CPU semaphore, between
//! parsing and checking, and while blocked on a future. Blocking waiters
//! register their condvar with the token so that `cancel` wakes them
//! immediately instead of leaving them parked.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::FatalError;

#[derive(Clone, Default)]
pub struct CancelToken {
  inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
  flag: AtomicBool,
  watchers: Mutex<Vec<Weak<Condvar>>>,
}

impl CancelToken {
  pub fn new() -> CancelToken {
    CancelToken::default()
  }

  /// Request cancellation and wake every registered waiter.
  pub fn cancel(&self) {
    self.inner.flag.store(true, Ordering::SeqCst);
    let mut watchers = self.inner.watchers.lock();
    for watcher in watchers.drain(..) {
      if let Some(condvar) = watcher.upgrade() {
        condvar.notify_all();
      }
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.flag.load(Ordering::SeqCst)
  }

  /// Return `Err(Cancelled)` if cancellation has been requested.
  pub fn check(&self) -> Result<(), FatalError> {
    if self.is_cancelled() {
      Err(FatalError::Cancelled)
    } else {
      Ok(())
    }
  }

  /// Register a condvar to be notified on cancellation. Dead watchers are
  /// pruned opportunistically; a token cancelled before registration
  /// notifies the condvar at once.
  pub(crate) fn watch(&self, condvar: &Arc<Condvar>) {
    {
      let mut watchers = self.inner.watchers.lock();
      watchers.retain(|w| w.strong_count() > 0);
      watchers.push(Arc::downgrade(condvar));
    }
    if self.is_cancelled() {
      condvar.notify_all();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn check_reflects_cancellation() {
    let token = CancelToken::new();
    assert!(token.check().is_ok());
    token.cancel();
    assert_eq!(token.check(), Err(FatalError::Cancelled));
  }

  #[test]
  fn cancel_wakes_registered_waiter() {
    let token = CancelToken::new();
    let condvar = Arc::new(Condvar::new());
    let gate = Arc::new(Mutex::new(()));
    token.watch(&condvar);

    let waiter = {
      let token = token.clone();
      let condvar = Arc::clone(&condvar);
      let gate = Arc::clone(&gate);
      thread::spawn(move || {
        let mut guard = gate.lock();
        while !token.is_cancelled() {
          condvar.wait_for(&mut guard, Duration::from_millis(20));
        }
      })
    };

    thread::sleep(Duration::from_millis(10));
    token.cancel();
    waiter.join().expect("waiter should wake on cancel");
  }
}
