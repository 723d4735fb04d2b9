//! Quiet-period debouncing for search input.
//!
//! A new call replaces the pending timer. Once a timer fires, its action runs
//! as an independent task that later calls never cancel; superseded network
//! results are discarded by the store's generation check instead.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct Debouncer {
  delay: Duration,
  timer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Debouncer {
  fn default() -> Self {
    Self::new(DEFAULT_DEBOUNCE)
  }
}

impl Debouncer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      timer: Mutex::new(None),
    }
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    self.timer.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `action` after the quiet period unless another call arrives first.
  ///
  /// Must be called from within a tokio runtime.
  pub fn call<F, Fut>(&self, action: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let delay = self.delay;
    let timer = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      tokio::spawn(action());
    });

    if let Some(previous) = self.timer().replace(timer) {
      if !previous.is_finished() {
        debug!("debounce timer replaced");
      }
      previous.abort();
    }
  }

  /// Drop the pending timer. Returns whether one was still waiting.
  pub fn cancel(&self) -> bool {
    match self.timer().take() {
      Some(timer) => {
        let waiting = !timer.is_finished();
        timer.abort();
        waiting
      }
      None => false,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.timer().as_ref().is_some_and(|t| !t.is_finished())
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    if let Some(timer) = self.timer().take() {
      timer.abort();
    }
  }
}
