//! Coalescing of concurrent requests that share a cache key.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::Result;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// At most one network request per key is in flight; later callers for the
/// same key await the pending request instead of issuing their own.
#[derive(Default)]
pub struct InFlight {
  pending: Mutex<HashMap<String, SharedFetch>>,
}

impl InFlight {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `fetch` for `key`, or join the request already running for it.
  pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Result<Value>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    let shared = {
      let mut pending = self.lock();
      match pending.get(key) {
        Some(existing) => {
          debug!(key, "joining in-flight request");
          existing.clone()
        }
        None => {
          let shared = fetch().boxed().shared();
          pending.insert(key.to_string(), shared.clone());
          shared
        }
      }
    };

    let result = shared.clone().await;

    // A newer request for the same key may already have replaced ours.
    let mut pending = self.lock();
    if pending.get(key).is_some_and(|current| current.ptr_eq(&shared)) {
      pending.remove(key);
    }

    result
  }

  pub fn in_flight(&self) -> usize {
    self.lock().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_concurrent_calls_share_one_fetch() {
    let inflight = InFlight::new();
    let calls = Arc::new(AtomicU32::new(0));

    let make = || {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({"ok": true}))
      }
    };

    let (a, b) = tokio::join!(inflight.run("k", make()), inflight.run("k", make()));
    assert_eq!(a.unwrap(), json!({"ok": true}));
    assert_eq!(b.unwrap(), json!({"ok": true}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(inflight.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_sequential_calls_fetch_again() {
    let inflight = InFlight::new();
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let calls = calls.clone();
      inflight
        .run("k", move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(Value::Null)
        })
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_errors_are_shared() {
    let inflight = InFlight::new();
    let result = inflight
      .run("k", || async {
        Err(crate::error::ApiError::network(Some(500), "boom"))
      })
      .await;
    assert!(result.is_err());
    assert_eq!(inflight.in_flight(), 0);
  }
}
