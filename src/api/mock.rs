//! Scripted in-memory transport for exercising the data layer without a
//! server.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ApiError, Result};

use super::transport::{HttpRequest, HttpResponse, Transport};

#[derive(Clone)]
struct Scripted {
  response: Result<HttpResponse>,
  delay: Option<Duration>,
}

/// Answers requests from a table of routes and records every request.
///
/// Routes are matched on `"METHOD /path"` plus the query string when one
/// was registered with it (`"GET /cities?limit=25"`), falling back to the
/// bare path. Unmatched requests get a 404.
#[derive(Default)]
pub struct MockTransport {
  routes: Mutex<HashMap<String, Scripted>>,
  requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  fn routes(&self) -> MutexGuard<'_, HashMap<String, Scripted>> {
    self.routes.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn log(&self) -> MutexGuard<'_, Vec<HttpRequest>> {
    self.requests.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Answer `route` (e.g. `"GET /cities"`) with `status` and `body`.
  pub fn on(&self, route: &str, status: u16, body: Value) -> &Self {
    self.script(route, Ok(HttpResponse { status, body }), None)
  }

  /// Like [`MockTransport::on`], answering only after `delay`.
  pub fn on_delayed(&self, route: &str, delay: Duration, status: u16, body: Value) -> &Self {
    self.script(route, Ok(HttpResponse { status, body }), Some(delay))
  }

  /// Fail `route` as if the server were unreachable.
  pub fn fail(&self, route: &str, message: &str) -> &Self {
    self.script(route, Err(ApiError::network(None, message)), None)
  }

  fn script(&self, route: &str, response: Result<HttpResponse>, delay: Option<Duration>) -> &Self {
    self
      .routes()
      .insert(route.to_string(), Scripted { response, delay });
    self
  }

  /// Every request sent so far.
  pub fn requests(&self) -> Vec<HttpRequest> {
    self.log().clone()
  }

  /// Number of requests sent to `path` with any method and query.
  pub fn calls(&self, path: &str) -> usize {
    self.log().iter().filter(|r| r.path == path).count()
  }

  pub fn total_calls(&self) -> usize {
    self.log().len()
  }

  fn lookup(&self, request: &HttpRequest) -> Option<Scripted> {
    let route = format!("{} {}", request.method.as_str(), request.path);
    let routes = self.routes();
    if !request.query.is_empty() {
      let query: Vec<String> = request
        .query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
      if let Some(found) = routes.get(&format!("{}?{}", route, query.join("&"))) {
        return Some(found.clone());
      }
    }
    routes.get(&route).cloned()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
    let scripted = self.lookup(&request);
    self.log().push(request);

    let Some(scripted) = scripted else {
      return Ok(HttpResponse {
        status: 404,
        body: Value::Null,
      });
    };
    if let Some(delay) = scripted.delay {
      tokio::time::sleep(delay).await;
    }
    scripted.response
  }
}
