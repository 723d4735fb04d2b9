use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::QueryParams;
use crate::error::{ApiError, Result};
use crate::storage::{LocalStorage, TOKEN_KEY};

use super::transport::{HttpRequest, HttpResponse, Method, Transport};

type UnauthorizedHandler = Arc<dyn Fn() + Send + Sync>;

/// REST API client.
///
/// Attaches the persisted bearer token to every request and turns non-2xx
/// answers into [`ApiError`]s. A 401 clears the stored token and fires the
/// unauthorized handler so the caller can send the user to log in again.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  storage: Arc<dyn LocalStorage>,
  on_unauthorized: Option<UnauthorizedHandler>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn LocalStorage>) -> Self {
    Self {
      transport,
      storage,
      on_unauthorized: None,
    }
  }

  pub fn with_unauthorized_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
    self.on_unauthorized = Some(Arc::new(handler));
    self
  }

  /// The persisted token, if any. Storage failures read as "no token".
  pub fn token(&self) -> Option<String> {
    match self.storage.get_item(TOKEN_KEY) {
      Ok(token) => token.filter(|t| !t.is_empty()),
      Err(e) => {
        warn!(error = %e, "failed to read auth token");
        None
      }
    }
  }

  pub fn has_token(&self) -> bool {
    self.token().is_some()
  }

  pub fn set_token(&self, token: &str) -> Result<()> {
    self.storage.set_item(TOKEN_KEY, token)
  }

  pub fn clear_token(&self) -> Result<()> {
    self.storage.remove_item(TOKEN_KEY)
  }

  pub async fn get(&self, path: &str, params: &QueryParams) -> Result<Value> {
    let mut request = HttpRequest::new(Method::Get, path);
    request.query = params.to_query_pairs();
    self.execute(request).await
  }

  pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
    let mut request = HttpRequest::new(Method::Post, path);
    request.body = body;
    self.execute(request).await
  }

  pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
    let mut request = HttpRequest::new(Method::Put, path);
    request.body = Some(body);
    self.execute(request).await
  }

  pub async fn delete(&self, path: &str) -> Result<Value> {
    self.execute(HttpRequest::new(Method::Delete, path)).await
  }

  async fn execute(&self, mut request: HttpRequest) -> Result<Value> {
    request.bearer_token = self.token();
    let method = request.method;
    let path = request.path.clone();

    info!(method = method.as_str(), path = %path, "api request");
    let response = self.transport.send(request).await.map_err(|e| {
      error!(method = method.as_str(), path = %path, error = %e, "request failed");
      e
    })?;

    if response.is_success() {
      debug!(status = response.status, path = %path, "api response");
      return Ok(response.body);
    }

    Err(self.handle_failure(&path, response))
  }

  fn handle_failure(&self, path: &str, response: HttpResponse) -> ApiError {
    let message = server_message(&response.body)
      .unwrap_or_else(|| format!("Request failed with status {}", response.status));

    match response.status {
      401 => {
        warn!(path, "unauthorized, clearing stored token");
        if let Err(e) = self.clear_token() {
          error!(error = %e, "failed to clear auth token");
        }
        if let Some(handler) = &self.on_unauthorized {
          handler();
        }
        ApiError::Unauthorized
      }
      404 => {
        warn!(path, "resource not found");
        ApiError::NotFound(format!("Resource {}", path))
      }
      403 => {
        warn!(path, "access forbidden");
        ApiError::network(Some(403), message)
      }
      status if status >= 500 => {
        error!(path, status, "server error occurred");
        ApiError::network(Some(status), message)
      }
      status => ApiError::network(Some(status), message),
    }
  }
}

/// `message` or `error` text from an error body.
fn server_message(body: &Value) -> Option<String> {
  match body {
    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
    Value::Object(map) => ["message", "error"]
      .iter()
      .find_map(|k| map.get(*k).and_then(Value::as_str))
      .map(String::from),
    _ => None,
  }
}

/// Characters escaped in a path segment: everything but RFC 3986 unreserved.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'.')
  .remove(b'_')
  .remove(b'~');

/// Percent-encode a single path segment.
pub fn path_segment(raw: &str) -> String {
  utf8_percent_encode(raw, SEGMENT).to_string()
}
