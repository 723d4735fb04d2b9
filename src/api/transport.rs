//! HTTP transport seam between the API client and the network.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::{ApiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// A request relative to the API base path.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: Method,
  /// Path below the base URL, e.g. "/cities/slug/lisbon"
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub bearer_token: Option<String>,
}

impl HttpRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      bearer_token: None,
    }
  }
}

/// Status and decoded body. Empty bodies decode to `Value::Null`, non-JSON
/// bodies to `Value::String`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Value,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Sends requests. Implemented by [`HttpTransport`] for real traffic and by
/// scripted fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| ApiError::Config(format!("Invalid API base URL '{}': {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("nomad/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { client, base_url })
  }

  fn url_for(&self, request: &HttpRequest) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      request.path.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
      .map_err(|e| ApiError::Validation(format!("Invalid request path '{}': {}", request.path, e)))?;
    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
    let url = self.url_for(&request)?;

    let mut builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };
    if let Some(token) = &request.bearer_token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;

    let body = if text.trim().is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(HttpResponse { status, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_keeps_base_path() {
    let transport = HttpTransport::new("http://localhost:8000/api", Duration::from_secs(1)).unwrap();
    let mut request = HttpRequest::new(Method::Get, "/cities");
    request.query = vec![("limit".to_string(), "25".to_string())];

    let url = transport.url_for(&request).unwrap();
    assert_eq!(url.as_str(), "http://localhost:8000/api/cities?limit=25");
  }

  #[test]
  fn test_url_with_trailing_slash_base() {
    let transport = HttpTransport::new("http://localhost:8000/api/", Duration::from_secs(1)).unwrap();
    let request = HttpRequest::new(Method::Get, "/cities/slug/lisbon");
    let url = transport.url_for(&request).unwrap();
    assert_eq!(url.as_str(), "http://localhost:8000/api/cities/slug/lisbon");
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(matches!(
      HttpTransport::new("not a url", Duration::from_secs(1)),
      Err(ApiError::Config(_))
    ));
  }

  #[test]
  fn test_success_range() {
    assert!(HttpResponse { status: 204, body: Value::Null }.is_success());
    assert!(!HttpResponse { status: 404, body: Value::Null }.is_success());
  }
}
