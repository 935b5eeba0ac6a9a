//! Network seam between the gateway and the remote API.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::ApiError;

/// A single API call, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  /// Path and query, e.g. "/books/7"
  pub endpoint: String,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn get(endpoint: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      endpoint: endpoint.into(),
      body: None,
    }
  }

  pub fn with_body(method: Method, endpoint: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      body,
    }
  }
}

/// Raw response; status interpretation belongs to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: String,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Anything that can carry an [`ApiRequest`] to the server.
///
/// Implementations must report unreachability as [`ApiError::Connectivity`];
/// any HTTP answer, whatever its status, is an `Ok` response.
pub trait Transport: Send + Sync {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: String,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(base_url: &Url, timeout: Duration, token: Option<String>) -> Result<Self, ApiError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApiError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: base_url.as_str().trim_end_matches('/').to_string(),
      token,
    })
  }

  fn url(&self, endpoint: &str) -> String {
    format!("{}{}", self.base_url, endpoint)
  }

  async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
    let url = self.url(&request.endpoint);
    debug!(method = %request.method, url = %url, "Sending request");

    let mut builder = self
      .client
      .request(request.method, &url)
      .header(header::ACCEPT, "application/json");
    if let Some(ref token) = self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(ref body) = request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(classify)?;

    Ok(ApiResponse { status, body })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
    self.execute(request).boxed()
  }
}

/// Map a reqwest failure to a structured error kind.
fn classify(e: reqwest::Error) -> ApiError {
  if e.is_builder() {
    ApiError::InvalidRequest(e.to_string())
  } else if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
    ApiError::Connectivity(e.to_string())
  } else {
    // decode failures, redirect loops and anything else the server caused
    ApiError::InvalidResponse(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_joins_without_double_slash() {
    let base = Url::parse("http://localhost:5001/api/").unwrap();
    let transport = HttpTransport::new(&base, Duration::from_secs(5), None).unwrap();
    assert_eq!(transport.url("/books/7"), "http://localhost:5001/api/books/7");
  }

  #[tokio::test]
  async fn test_unreachable_host_is_connectivity_error() {
    // Port 9 on loopback: nothing listens, connection is refused.
    let base = Url::parse("http://127.0.0.1:9/api").unwrap();
    let transport = HttpTransport::new(&base, Duration::from_secs(2), None).unwrap();

    let err = transport.send(ApiRequest::get("/books")).await.unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {:?}", err);
  }

  #[tokio::test]
  async fn test_redirect_loop_is_not_connectivity() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      while let Ok((mut socket, _)) = listener.accept().await {
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let _ = socket
          .write_all(
            b"HTTP/1.1 302 Found\r\nLocation: /loop\r\nContent-Length: 0\r\n\
              Connection: close\r\n\r\n",
          )
          .await;
      }
    });

    let base = Url::parse(&format!("http://{}/api", addr)).unwrap();
    let transport = HttpTransport::new(&base, Duration::from_secs(5), None).unwrap();

    let err = transport.send(ApiRequest::get("/books")).await.unwrap_err();
    assert!(!err.is_connectivity(), "unexpected error: {:?}", err);
    assert!(matches!(err, ApiError::InvalidResponse(_)));
  }

  #[test]
  fn test_success_range() {
    let ok = ApiResponse {
      status: 204,
      body: String::new(),
    };
    let denied = ApiResponse {
      status: 401,
      body: String::new(),
    };
    assert!(ok.is_success());
    assert!(!denied.is_success());
  }
}
