//! reqwest-backed [`Transport`] for a live simulator backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Method, RawReply, Transport};
use crate::connection::BackendAddress;
use crate::error::{ClientError, Result};

/// HTTP client configuration.
///
/// The client does not impose its own request deadline unless one is set
/// here; by default the transport's own behaviour applies.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Optional per-request timeout
    pub request_timeout: Option<Duration>,
    /// Optional connect timeout
    pub connect_timeout: Option<Duration>,
}

impl HttpConfig {
    /// Build from the optional millisecond timeout in settings.
    #[must_use]
    pub fn with_request_timeout_ms(timeout_ms: Option<u64>) -> Self {
        Self {
            request_timeout: timeout_ms.map(Duration::from_millis),
            connect_timeout: None,
        }
    }
}

/// Talks JSON over HTTP to the backend at a fixed base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    address: BackendAddress,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with explicit timeouts.
    pub fn with_config(address: BackendAddress, config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(
            backend = %address,
            source = address.source().label(),
            "Using simulator backend"
        );
        Ok(Self { address, client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<RawReply> {
        let url = self.address.endpoint(path)?;
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status().as_u16();

        // Bodies that are missing or not JSON still carry a usable status code.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(RawReply { status, body })
    }
}
