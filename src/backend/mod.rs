//! Typed access to the simulator backend's HTTP API.
//!
//! The backend is reached through the [`Transport`] trait, which only knows how
//! to move JSON bodies and report the HTTP status. [`BackendClient`] sits on top
//! of it and owns everything that gives a reply meaning:
//!
//! - mapping non-2xx statuses to [`ClientError::Rejected`], extracting the
//!   message from the body or synthesizing one from the status code
//! - treating a 2xx body whose `status` field is not `"success"` as a
//!   [`ClientError::SoftFailure`]
//! - decoding the endpoint-specific payloads
//!
//! Two transports ship with the crate: [`http::HttpTransport`] (reqwest) and
//! [`mock::MockBackend`], an in-memory simulation of the backend used by the
//! tests and by `spisim --mock`.

pub mod http;
pub mod mock;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::device::DeviceConfig;
use crate::error::{ClientError, Result};

/// Endpoint paths, relative to the backend base URL.
pub mod endpoints {
    /// Save device configuration.
    pub const CONFIG: &str = "spi/config";
    /// One-shot command exchange.
    pub const COMMAND: &str = "spi/command";
    /// Replace the sequence table.
    pub const SEQUENCES: &str = "spi/sequences";
    /// Load the virtual driver.
    pub const LOAD_DRIVER: &str = "spi/load-driver";
    /// Unload the virtual driver.
    pub const UNLOAD_DRIVER: &str = "spi/unload-driver";
    /// Fetch the rotating event log.
    pub const LOGS: &str = "spi/logs";
    /// Clear the event log.
    pub const CLEAR_LOGS: &str = "spi/clear-logs";
    /// Subsystem health snapshot.
    pub const SYSTEM_STATUS: &str = "system/status";
}

/// HTTP method used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// An uninterpreted backend reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body, if the body was present and valid JSON
    pub body: Option<Value>,
}

impl RawReply {
    /// Build a reply with a JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    /// Build a reply with no body.
    pub fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves requests to the backend and returns its raw replies.
///
/// Implementations must return `Err(ClientError::Transport(_))` when no reply
/// was received and `Ok(RawReply)` for every reply, whatever its status.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request to `path` (relative to the base URL).
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<RawReply>;
}

// =============================================================================
// Wire types
// =============================================================================

/// Body of `POST spi/config`: the full config plus the derived device name.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigRequest<'a> {
    /// Name the backend keys the virtual device by
    pub device_name: String,
    /// Full device configuration
    #[serde(flatten)]
    pub config: &'a DeviceConfig,
}

/// Body of `POST spi/command`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest<'a> {
    /// Hex command text, passed through verbatim
    pub command: &'a str,
    /// Device node the backend should talk to
    pub device_path: &'a str,
}

/// A received→response pair as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePayload {
    /// Bytes the device expects to receive
    pub received: String,
    /// Bytes the device answers with
    pub response: String,
}

/// Body of `POST spi/load-driver`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadDriverRequest {
    /// Name the virtual device is created under
    pub device_name: String,
    /// Expected conversation, in order
    pub sequences: Vec<SequencePayload>,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogsReply {
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    data: SystemStatus,
}

/// Health of one server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHealth {
    /// Whether the server is listening
    #[serde(rename = "status")]
    pub up: bool,
    /// Port it is expected on
    pub port: u16,
}

/// Health of the virtual driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverHealth {
    /// Whether the kernel module is loaded
    #[serde(rename = "status")]
    pub loaded: bool,
    /// Device node it exposes, empty when none
    #[serde(default, deserialize_with = "null_as_empty")]
    pub device: String,
}

/// Snapshot of the three independently monitored subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Control server (the HTTP backend itself)
    pub backend: ServerHealth,
    /// UI server
    pub frontend: ServerHealth,
    /// Virtual driver
    pub driver: DriverHealth,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Reply interpretation
// =============================================================================

const SUCCESS: &str = "success";

/// Pull a human-readable message out of a reply body.
fn body_message(body: Option<&Value>) -> Option<String> {
    let body = body?;
    ["message", "error", "detail"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

/// Classify a raw reply, returning its body when the backend accepted the call.
///
/// Non-2xx → `Rejected`; 2xx with `status != "success"` → `SoftFailure`.
/// A 2xx body without a `status` field is accepted as is.
pub fn interpret(reply: RawReply) -> Result<Option<Value>> {
    if !reply.is_success() {
        let message = body_message(reply.body.as_ref())
            .unwrap_or_else(|| format!("HTTP error! status: {}", reply.status));
        return Err(ClientError::Rejected {
            status: reply.status,
            message,
        });
    }

    if let Some(status) = reply
        .body
        .as_ref()
        .and_then(|body| body.get("status"))
        .and_then(Value::as_str)
    {
        if status != SUCCESS {
            let message = body_message(reply.body.as_ref())
                .unwrap_or_else(|| "backend reported failure".to_string());
            return Err(ClientError::SoftFailure(message));
        }
    }

    Ok(reply.body)
}

fn decode<T: serde::de::DeserializeOwned>(body: Option<Value>, what: &str) -> Result<T> {
    let body = body.ok_or_else(|| ClientError::Decode(format!("{what}: empty body")))?;
    serde_json::from_value(body).map_err(|e| ClientError::Decode(format!("{what}: {e}")))
}

fn to_body<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

// =============================================================================
// BackendClient
// =============================================================================

/// Typed client for the simulator backend.
///
/// Cheap to clone; all clones share the same transport.
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient").finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>> {
        tracing::debug!(%method, path, "Sending backend request");
        let reply = self.transport.request(method, path, body).await.map_err(|e| {
            tracing::warn!(%method, path, error = %e, "Backend request failed");
            e
        })?;
        tracing::debug!(%method, path, status = reply.status, "Received backend reply");
        interpret(reply)
    }

    /// `POST spi/config`.
    pub async fn save_config(&self, device_name: &str, config: &DeviceConfig) -> Result<()> {
        let body = to_body(&ConfigRequest {
            device_name: device_name.to_string(),
            config,
        })?;
        self.call(Method::Post, endpoints::CONFIG, Some(body)).await?;
        Ok(())
    }

    /// `POST spi/command`. Returns the device's response text.
    pub async fn send_command(&self, command: &str, device_path: &str) -> Result<String> {
        let body = to_body(&CommandRequest {
            command,
            device_path,
        })?;
        let reply = self.call(Method::Post, endpoints::COMMAND, Some(body)).await?;
        let reply: CommandReply = decode(reply, "command reply")?;
        Ok(reply.response.unwrap_or_default())
    }

    /// `POST spi/sequences` with the full ordered table.
    pub async fn replace_sequences(&self, sequences: &[SequencePayload]) -> Result<()> {
        let body = to_body(&sequences)?;
        self.call(Method::Post, endpoints::SEQUENCES, Some(body)).await?;
        Ok(())
    }

    /// `POST spi/load-driver`. Returns the backend's message, if any.
    pub async fn load_driver(&self, request: &LoadDriverRequest) -> Result<Option<String>> {
        let body = to_body(request)?;
        let reply = self.call(Method::Post, endpoints::LOAD_DRIVER, Some(body)).await?;
        Self::require_status_body(reply.as_ref(), "load-driver reply")?;
        Ok(body_message(reply.as_ref()))
    }

    /// `POST spi/unload-driver`. Returns the backend's message, if any.
    pub async fn unload_driver(&self) -> Result<Option<String>> {
        let reply = self.call(Method::Post, endpoints::UNLOAD_DRIVER, None).await?;
        Self::require_status_body(reply.as_ref(), "unload-driver reply")?;
        Ok(body_message(reply.as_ref()))
    }

    /// `GET spi/logs`.
    pub async fn fetch_logs(&self) -> Result<Vec<String>> {
        let reply = self.call(Method::Get, endpoints::LOGS, None).await?;
        let reply: LogsReply = decode(reply, "logs reply")?;
        Ok(reply.logs)
    }

    /// `POST spi/clear-logs`.
    pub async fn clear_logs(&self) -> Result<()> {
        self.call(Method::Post, endpoints::CLEAR_LOGS, None).await?;
        Ok(())
    }

    /// `GET system/status`.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let reply = self.call(Method::Get, endpoints::SYSTEM_STATUS, None).await?;
        let reply: StatusReply = decode(reply, "status reply")?;
        Ok(reply.data)
    }

    /// Lifecycle transitions need an explicit `status: "success"`, not just a 2xx.
    fn require_status_body(body: Option<&Value>, what: &str) -> Result<()> {
        match body.and_then(|b| b.get("status")).and_then(Value::as_str) {
            Some(SUCCESS) => Ok(()),
            _ => Err(ClientError::Decode(format!("{what}: missing success status"))),
        }
    }
}
