//! One-shot command exchanges with the loaded virtual device.
//!
//! The channel does not look at the sequence table or the driver run state.
//! Whether a command makes sense right now is the backend's decision.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::error::Result;

/// A command that got a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExchange {
    /// Unique id
    pub id: Uuid,
    /// Hex sent to the device
    pub command_hex: String,
    /// Hex the device answered with
    pub response_hex: String,
    /// When the response arrived
    pub timestamp: DateTime<Local>,
}

/// Sends commands and keeps the history of successful exchanges.
#[derive(Debug)]
pub struct CommandChannel {
    history: RwLock<Vec<CommandExchange>>,
    pending: RwLock<String>,
    backend: BackendClient,
}

impl CommandChannel {
    /// Create a channel with empty history.
    pub fn new(backend: BackendClient) -> Self {
        Self {
            history: RwLock::new(Vec::new()),
            pending: RwLock::new(String::new()),
            backend,
        }
    }

    /// Send `command` to the device at `device_path`.
    ///
    /// Returns `Ok(None)` without contacting the backend when the command is
    /// blank. History is only appended on success.
    pub async fn send(
        &self,
        command: &str,
        device_path: &str,
    ) -> Result<Option<CommandExchange>> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(None);
        }

        let response = self.backend.send_command(command, device_path).await?;
        let exchange = CommandExchange {
            id: Uuid::new_v4(),
            command_hex: command.to_string(),
            response_hex: response,
            timestamp: Local::now(),
        };
        tracing::info!(
            command = %exchange.command_hex,
            response = %exchange.response_hex,
            "Command exchange"
        );
        self.history.write().await.push(exchange.clone());
        Ok(Some(exchange))
    }

    /// Send the pending command; it is cleared only if the send succeeds.
    pub async fn send_pending(&self, device_path: &str) -> Result<Option<CommandExchange>> {
        let command = self.pending().await;
        let exchange = self.send(&command, device_path).await?;
        if exchange.is_some() {
            self.pending.write().await.clear();
        }
        Ok(exchange)
    }

    /// Set the pending command input.
    pub async fn set_pending(&self, command: impl Into<String>) {
        *self.pending.write().await = command.into();
    }

    /// Current pending command input.
    pub async fn pending(&self) -> String {
        self.pending.read().await.clone()
    }

    /// All successful exchanges, oldest first.
    pub async fn history(&self) -> Vec<CommandExchange> {
        self.history.read().await.clone()
    }
}
