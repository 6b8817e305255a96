//! Driver lifecycle controller.
//!
//! ```text
//! Stopped --start (success body)--> Running
//! Running --stop (any outcome)----> Stopped
//! Running --status: not loaded----> Stopped
//! ```
//!
//! `start` only advances on an explicit success body. `stop` lands in
//! `Stopped` whatever the backend says. Nothing but a confirmed `start` moves
//! the controller into `Running`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::backend::{BackendClient, LoadDriverRequest, SequencePayload};
use crate::device::DeviceConfig;
use crate::error::Result;
use crate::inflight::{OperationClass, OperationSlot};

/// The client's belief about the virtual driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverRunState {
    /// Not loaded (or unknown)
    #[default]
    Stopped,
    /// Loaded by a confirmed start
    Running,
}

impl fmt::Display for DriverRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Running => f.write_str("running"),
        }
    }
}

/// Loads and unloads the virtual driver and owns [`DriverRunState`].
#[derive(Debug)]
pub struct DriverController {
    state: watch::Sender<DriverRunState>,
    slot: OperationSlot,
    backend: BackendClient,
}

impl DriverController {
    /// Create a controller in the `Stopped` state.
    pub fn new(backend: BackendClient) -> Self {
        let (state, _) = watch::channel(DriverRunState::Stopped);
        Self {
            state,
            slot: OperationSlot::new(OperationClass::Lifecycle),
            backend,
        }
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> DriverRunState {
        *self.state.borrow()
    }

    /// Receive every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DriverRunState> {
        self.state.subscribe()
    }

    /// Load the driver for `config` with the given sequence table.
    ///
    /// The state becomes `Running` only when the backend answers with a
    /// success body. Any failure leaves the state unchanged. Returns the
    /// backend's message, if it sent one.
    pub async fn start(
        &self,
        config: &DeviceConfig,
        sequences: Vec<SequencePayload>,
    ) -> Result<Option<String>> {
        config.validate()?;
        let _permit = self.slot.try_acquire()?;

        let request = LoadDriverRequest {
            device_name: config.device_name()?,
            sequences,
        };
        tracing::info!(
            device = %request.device_name,
            sequences = request.sequences.len(),
            "Loading driver"
        );

        match self.backend.load_driver(&request).await {
            Ok(message) => {
                self.transition(DriverRunState::Running);
                Ok(message)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Driver load failed");
                Err(e)
            }
        }
    }

    /// Unload the driver. The state is `Stopped` afterwards on every outcome
    /// in which a request was made.
    pub async fn stop(&self) -> Result<Option<String>> {
        let _permit = self.slot.try_acquire()?;

        tracing::info!("Unloading driver");
        let result = self.backend.unload_driver().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Driver unload failed, assuming stopped");
        }
        self.transition(DriverRunState::Stopped);
        result
    }

    /// Apply an observed `driver.loaded` flag.
    ///
    /// Only ever moves `Running` to `Stopped`. Returns `true` if it did.
    pub fn reconcile_driver_loaded(&self, loaded: bool) -> bool {
        if loaded || self.state() != DriverRunState::Running {
            return false;
        }
        tracing::warn!("Backend reports driver not loaded, marking stopped");
        self.transition(DriverRunState::Stopped)
    }

    fn transition(&self, next: DriverRunState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::info!(from = %current, to = %next, "Driver state changed");
            *current = next;
            true
        })
    }
}
