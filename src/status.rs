//! Status poller: keeps the latest [`SystemStatus`] and reconciles the
//! driver run state against it.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::{BackendClient, SystemStatus};
use crate::driver::DriverController;
use crate::error::Result;

/// Holds the most recent system status snapshot.
#[derive(Debug)]
pub struct StatusPoller {
    snapshot: RwLock<Option<SystemStatus>>,
    driver: Arc<DriverController>,
    backend: BackendClient,
}

impl StatusPoller {
    /// Create a poller with no snapshot yet.
    pub fn new(backend: BackendClient, driver: Arc<DriverController>) -> Self {
        Self {
            snapshot: RwLock::new(None),
            driver,
            backend,
        }
    }

    /// Fetch the status once.
    ///
    /// On success the snapshot is replaced and a `driver.loaded == false`
    /// report stops a running controller. A failed fetch changes nothing.
    pub async fn poll_once(&self) -> Result<SystemStatus> {
        let status = self.backend.system_status().await?;
        *self.snapshot.write().await = Some(status.clone());
        self.driver.reconcile_driver_loaded(status.driver.loaded);
        tracing::trace!(
            backend = status.backend.up,
            frontend = status.frontend.up,
            driver = status.driver.loaded,
            "Refreshed system status"
        );
        Ok(status)
    }

    /// Latest snapshot, `None` until the first successful poll.
    pub async fn snapshot(&self) -> Option<SystemStatus> {
        self.snapshot.read().await.clone()
    }
}
