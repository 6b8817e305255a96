//! Session context.
//!
//! A [`Session`] owns one instance of every client component and the
//! background pollers that feed them. Each component mutates only its own
//! state; the status poller's reconciliation of the driver run state is the
//! one cross-component edge.
//!
//! ```text
//!            ┌──────────── Session ─────────────┐
//!            │ ConfigModel     SequenceStore    │
//!            │ CommandChannel  LogTailer ◄─ 1 s │
//!            │ DriverController ◄─ StatusPoller │◄─ 2 s
//!            └───────────────┬──────────────────┘
//!                    BackendClient
//!                            │ Transport (HTTP or mock)
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::http::{HttpConfig, HttpTransport};
use crate::backend::{BackendClient, Transport};
use crate::command::{CommandChannel, CommandExchange};
use crate::connection::resolve_address;
use crate::device::ConfigModel;
use crate::driver::{DriverController, DriverRunState};
use crate::error::Result;
use crate::logs::LogTailer;
use crate::poller::{spawn_poller, FirstTick, PollerHandle};
use crate::sequence::{to_payload, SequenceStore};
use crate::settings::ClientSettings;
use crate::status::StatusPoller;

/// All client state for one operator session against one backend.
#[derive(Debug)]
pub struct Session {
    settings: ClientSettings,
    config: Arc<ConfigModel>,
    sequences: Arc<SequenceStore>,
    commands: Arc<CommandChannel>,
    logs: Arc<LogTailer>,
    driver: Arc<DriverController>,
    status: Arc<StatusPoller>,
    pollers: Mutex<Vec<PollerHandle>>,
}

impl Session {
    /// Build a session over an arbitrary transport.
    pub fn new(settings: ClientSettings, transport: Arc<dyn Transport>) -> Self {
        let backend = BackendClient::new(transport);
        let driver = Arc::new(DriverController::new(backend.clone()));
        Self {
            config: Arc::new(ConfigModel::new(backend.clone(), &settings.device)),
            sequences: Arc::new(SequenceStore::new(backend.clone())),
            commands: Arc::new(CommandChannel::new(backend.clone())),
            logs: Arc::new(LogTailer::new(
                backend.clone(),
                settings.polling.max_log_entries,
            )),
            status: Arc::new(StatusPoller::new(backend, Arc::clone(&driver))),
            driver,
            settings,
            pollers: Mutex::new(Vec::new()),
        }
    }

    /// Build a session talking HTTP to the backend.
    ///
    /// `cli_backend` takes precedence over the settings file and the
    /// environment.
    pub fn connect(settings: ClientSettings, cli_backend: Option<&str>) -> Result<Self> {
        let address = resolve_address(cli_backend, settings.backend.url.as_deref());
        let http = HttpConfig::with_request_timeout_ms(settings.backend.request_timeout_ms);
        let transport = HttpTransport::with_config(address, http)?;
        Ok(Self::new(settings, Arc::new(transport)))
    }

    /// Settings the session was built with.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Device configuration model.
    #[must_use]
    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    /// Sequence store.
    #[must_use]
    pub fn sequences(&self) -> &SequenceStore {
        &self.sequences
    }

    /// Command channel.
    #[must_use]
    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    /// Log tailer.
    #[must_use]
    pub fn logs(&self) -> &LogTailer {
        &self.logs
    }

    /// Driver lifecycle controller.
    #[must_use]
    pub fn driver(&self) -> &DriverController {
        &self.driver
    }

    /// Status poller.
    #[must_use]
    pub fn status(&self) -> &StatusPoller {
        &self.status
    }

    /// Start the log and status pollers. The status poller fires immediately.
    ///
    /// Does nothing if they are already running.
    pub async fn start_pollers(&self) {
        let mut pollers = self.pollers.lock().await;
        if !pollers.is_empty() {
            return;
        }

        let status = Arc::clone(&self.status);
        pollers.push(spawn_poller(
            "status",
            self.settings.polling.status_interval(),
            FirstTick::Immediate,
            move || {
                let status = Arc::clone(&status);
                async move {
                    if let Err(e) = status.poll_once().await {
                        tracing::warn!(error = %e, "Status poll failed");
                    }
                }
            },
        ));

        let logs = Arc::clone(&self.logs);
        pollers.push(spawn_poller(
            "logs",
            self.settings.polling.log_interval(),
            FirstTick::AfterPeriod,
            move || {
                let logs = Arc::clone(&logs);
                async move {
                    if let Err(e) = logs.poll_once().await {
                        tracing::warn!(error = %e, "Log poll failed");
                    }
                }
            },
        ));
        tracing::info!("Session pollers started");
    }

    /// Stop all pollers and wait for them to exit.
    pub async fn shutdown(&self) {
        let pollers: Vec<_> = self.pollers.lock().await.drain(..).collect();
        for poller in pollers {
            poller.stop().await;
        }
        tracing::info!("Session shut down");
    }

    /// Load the driver with the current config and sequence table.
    pub async fn start_driver(&self) -> Result<Option<String>> {
        let config = self.config.current().await?;
        let sequences = to_payload(&self.sequences.entries().await);
        self.driver.start(&config, sequences).await
    }

    /// Unload the driver. The run state is `Stopped` afterwards.
    pub async fn stop_driver(&self) -> Result<Option<String>> {
        self.driver.stop().await
    }

    /// Current driver run state.
    #[must_use]
    pub fn run_state(&self) -> DriverRunState {
        self.driver.state()
    }

    /// Send the device config to the backend.
    ///
    /// Failures are logged by the config model and otherwise ignored.
    pub async fn save_config(&self) {
        let _ = self.config.save().await;
    }

    /// Send one command to the configured device path.
    pub async fn send_command(&self, command: &str) -> Result<Option<CommandExchange>> {
        let device_path = self.config.form().await.device_path;
        self.commands.send(command, device_path.trim()).await
    }

    /// Send the command channel's pending input to the configured device path.
    pub async fn send_pending_command(&self) -> Result<Option<CommandExchange>> {
        let device_path = self.config.form().await.device_path;
        self.commands.send_pending(device_path.trim()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::endpoints;
    use crate::backend::mock::{MockBackend, MockFault};

    fn fixture() -> (Arc<MockBackend>, Session) {
        let mock = Arc::new(MockBackend::new());
        let session = Session::new(ClientSettings::default(), mock.clone());
        (mock, session)
    }

    #[tokio::test]
    async fn start_driver_bundles_current_state() {
        let (mock, session) = fixture();
        session.sequences().add("AA", "BB").await.unwrap();
        session.start_driver().await.unwrap();

        assert_eq!(session.run_state(), DriverRunState::Running);
        assert_eq!(mock.sequences().len(), 1);
        let exchange = session.send_command("AA").await.unwrap().unwrap();
        assert_eq!(exchange.response_hex, "bb");
    }

    #[tokio::test]
    async fn save_config_swallows_failures() {
        let (mock, session) = fixture();
        mock.inject(endpoints::CONFIG, MockFault::Transport("refused".into()));
        session.save_config().await;
        assert_eq!(session.run_state(), DriverRunState::Stopped);
        assert_eq!(mock.requests_to(endpoints::CONFIG).len(), 1);

        session.save_config().await;
        assert!(mock.config().is_some());
    }
}
