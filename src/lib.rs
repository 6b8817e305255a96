//! # SPI Simulator Client Library
//!
//! Client-side orchestration for a remotely hosted virtual SPI device
//! simulator. The backend owns the kernel driver, the sequence table the
//! virtual device answers from, and an event log; this crate keeps the
//! operator's view of all of that consistent with the backend.
//!
//! ## Crate Structure
//!
//! - **`backend`**: The `Transport` seam, the typed `BackendClient` for every endpoint,
//!   reply interpretation (HTTP status, soft failures), a reqwest transport and an
//!   in-memory `MockBackend`.
//! - **`connection`**: Backend base-URL parsing and source precedence.
//! - **`settings`**: Figment-loaded `ClientSettings` (TOML file + `SPISIM_` environment).
//! - **`logging`**: tracing-subscriber initialisation.
//! - **`error`**: The `ClientError` taxonomy shared by every component.
//! - **`device`**: The editable device configuration and its save path.
//! - **`sequence`**: The write-through sequence store.
//! - **`command`**: One-shot command exchanges with the virtual device.
//! - **`logs`**: The bounded, snapshot-replaced log view.
//! - **`driver`**: Driver load/unload and the `DriverRunState` machine.
//! - **`status`**: System status snapshots and run-state reconciliation.
//! - **`poller`**: Fixed-interval background tasks.
//! - **`inflight`**: Single-slot guards that reject overlapping mutations.
//! - **`persist`**: Date-stamped JSON import/export files.
//! - **`session`**: The `Session` context that wires it all together.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spi_sim_client::backend::mock::MockBackend;
//! use spi_sim_client::session::Session;
//! use spi_sim_client::settings::ClientSettings;
//!
//! # async fn demo() -> spi_sim_client::error::Result<()> {
//! let session = Session::new(ClientSettings::default(), Arc::new(MockBackend::new()));
//! session.sequences().add("9F", "EF 40 18").await?;
//! session.start_driver().await?;
//! let exchange = session.send_command("9F").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod command;
pub mod connection;
pub mod device;
pub mod driver;
pub mod error;
pub mod inflight;
pub mod logging;
pub mod logs;
pub mod persist;
pub mod poller;
pub mod sequence;
pub mod session;
pub mod settings;
pub mod status;
