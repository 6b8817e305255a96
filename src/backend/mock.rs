//! In-memory simulated backend.
//!
//! `MockBackend` implements [`Transport`] by emulating the simulator backend's
//! observable behaviour, so the client can be exercised without a kernel
//! module or HTTP server:
//!
//! - a sequence table replaced wholesale by `spi/sequences` and `spi/load-driver`
//! - a driver-loaded flag toggled by load / unload
//! - commands answered by matching against the sequence table (only while loaded)
//! - a rotating event log of [`LOG_CAPACITY`] lines that suppresses consecutive duplicates
//!
//! Tests steer it with one-shot faults ([`MockFault`]), external state changes
//! (`set_driver_loaded`), gates that hold requests in flight
//! ([`MockBackend::hold`]) and a record of the most recent requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use super::{endpoints, Method, RawReply, SequencePayload, Transport};
use crate::error::{ClientError, Result};

/// Number of lines the emulated event log keeps.
pub const LOG_CAPACITY: usize = 100;

const BACKEND_PORT: u16 = 5001;
const FRONTEND_PORT: u16 = 5173;
/// Number of requests the mock remembers; older ones are dropped first.
pub const REQUEST_HISTORY: usize = 1000;

const GATE_RELEASE_PERMITS: usize = 1 << 20;

/// A failure to inject into the next request for an endpoint.
#[derive(Debug, Clone)]
pub enum MockFault {
    /// No reply at all.
    Transport(String),
    /// Reply with an arbitrary status and optional body.
    Status(u16, Option<Value>),
    /// Reply 200 with `{status: "error", message}`.
    SoftFailure(String),
}

/// A request as received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: Method,
    /// Endpoint path
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

/// Holds requests to one endpoint until released.
#[derive(Debug, Clone)]
pub struct MockGate {
    semaphore: Arc<Semaphore>,
}

impl MockGate {
    /// Let every held and future request through.
    pub fn release(&self) {
        self.semaphore.add_permits(GATE_RELEASE_PERMITS);
    }
}

#[derive(Debug, Default)]
struct MockState {
    sequences: Vec<SequencePayload>,
    driver_loaded: bool,
    device_name: Option<String>,
    frontend_up: bool,
    config: Option<Value>,
    logs: VecDeque<String>,
    last_log: Option<String>,
    faults: HashMap<String, VecDeque<MockFault>>,
    gates: HashMap<String, Arc<Semaphore>>,
    requests: VecDeque<RecordedRequest>,
}

impl MockState {
    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.last_log.as_deref() == Some(message.as_str()) {
            return;
        }
        let stamp = chrono::Local::now().format("%H:%M:%S");
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(format!("[{stamp}] {message}"));
        self.last_log = Some(message);
    }

    fn record(&mut self, request: RecordedRequest) {
        if self.requests.len() == REQUEST_HISTORY {
            self.requests.pop_front();
        }
        self.requests.push_back(request);
    }
}

#[derive(Debug, Deserialize)]
struct LoadBody {
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    sequences: Vec<SequencePayload>,
}

/// Simulated simulator backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend with an empty table, driver unloaded and UI server up.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                frontend_up: true,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a one-shot fault for the next request to `path`.
    pub fn inject(&self, path: &str, fault: MockFault) {
        self.state()
            .faults
            .entry(path.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Hold every request to `path` until the returned gate is released.
    pub fn hold(&self, path: &str) -> MockGate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.state()
            .gates
            .insert(path.to_string(), Arc::clone(&semaphore));
        MockGate { semaphore }
    }

    /// Current sequence table.
    pub fn sequences(&self) -> Vec<SequencePayload> {
        self.state().sequences.clone()
    }

    /// Whether the emulated driver is loaded.
    pub fn driver_loaded(&self) -> bool {
        self.state().driver_loaded
    }

    /// Simulate the driver being loaded or unloaded behind the client's back.
    pub fn set_driver_loaded(&self, loaded: bool) {
        let mut state = self.state();
        state.driver_loaded = loaded;
        if !loaded {
            state.device_name = None;
        }
    }

    /// Simulate the UI server going up or down.
    pub fn set_frontend_up(&self, up: bool) {
        self.state().frontend_up = up;
    }

    /// Last config body received on `spi/config`.
    pub fn config(&self) -> Option<Value> {
        self.state().config.clone()
    }

    /// Current event log lines.
    pub fn logs(&self) -> Vec<String> {
        self.state().logs.iter().cloned().collect()
    }

    /// Replace the event log with exactly `lines`.
    pub fn set_logs<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        state.logs = lines.into_iter().map(Into::into).collect();
        state.last_log = None;
    }

    /// Append a line to the event log (timestamped, deduplicated like the backend).
    pub fn push_log(&self, message: impl Into<String>) {
        self.state().log(message);
    }

    /// The last [`REQUEST_HISTORY`] requests received, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.iter().cloned().collect()
    }

    /// Remembered requests for one endpoint.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn handle(&self, method: Method, path: &str, body: Option<Value>) -> RawReply {
        let mut state = self.state();
        match (method, path) {
            (Method::Post, endpoints::CONFIG) => {
                let name = body
                    .as_ref()
                    .and_then(|b| b.get("device_name"))
                    .and_then(Value::as_str)
                    .unwrap_or("spi_test")
                    .to_string();
                state.config = body;
                state.log(format!("[INFO] Configuration saved for device: {name}"));
                success("Configuration saved")
            }
            (Method::Post, endpoints::COMMAND) => Self::command(&mut state, body),
            (Method::Post, endpoints::SEQUENCES) => {
                let parsed =
                    body.and_then(|b| serde_json::from_value::<Vec<SequencePayload>>(b).ok());
                let Some(sequences) = parsed else {
                    return error(400, "Sequences must be a list of {received, response}");
                };
                Self::store_sequences(&mut state, sequences);
                success("Sequences updated successfully")
            }
            (Method::Post, endpoints::LOAD_DRIVER) => {
                let load: LoadBody = match body.map(serde_json::from_value::<LoadBody>).transpose() {
                    Ok(load) => load.unwrap_or(LoadBody {
                        device_name: None,
                        sequences: Vec::new(),
                    }),
                    Err(e) => return error(500, &format!("Error loading driver: {e}")),
                };
                let name = load.device_name.unwrap_or_else(|| "spi_test".to_string());
                state.log(format!(
                    "[PROCESS] Starting driver load process for device: {name}"
                ));
                if !load.sequences.is_empty() {
                    Self::store_sequences(&mut state, load.sequences);
                }
                if state.driver_loaded {
                    state.log("[PROCESS] Unloading existing driver...");
                }
                state.driver_loaded = true;
                state.log(format!(
                    "[SUCCESS] Driver loaded successfully with device name: {name}"
                ));
                state.device_name = Some(name);
                success("Driver loaded successfully")
            }
            (Method::Post, endpoints::UNLOAD_DRIVER) => {
                state.log("[PROCESS] Attempting to unload driver...");
                if state.driver_loaded {
                    state.log("[SUCCESS] Driver unloaded successfully");
                } else {
                    state.log("[INFO] Driver is not loaded");
                }
                state.driver_loaded = false;
                state.device_name = None;
                success("Driver unloaded successfully")
            }
            (Method::Get, endpoints::LOGS) => RawReply::json(
                200,
                json!({"status": "success", "logs": state.logs.iter().collect::<Vec<_>>()}),
            ),
            (Method::Post, endpoints::CLEAR_LOGS) => {
                state.logs.clear();
                state.last_log = None;
                success("Logs cleared successfully")
            }
            (Method::Get, endpoints::SYSTEM_STATUS) => RawReply::json(
                200,
                json!({
                    "status": "success",
                    "data": {
                        "backend": {"status": true, "port": BACKEND_PORT},
                        "frontend": {"status": state.frontend_up, "port": FRONTEND_PORT},
                        "driver": {
                            "status": state.driver_loaded,
                            "device": state.device_name.as_ref().map(|n| format!("/dev/{n}")),
                        }
                    }
                }),
            ),
            _ => error(404, "Not Found"),
        }
    }

    fn store_sequences(state: &mut MockState, sequences: Vec<SequencePayload>) {
        state.log(format!("Saved {} sequences", sequences.len()));
        state.sequences = sequences;
    }

    fn command(state: &mut MockState, body: Option<Value>) -> RawReply {
        if !state.driver_loaded {
            return error(400, "Driver not loaded");
        }
        let command = body
            .as_ref()
            .and_then(|b| b.get("command"))
            .and_then(Value::as_str)
            .map(normalize_hex)
            .unwrap_or_default();
        if command.is_empty() {
            return soft_error("No command provided");
        }
        state.log(format!("[SPI] Sending command bytes: {command}"));

        let matched = state
            .sequences
            .iter()
            .find(|seq| normalize_hex(&seq.received) == command)
            .map(|seq| normalize_hex(&seq.response));
        match matched {
            Some(response) => {
                state.log(format!("[SPI] Received response: {response}"));
                RawReply::json(
                    200,
                    json!({
                        "status": "success",
                        "message": "Command sent successfully",
                        "response": response,
                    }),
                )
            }
            None => {
                state.log("[SPI] Received response: []");
                soft_error("No response received within timeout period")
            }
        }
    }
}

/// Canonical form used for matching: lowercase, single-space separated.
fn normalize_hex(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn success(message: &str) -> RawReply {
    RawReply::json(200, json!({"status": "success", "message": message}))
}

fn soft_error(message: &str) -> RawReply {
    RawReply::json(200, json!({"status": "error", "message": message}))
}

fn error(status: u16, message: &str) -> RawReply {
    RawReply::json(status, json!({"status": "error", "message": message}))
}

#[async_trait]
impl Transport for MockBackend {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<RawReply> {
        let (fault, gate) = {
            let mut state = self.state();
            state.record(RecordedRequest {
                method,
                path: path.to_string(),
                body: body.clone(),
            });
            let fault = state.faults.get_mut(path).and_then(VecDeque::pop_front);
            (fault, state.gates.get(path).cloned())
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match fault {
            Some(MockFault::Transport(message)) => Err(ClientError::Transport(message)),
            Some(MockFault::Status(status, body)) => Ok(RawReply { status, body }),
            Some(MockFault::SoftFailure(message)) => Ok(soft_error(&message)),
            None => Ok(self.handle(method, path, body)),
        }
    }
}
