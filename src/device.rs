//! Device configuration model.
//!
//! [`DeviceConfig`] holds the addressing and electrical parameters of the
//! virtual SPI device. [`ConfigModel`] is the editable form around it: edits
//! are stored as raw text so a half-typed number never fails, and the typed
//! config is only produced (and validated) when it is needed for a request.
//!
//! The backend keys the virtual device by a name derived from the device path
//! (`/dev/spidev0.0` → `spidev0.0`). The same [`derive_device_name`] is used for
//! saving the config and for starting the driver.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::BackendClient;
use crate::error::{ClientError, Result};

/// Prefix every device path must start with.
pub const DEVICE_PATH_PREFIX: &str = "/dev/";

/// Highest valid SPI mode (CPOL/CPHA combinations 0..=3).
pub const MAX_SPI_MODE: u8 = 3;

/// Addressing and electrical parameters of the virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device node, e.g. `/dev/spidev0.0`
    pub device_path: String,
    /// SPI bus number
    #[serde(rename = "bus_num")]
    pub bus_number: u32,
    /// Chip-select line
    #[serde(rename = "cs_num")]
    pub chip_select: u32,
    /// Clock speed in Hz
    #[serde(rename = "speed")]
    pub clock_speed_hz: u32,
    /// SPI mode, 0..=3
    #[serde(rename = "mode")]
    pub spi_mode: u8,
    /// Word size in bits
    pub bits_per_word: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/spi_test".to_string(),
            bus_number: 0,
            chip_select: 0,
            clock_speed_hz: 1_000_000,
            spi_mode: 0,
            bits_per_word: 8,
        }
    }
}

impl DeviceConfig {
    /// Check the invariants the backend relies on.
    pub fn validate(&self) -> Result<()> {
        derive_device_name(&self.device_path)?;
        if self.clock_speed_hz == 0 {
            return Err(ClientError::Validation(
                "clock speed must be greater than 0".into(),
            ));
        }
        if self.spi_mode > MAX_SPI_MODE {
            return Err(ClientError::Validation(format!(
                "SPI mode must be 0-{MAX_SPI_MODE}, got {}",
                self.spi_mode
            )));
        }
        if self.bits_per_word == 0 {
            return Err(ClientError::Validation(
                "bits per word must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Name the backend keys this device by.
    pub fn device_name(&self) -> Result<String> {
        derive_device_name(&self.device_path)
    }
}

/// Strip [`DEVICE_PATH_PREFIX`] from a device path.
///
/// ```
/// use spi_sim_client::device::derive_device_name;
///
/// assert_eq!(derive_device_name("/dev/spidev1.0")?, "spidev1.0");
/// assert!(derive_device_name("spidev1.0").is_err());
/// # Ok::<(), spi_sim_client::error::ClientError>(())
/// ```
pub fn derive_device_name(device_path: &str) -> Result<String> {
    match device_path.strip_prefix(DEVICE_PATH_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        Some(_) => Err(ClientError::Validation(format!(
            "device path '{device_path}' has no device name after '{DEVICE_PATH_PREFIX}'"
        ))),
        None => Err(ClientError::Validation(format!(
            "device path '{device_path}' must start with '{DEVICE_PATH_PREFIX}'"
        ))),
    }
}

/// Editable fields of [`DeviceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    /// `device_path`
    DevicePath,
    /// `bus_num`
    BusNumber,
    /// `cs_num`
    ChipSelect,
    /// `speed`
    ClockSpeed,
    /// `mode`
    SpiMode,
    /// `bits_per_word`
    BitsPerWord,
}

impl ConfigField {
    /// All fields, in form order.
    pub const ALL: [ConfigField; 6] = [
        Self::DevicePath,
        Self::BusNumber,
        Self::ChipSelect,
        Self::ClockSpeed,
        Self::SpiMode,
        Self::BitsPerWord,
    ];

    /// Wire/file key of the field.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::DevicePath => "device_path",
            Self::BusNumber => "bus_num",
            Self::ChipSelect => "cs_num",
            Self::ClockSpeed => "speed",
            Self::SpiMode => "mode",
            Self::BitsPerWord => "bits_per_word",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ConfigField {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| ClientError::Validation(format!("unknown config field '{s}'")))
    }
}

/// Raw form text for every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigForm {
    /// `device_path` text
    pub device_path: String,
    /// `bus_num` text
    pub bus_number: String,
    /// `cs_num` text
    pub chip_select: String,
    /// `speed` text
    pub clock_speed_hz: String,
    /// `mode` text
    pub spi_mode: String,
    /// `bits_per_word` text
    pub bits_per_word: String,
}

impl From<&DeviceConfig> for ConfigForm {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            device_path: config.device_path.clone(),
            bus_number: config.bus_number.to_string(),
            chip_select: config.chip_select.to_string(),
            clock_speed_hz: config.clock_speed_hz.to_string(),
            spi_mode: config.spi_mode.to_string(),
            bits_per_word: config.bits_per_word.to_string(),
        }
    }
}

impl ConfigForm {
    fn slot_mut(&mut self, field: ConfigField) -> &mut String {
        match field {
            ConfigField::DevicePath => &mut self.device_path,
            ConfigField::BusNumber => &mut self.bus_number,
            ConfigField::ChipSelect => &mut self.chip_select,
            ConfigField::ClockSpeed => &mut self.clock_speed_hz,
            ConfigField::SpiMode => &mut self.spi_mode,
            ConfigField::BitsPerWord => &mut self.bits_per_word,
        }
    }

    /// Parse and validate the form into a [`DeviceConfig`].
    pub fn parse(&self) -> Result<DeviceConfig> {
        let config = DeviceConfig {
            device_path: self.device_path.trim().to_string(),
            bus_number: parse_number(ConfigField::BusNumber, &self.bus_number)?,
            chip_select: parse_number(ConfigField::ChipSelect, &self.chip_select)?,
            clock_speed_hz: parse_number(ConfigField::ClockSpeed, &self.clock_speed_hz)?,
            spi_mode: parse_number(ConfigField::SpiMode, &self.spi_mode)?,
            bits_per_word: parse_number(ConfigField::BitsPerWord, &self.bits_per_word)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: FromStr>(field: ConfigField, text: &str) -> Result<T> {
    text.trim().parse().map_err(|_| {
        ClientError::Validation(format!(
            "{field} must be a non-negative integer, got '{text}'"
        ))
    })
}

/// The operator's editable device configuration.
#[derive(Debug)]
pub struct ConfigModel {
    form: RwLock<ConfigForm>,
    backend: BackendClient,
}

impl ConfigModel {
    /// Create a model seeded with `initial`.
    pub fn new(backend: BackendClient, initial: &DeviceConfig) -> Self {
        Self {
            form: RwLock::new(ConfigForm::from(initial)),
            backend,
        }
    }

    /// Set one field's raw text. Never fails.
    pub async fn update(&self, field: ConfigField, value: impl Into<String>) {
        *self.form.write().await.slot_mut(field) = value.into();
    }

    /// Current raw form contents.
    pub async fn form(&self) -> ConfigForm {
        self.form.read().await.clone()
    }

    /// Current config, parsed and validated.
    pub async fn current(&self) -> Result<DeviceConfig> {
        self.form.read().await.parse()
    }

    /// Replace the whole form with `config`.
    pub async fn replace(&self, config: &DeviceConfig) {
        *self.form.write().await = ConfigForm::from(config);
    }

    /// Send the full config and its derived device name to the backend.
    ///
    /// Validation failures are returned without sending anything. Transport
    /// and backend failures are logged and returned; they never touch the
    /// driver run state.
    pub async fn save(&self) -> Result<()> {
        let config = self.current().await?;
        let device_name = config.device_name()?;
        match self.backend.save_config(&device_name, &config).await {
            Ok(()) => {
                tracing::info!(device = %device_name, "Saved device configuration");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %device_name, error = %e, "Failed to save device configuration");
                Err(e)
            }
        }
    }

    /// Serialize the current (validated) config as pretty JSON.
    pub async fn export_json(&self) -> Result<String> {
        let config = self.current().await?;
        Ok(serde_json::to_string_pretty(&config)?)
    }

    /// Replace the form from JSON text holding a single config object.
    ///
    /// Anything but an object of the [`DeviceConfig`] shape is rejected and
    /// leaves the form untouched.
    pub async fn import_json(&self, text: &str) -> Result<DeviceConfig> {
        let config = parse_config_json(text)?;
        self.replace(&config).await;
        tracing::info!(device_path = %config.device_path, "Imported device configuration");
        Ok(config)
    }
}

/// Parse a config file's text.
pub fn parse_config_json(text: &str) -> Result<DeviceConfig> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ClientError::ImportFormat(format!("not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ClientError::ImportFormat(
            "expected a JSON object holding a device configuration".into(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| ClientError::ImportFormat(format!("not a device configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockFault};
    use crate::backend::{endpoints, Method};
    use std::sync::Arc;

    fn fixture() -> (Arc<MockBackend>, ConfigModel) {
        let mock = Arc::new(MockBackend::new());
        let backend = BackendClient::new(mock.clone());
        (mock, ConfigModel::new(backend, &DeviceConfig::default()))
    }

    #[test]
    fn device_name_is_path_without_prefix() {
        assert_eq!(derive_device_name("/dev/spidevB.C").unwrap(), "spidevB.C");
        assert!(derive_device_name("/dev/").is_err());
        assert!(derive_device_name("/tmp/spidev0.0").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = DeviceConfig::default();
        assert!(config.validate().is_ok());

        config.spi_mode = 4;
        assert!(config.validate().is_err());
        config.spi_mode = 3;
        config.clock_speed_hz = 0;
        assert!(config.validate().is_err());
        config.clock_speed_hz = 500_000;
        config.bits_per_word = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn field_names_round_trip() {
        for field in ConfigField::ALL {
            assert_eq!(field.key().parse::<ConfigField>().unwrap(), field);
        }
        assert!("baud".parse::<ConfigField>().is_err());
    }

    #[tokio::test]
    async fn update_accepts_transiently_invalid_text() {
        let (_mock, model) = fixture();
        model.update(ConfigField::ClockSpeed, "12a").await;
        assert_eq!(model.form().await.clock_speed_hz, "12a");
        assert!(matches!(
            model.current().await,
            Err(ClientError::Validation(_))
        ));

        model.update(ConfigField::ClockSpeed, " 2000000 ").await;
        assert_eq!(model.current().await.unwrap().clock_speed_hz, 2_000_000);
    }

    #[tokio::test]
    async fn save_sends_config_with_derived_name() {
        let (mock, model) = fixture();
        model.update(ConfigField::DevicePath, "/dev/spidev1.2").await;
        model.save().await.unwrap();

        let requests = mock.requests_to(endpoints::CONFIG);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["device_name"], "spidev1.2");
        assert_eq!(body["device_path"], "/dev/spidev1.2");
        assert_eq!(body["bits_per_word"], 8);
    }

    #[tokio::test]
    async fn save_with_invalid_path_sends_nothing() {
        let (mock, model) = fixture();
        model.update(ConfigField::DevicePath, "spidev0.0").await;
        assert!(matches!(model.save().await, Err(ClientError::Validation(_))));
        assert!(mock.requests_to(endpoints::CONFIG).is_empty());
    }

    #[tokio::test]
    async fn save_failure_is_reported() {
        let (mock, model) = fixture();
        mock.inject(endpoints::CONFIG, MockFault::Transport("connection refused".into()));
        assert!(matches!(model.save().await, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn import_requires_an_object() {
        let (_mock, model) = fixture();
        let before = model.form().await;

        assert!(matches!(
            model.import_json("[1, 2]").await,
            Err(ClientError::ImportFormat(_))
        ));
        assert!(matches!(
            model.import_json("{\"device_path\": \"/dev/x\"}").await,
            Err(ClientError::ImportFormat(_))
        ));
        assert_eq!(model.form().await, before);

        let text = r#"{"device_path": "/dev/spidev2.0", "bus_num": 2, "cs_num": 0,
                       "speed": 500000, "mode": 1, "bits_per_word": 16}"#;
        let config = model.import_json(text).await.unwrap();
        assert_eq!(config.spi_mode, 1);
        assert_eq!(model.current().await.unwrap(), config);
    }

    #[tokio::test]
    async fn export_then_import_preserves_config() {
        let (_mock, model) = fixture();
        model.update(ConfigField::BusNumber, "3").await;
        let text = model.export_json().await.unwrap();

        let (_mock2, other) = fixture();
        other.import_json(&text).await.unwrap();
        assert_eq!(other.current().await.unwrap(), model.current().await.unwrap());
    }
}
