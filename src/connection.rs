//! Backend address configuration and URL normalization.
//!
//! This module provides types and utilities for managing the simulator backend address:
//! - [`BackendAddress`]: Validated base URL with source tracking
//! - [`AddressSource`]: Where the address configuration came from
//! - [`AddressError`]: User-friendly validation errors
//!
//! # Address Resolution Precedence
//!
//! Addresses are resolved in this order (highest priority first):
//! 1. Command line (`--backend`)
//! 2. Settings file (`backend.url`)
//! 3. `SPISIM_BACKEND_URL` environment variable
//! 4. Default: `http://localhost:5001/api/`
//!
//! # URL Normalization
//!
//! The [`normalize_url`] function handles common input formats:
//! - Bare host:port (e.g., `10.0.0.7:5001` → `http://10.0.0.7:5001/`)
//! - Missing port (e.g., `http://sim-box/api` → `http://sim-box:5001/api/`)
//! - Missing trailing slash, so relative endpoint paths join under the base path
//!
//! # Example
//!
//! ```
//! use spi_sim_client::connection::{AddressSource, BackendAddress};
//!
//! let addr = BackendAddress::parse("10.0.0.7:5001/api", AddressSource::CommandLine)?;
//! assert_eq!(addr.as_str(), "http://10.0.0.7:5001/api/");
//! assert_eq!(addr.endpoint("spi/logs")?.as_str(), "http://10.0.0.7:5001/api/spi/logs");
//! # Ok::<(), spi_sim_client::connection::AddressError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Environment variable consulted when neither CLI nor settings name a backend.
pub const BACKEND_URL_ENV: &str = "SPISIM_BACKEND_URL";

/// Default HTTP port of the simulator backend.
pub const DEFAULT_BACKEND_PORT: u16 = 5001;

/// Default backend base URL when no configuration is provided.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001/api/";

/// Source of the backend address configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    /// Hardcoded default
    Default,
    /// Loaded from `SPISIM_BACKEND_URL`
    Environment,
    /// Read from the settings file
    Settings,
    /// Passed on the command line
    CommandLine,
}

impl AddressSource {
    /// Returns the priority for address resolution (higher = preferred).
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Environment => 1,
            Self::Settings => 2,
            Self::CommandLine => 3,
        }
    }

    /// Returns a short label for log output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Environment => "env",
            Self::Settings => "settings",
            Self::CommandLine => "cli",
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Environment => write!(f, "Environment ({BACKEND_URL_ENV})"),
            Self::Settings => write!(f, "Settings file"),
            Self::CommandLine => write!(f, "Command line"),
        }
    }
}

/// Validated backend base URL with metadata.
///
/// The URL always carries a scheme, a port and a trailing slash, so endpoint
/// paths can be joined onto it with [`BackendAddress::endpoint`].
#[derive(Debug, Clone)]
pub struct BackendAddress {
    url: Url,
    source: AddressSource,
}

impl BackendAddress {
    /// Parse and normalize a backend base URL.
    pub fn parse(input: &str, source: AddressSource) -> Result<Self, AddressError> {
        let url = normalize_url(input)?;
        Ok(Self { url, source })
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns where this address came from.
    #[must_use]
    pub fn source(&self) -> AddressSource {
        self.source
    }

    /// Resolve an endpoint path (e.g. `spi/logs`) against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, AddressError> {
        self.url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AddressError::InvalidUrl(e.to_string()))
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl Default for BackendAddress {
    fn default() -> Self {
        Self {
            url: default_url(),
            source: AddressSource::Default,
        }
    }
}

fn default_url() -> Url {
    // Literal is covered by `test_backend_address_default`.
    #[allow(clippy::expect_used)]
    Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid")
}

/// URL validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// Port could not be set
    InvalidPort(String),
    /// Unsupported URL scheme (only http/https allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for AddressError {}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Address cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::InvalidPort(e) => write!(f, "Invalid port: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use http or https)"),
        }
    }
}

/// Normalize a backend base URL string.
///
/// - Adds `http://` scheme if missing
/// - Adds default port (5001) if missing
/// - Ensures the path ends with `/`
/// - Trims whitespace
///
/// # Examples
///
/// ```
/// use spi_sim_client::connection::normalize_url;
///
/// let url = normalize_url("192.168.1.100:5001")?;
/// assert_eq!(url.as_str(), "http://192.168.1.100:5001/");
///
/// let url = normalize_url("https://sim.example.com/api")?;
/// assert_eq!(url.as_str(), "https://sim.example.com:5001/api/");
/// # Ok::<(), spi_sim_client::connection::AddressError>(())
/// ```
pub fn normalize_url(input: &str) -> Result<Url, AddressError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(AddressError::EmptyInput);
    }

    // Add scheme if missing
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| AddressError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AddressError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(AddressError::MissingHost);
    }

    if url.port().is_none() {
        url.set_port(Some(DEFAULT_BACKEND_PORT))
            .map_err(|()| AddressError::InvalidPort("Cannot set port on this URL".to_string()))?;
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Resolve the backend address from multiple sources with precedence.
///
/// Invalid candidates are skipped with a warning; the function never fails and
/// falls back to [`DEFAULT_BACKEND_URL`].
pub fn resolve_address(cli: Option<&str>, settings: Option<&str>) -> BackendAddress {
    let mut candidates: Vec<(String, AddressSource)> = [
        (std::env::var(BACKEND_URL_ENV).ok(), AddressSource::Environment),
        (settings.map(str::to_string), AddressSource::Settings),
        (cli.map(str::to_string), AddressSource::CommandLine),
    ]
    .into_iter()
    .filter_map(|(input, source)| input.map(|i| (i, source)))
    .filter(|(input, _)| !input.trim().is_empty())
    .collect();
    candidates.sort_by_key(|(_, source)| std::cmp::Reverse(source.priority()));

    for (input, source) in candidates {
        match BackendAddress::parse(&input, source) {
            Ok(addr) => return addr,
            Err(e) => {
                tracing::warn!(source = source.label(), input = %input, error = %e, "Ignoring invalid backend address");
            }
        }
    }

    BackendAddress::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normalize_bare_host_port() {
        let url = normalize_url("127.0.0.1:5001").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:5001/");
    }

    #[test]
    fn test_normalize_adds_default_port_and_slash() {
        let url = normalize_url("http://localhost/api").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/");
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        let url = normalize_url("https://sim.example.com:8443/api/").unwrap();
        assert_eq!(url.as_str(), "https://sim.example.com:8443/api/");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        let url = normalize_url("  localhost:5000  ").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/");
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_url("   ").unwrap_err(), AddressError::EmptyInput);
    }

    #[test]
    fn test_normalize_unsupported_scheme() {
        let err = normalize_url("ftp://example.com").unwrap_err();
        assert!(matches!(err, AddressError::UnsupportedScheme(_)));
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let addr = BackendAddress::parse("localhost:5001/api", AddressSource::Settings).unwrap();
        assert_eq!(
            addr.endpoint("spi/load-driver").unwrap().as_str(),
            "http://localhost:5001/api/spi/load-driver"
        );
        assert_eq!(
            addr.endpoint("/system/status").unwrap().as_str(),
            "http://localhost:5001/api/system/status"
        );
    }

    #[test]
    fn test_backend_address_default() {
        let addr = BackendAddress::default();
        assert_eq!(addr.as_str(), DEFAULT_BACKEND_URL);
        assert_eq!(addr.source(), AddressSource::Default);
    }

    #[test]
    fn test_address_source_priority() {
        assert!(AddressSource::CommandLine.priority() > AddressSource::Settings.priority());
        assert!(AddressSource::Settings.priority() > AddressSource::Environment.priority());
        assert!(AddressSource::Environment.priority() > AddressSource::Default.priority());
    }

    #[test]
    #[serial]
    fn test_resolve_address_default() {
        std::env::remove_var(BACKEND_URL_ENV);
        let addr = resolve_address(None, None);
        assert_eq!(addr.source(), AddressSource::Default);
    }

    #[test]
    #[serial]
    fn test_resolve_address_env() {
        std::env::set_var(BACKEND_URL_ENV, "http://bench.local:9999/api");
        let addr = resolve_address(None, None);
        assert_eq!(addr.as_str(), "http://bench.local:9999/api/");
        assert_eq!(addr.source(), AddressSource::Environment);
        std::env::remove_var(BACKEND_URL_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_address_cli_beats_settings_and_env() {
        std::env::set_var(BACKEND_URL_ENV, "http://env.local:8888");
        let addr = resolve_address(Some("cli.local:7777"), Some("settings.local:6666"));
        assert_eq!(addr.as_str(), "http://cli.local:7777/");
        assert_eq!(addr.source(), AddressSource::CommandLine);
        std::env::remove_var(BACKEND_URL_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_address_settings_beats_env() {
        std::env::set_var(BACKEND_URL_ENV, "http://env.local:8888");
        let addr = resolve_address(None, Some("settings.local:6666"));
        std::env::remove_var(BACKEND_URL_ENV);
        assert_eq!(addr.source(), AddressSource::Settings);
    }

    #[test]
    #[serial]
    fn test_resolve_address_skips_invalid_candidates() {
        std::env::remove_var(BACKEND_URL_ENV);
        let addr = resolve_address(Some("ftp://nope"), Some("settings.local:6666"));
        assert_eq!(addr.source(), AddressSource::Settings);
    }
}
