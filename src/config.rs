//! Configuration management for the AlphaESS bridge
//!
//! This module handles loading, validation, and management of the instance
//! configuration from YAML files. The configuration is read once at startup
//! and is immutable for the lifetime of a driver instance.

use crate::error::{BridgeError, Result};
use crate::normalize::TodayFormula;
use crate::stats::Granularity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Environment variable pointing at an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "ALPHAESS_BRIDGE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Device the instance is bound to
    pub device: DeviceConfig,

    /// Vendor API selection and endpoint options
    pub api: ApiConfig,

    /// Credential seed and renewal behaviour
    pub credentials: CredentialsConfig,

    /// Automatic polling or manual command-driven operation
    pub mode: OperatingMode,

    /// Interval between realtime ticks in seconds
    pub poll_interval_seconds: u64,

    /// Refresh cadences of the auxiliary statistics caches
    pub statistics: StatisticsConfig,

    /// IANA timezone used to determine "today"
    pub timezone: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Emit every document as a JSON line on stdout
    pub stdout_sink: bool,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// System serial number as shown in the AlphaESS portal
    pub serial: String,
}

/// Vendor API generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApiGeneration {
    /// Session-token bearer auth against the original monitoring API
    Legacy,
    /// Cloud portal with signed login using a discovered signing key
    Portal,
    /// Open API with app-id/secret request signatures
    OpenApi,
}

impl ApiGeneration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Portal => "portal",
            Self::OpenApi => "open_api",
        }
    }

    /// Whether this generation authenticates with username/password
    pub fn uses_account_login(&self) -> bool {
        matches!(self, Self::Legacy | Self::Portal)
    }
}

/// Vendor API options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ApiConfig {
    /// API generation to talk to
    pub generation: ApiGeneration,

    /// Override of the generation's base URL (trailing slash expected)
    pub base_url: Option<String>,

    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,

    /// Opt into the backup realtime endpoint after primary failures
    pub backup_realtime: bool,

    /// Override the today-consumption formula of the generation
    pub today_formula: Option<TodayFormula>,

    /// Signing-key bootstrap for the portal generation
    pub signing: SigningConfig,
}

/// Inputs of the signing-key discovery step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SigningConfig {
    /// Web asset that embeds the signing key
    pub asset_url: String,

    /// Regular expression whose first capture group is the key
    pub key_pattern: String,
}

/// Credential seed and renewal behaviour
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Portal account name (legacy, portal)
    pub username: String,

    /// Portal password (legacy, portal)
    #[serde(skip_serializing)]
    pub password: String,

    /// Open API application id
    pub app_id: String,

    /// Open API application secret
    #[serde(skip_serializing)]
    pub app_secret: String,

    /// Renew this many seconds before the vendor-reported expiry
    pub safety_margin_seconds: u64,

    /// Vendor codes signalling that the refresh key has expired
    pub refresh_expired_codes: Vec<i64>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("safety_margin_seconds", &self.safety_margin_seconds)
            .field("refresh_expired_codes", &self.refresh_expired_codes)
            .finish()
    }
}

/// Operating mode of the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Poll on a fixed interval and emit documents
    Automatic,
    /// Only answer ad-hoc queries
    Manual,
}

/// Upper bound for statistics cadences (one year)
const MAX_CADENCE_MINUTES: u64 = 60 * 24 * 366;

/// Statistics refresh cadences in minutes; `null` disables the granularity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StatisticsConfig {
    pub hourly_minutes: Option<u64>,
    pub daily_minutes: Option<u64>,
    pub monthly_minutes: Option<u64>,
    pub yearly_minutes: Option<u64>,
}

impl StatisticsConfig {
    /// Enabled granularities with their refresh cadence
    pub fn cadences(&self) -> Vec<(Granularity, chrono::Duration)> {
        [
            (Granularity::Hourly, self.hourly_minutes),
            (Granularity::Daily, self.daily_minutes),
            (Granularity::Monthly, self.monthly_minutes),
            (Granularity::Yearly, self.yearly_minutes),
        ]
        .into_iter()
        .filter_map(|(g, minutes)| {
            minutes.map(|m| (g, chrono::Duration::minutes(m.min(MAX_CADENCE_MINUTES) as i64)))
        })
        .collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WebConfig {
    /// Serve the admin/query surface
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the environment override or default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(path);
        }

        let default_paths = [
            "alphaess_bridge.yaml",
            "/data/alphaess_bridge.yaml",
            "/etc/alphaess-bridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Poll interval as a std duration
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    /// Parsed timezone; falls back to UTC when the name is unknown
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Today-consumption formula, honouring the override
    pub fn today_formula(&self) -> TodayFormula {
        self.api
            .today_formula
            .unwrap_or_else(|| TodayFormula::default_for(self.api.generation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mode == OperatingMode::Automatic && self.device.serial.trim().is_empty() {
            return Err(BridgeError::config(
                "device.serial is required in automatic mode",
            ));
        }

        self.validate_credentials()?;

        if self.poll_interval_seconds == 0 {
            return Err(BridgeError::validation(
                "poll_interval_seconds",
                "Must be greater than 0",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(BridgeError::validation(
                "timezone",
                "Unknown IANA timezone name",
            ));
        }

        if self.api.backup_realtime && self.api.generation == ApiGeneration::OpenApi {
            return Err(BridgeError::validation(
                "api.backup_realtime",
                "The open_api generation has no backup realtime endpoint",
            ));
        }

        if self.api.generation == ApiGeneration::Portal
            && (self.api.signing.asset_url.trim().is_empty()
                || self.api.signing.key_pattern.trim().is_empty())
        {
            return Err(BridgeError::validation(
                "api.signing",
                "asset_url and key_pattern are required for the portal generation",
            ));
        }

        if self.statistics.cadences().iter().any(|(_, c)| c.num_minutes() == 0) {
            return Err(BridgeError::validation(
                "statistics",
                "Cadences must be at least one minute",
            ));
        }

        Ok(())
    }

    /// Check that the credential seed required by the generation is present
    pub fn validate_credentials(&self) -> Result<()> {
        let c = &self.credentials;
        if self.api.generation.uses_account_login() {
            if c.username.trim().is_empty() || c.password.is_empty() {
                return Err(BridgeError::config(format!(
                    "credentials.username and credentials.password are required for the {} generation",
                    self.api.generation.as_str()
                )));
            }
        } else if c.app_id.trim().is_empty() || c.app_secret.is_empty() {
            return Err(BridgeError::config(
                "credentials.app_id and credentials.app_secret are required for the open_api generation",
            ));
        }
        Ok(())
    }
}
