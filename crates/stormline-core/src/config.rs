use crate::error::{AppError, ConfigError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use stormline_weather::WeatherSettings;
use url::Url;

const APP_DIR: &str = "stormline";
const CONFIG_FILE: &str = "config.toml";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the configuration file
    #[serde(skip, default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Weather segment settings
    #[serde(default)]
    pub weather: WeatherSettings,
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            weather: WeatherSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !path.exists() {
            let config = Self {
                config_dir,
                ..Self::default()
            };
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let mut config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.config_dir = config_dir;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult), AppError> {
        Self::load_validated_from(&Self::config_path()?)
    }

    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult), AppError> {
        let config = Self::load_from(path).map_err(|e| match e.downcast::<ConfigError>() {
            Ok(config_err) => AppError::Config(config_err),
            Err(other) => AppError::Other(other),
        })?;
        config.into_validated()
    }

    /// Validate an already loaded configuration, logging any warnings
    pub fn into_validated(self) -> Result<(Self, ValidationResult), AppError> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((self, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let weather = &self.weather;

        // Temperature reference points
        if weather.temp_coldest >= weather.temp_hottest {
            result.add_error(
                "weather.temp_coldest",
                format!(
                    "Must be below weather.temp_hottest ({} >= {})",
                    weather.temp_coldest, weather.temp_hottest
                ),
            );
        }

        if let Some(format) = &weather.temp_format {
            if !format.contains("{temp") {
                result.add_warning(
                    "weather.temp_format",
                    "Format has no {temp} placeholder; the temperature will not be shown",
                );
            }
        }

        if weather.location_query.as_deref().is_some_and(|q| q.trim().is_empty()) {
            result.add_error("weather.location_query", "Location query must not be empty");
        }

        // Timing
        if weather.refresh_seconds == 0 {
            result.add_error("weather.refresh_seconds", "Refresh interval must be greater than 0");
        }
        if weather.refresh_budget_seconds == 0 {
            result.add_error(
                "weather.refresh_budget_seconds",
                "Refresh budget must be greater than 0",
            );
        } else if weather.refresh_budget_seconds >= weather.refresh_seconds {
            result.add_warning(
                "weather.refresh_budget_seconds",
                "Refresh budget is not shorter than the refresh interval",
            );
        }
        if weather.render_interval_seconds == 0 {
            result.add_error(
                "weather.render_interval_seconds",
                "Render interval must be greater than 0",
            );
        }

        // Forecast provider
        let forecast = &weather.forecast;
        if forecast.api_keys.is_empty() {
            result.add_error("weather.forecast.api_keys", "At least one API key is required");
        } else if forecast.api_keys.iter().any(|key| key.trim().is_empty()) {
            result.add_error("weather.forecast.api_keys", "API keys must not be empty");
        }

        match (forecast.latitude, forecast.longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    result.add_error(
                        "weather.forecast.latitude",
                        format!("Latitude out of range: {}", latitude),
                    );
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    result.add_error(
                        "weather.forecast.longitude",
                        format!("Longitude out of range: {}", longitude),
                    );
                }
            }
            (None, None) => {}
            _ => result.add_error(
                "weather.forecast",
                "Latitude and longitude must be set together",
            ),
        }

        self.validate_url(&forecast.base_url, "weather.forecast.base_url", &mut result);
        self.validate_url(
            &weather.location.geoip_url,
            "weather.location.geoip_url",
            &mut result,
        );
        self.validate_url(
            &weather.location.geocode_url,
            "weather.location.geocode_url",
            &mut result,
        );

        // Evaluations
        let mut names = HashSet::new();
        for evaluation in &weather.evaluations {
            if evaluation.name.trim().is_empty() {
                result.add_error("weather.evaluations", "Evaluation name must not be empty");
            } else if !names.insert(evaluation.name.as_str()) {
                result.add_error(
                    "weather.evaluations",
                    format!("Duplicate evaluation name: {}", evaluation.name),
                );
            }
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to its default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.config_dir.join(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?.join(APP_DIR);

        Ok(config_dir.join(CONFIG_FILE))
    }
}
