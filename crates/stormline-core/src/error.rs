//! Centralized error types for stormline.
//!
//! This module provides a typed error hierarchy that:
//! - Enables precise error handling at the binary edge
//! - Provides short messages suitable for a status line or terminal
//! - Preserves full error context for logging

use stormline_weather::{LocationError, WeatherError};
use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a message fit for the terminal.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather service error: {0}")]
    Weather(WeatherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Weather(e) => weather_user_message(e),
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

impl From<WeatherError> for AppError {
    fn from(err: WeatherError) -> Self {
        match err {
            WeatherError::Network(e) | WeatherError::Location(LocationError::Network(e)) => {
                AppError::Network(e.into_network_error())
            }
            other => AppError::Weather(other),
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    NoConfigDir,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NoConfigDir => "No configuration directory. Set XDG_CONFIG_HOME.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

fn weather_user_message(err: &WeatherError) -> &'static str {
    match err {
        WeatherError::InvalidApiKey => "Forecast API key is invalid. Check settings.",
        WeatherError::NoCredentials => "No forecast API key configured. Check settings.",
        WeatherError::AllCredentialsFailed(_) => {
            "No forecast API key worked. Check settings or try again later."
        }
        WeatherError::Location(_) => "Location not found. Check and try again.",
        WeatherError::Timeout(_) => "The forecast request timed out. Please try again.",
        WeatherError::Api { status, .. } if *status >= 500 => {
            "Weather service unavailable. Please try again later."
        }
        WeatherError::Api { .. } | WeatherError::Malformed(_) | WeatherError::Network(_) => {
            "Weather service error. Please try again."
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}
