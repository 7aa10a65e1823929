use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Temperature unit used for display. Provider data is always Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
    #[serde(rename = "K")]
    Kelvin,
}

impl TemperatureUnit {
    /// Convert a Celsius reading into this unit
    pub fn convert(self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            Self::Kelvin => celsius + 273.15,
        }
    }

    /// Inverse of [`TemperatureUnit::convert`]
    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Celsius => value,
            Self::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            Self::Kelvin => value - 273.15,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Kelvin => "K",
        }
    }
}

/// Geographic coordinates.
///
/// Equality and hashing use the exact bit patterns so coordinates can be
/// part of a cache key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl PartialEq for Coordinates {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl Eq for Coordinates {}

impl Hash for Coordinates {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

/// Identity of one forecast request.
///
/// `location_query: None` means "wherever we are right now".
///
/// The `Debug` output shows how many API keys there are, never their values.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub location_query: Option<String>,
    pub api_keys: Vec<String>,
    pub coordinates: Option<Coordinates>,
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("location_query", &self.location_query)
            .field("api_keys", &format_args!("<{} keys>", self.api_keys.len()))
            .field("coordinates", &self.coordinates)
            .finish()
    }
}

/// A location resolved from a free-text query or from GeoIP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub name: String,
    pub coordinates: Coordinates,
}

/// Ordered condition tags: specific tags first, the generic fallback last
pub type ConditionTags = &'static [&'static str];

/// Current conditions as reported by the forecast provider, before
/// classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub time: DateTime<FixedOffset>,
    /// Degrees Celsius
    pub temperature: f64,
    pub condition_code: i32,
    pub precipitation_probability: f64,
    pub summary: String,
    pub icon: String,
}

/// Classified current conditions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConditions {
    pub time: DateTime<FixedOffset>,
    /// Degrees Celsius
    pub temperature: f64,
    pub condition_code: i32,
    pub tags: ConditionTags,
    pub precipitation_probability: f64,
    pub summary: String,
    pub icon: String,
}

impl CurrentConditions {
    pub fn from_observation(observation: Observation, tags: ConditionTags) -> Self {
        Self {
            time: observation.time,
            temperature: observation.temperature,
            condition_code: observation.condition_code,
            tags,
            precipitation_probability: observation.precipitation_probability,
            summary: observation.summary,
            icon: observation.icon,
        }
    }
}

/// One hour of forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySample {
    pub time: DateTime<FixedOffset>,
    pub precipitation_probability: f64,
    pub summary: String,
    /// Provider icon identifier, e.g. `rain` or `clear-night`
    pub icon: String,
    pub temperature: Option<f64>,
}

/// Raw provider payload: current observation plus the hourly series
#[derive(Debug, Clone, PartialEq)]
pub struct RawForecast {
    pub current: Observation,
    pub hourly: Vec<HourlySample>,
}

/// Immutable result of one cache refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSnapshot {
    pub location: Option<String>,
    pub current: CurrentConditions,
    pub hourly: Vec<HourlySample>,
    pub fetched_at: DateTime<Utc>,
}

/// Unit of output handed to the host renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayFragment {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub style_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_level: Option<f64>,
}

impl DisplayFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style_tags: Vec::new(),
            gradient_level: None,
        }
    }

    pub fn styled<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.style_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gradient(mut self, level: f64) -> Self {
        self.gradient_level = Some(level.clamp(0.0, 100.0));
        self
    }
}

/// Location service errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Location not found: {0}")]
    NotFound(String),
    #[error("Malformed location response: {0}")]
    Malformed(String),
}

/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Forecast API returned status {status}")]
    Api { status: u16 },
    #[error("Forecast API rejected the key")]
    InvalidApiKey,
    #[error("Malformed forecast response: {0}")]
    Malformed(String),
    #[error("Location error: {0}")]
    Location(#[from] LocationError),
    #[error("No forecast API keys configured")]
    NoCredentials,
    #[error("All forecast API keys failed: {}", .0.join("; "))]
    AllCredentialsFailed(Vec<String>),
    #[error("Forecast request timed out after {0:?}")]
    Timeout(Duration),
}

impl WeatherError {
    /// Whether waiting for the next refresh may fix this error
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Location(LocationError::Network(_)) => {
                true
            }
            Self::Api { status } => *status >= 500 || *status == 429,
            Self::AllCredentialsFailed(_) => true,
            Self::InvalidApiKey
            | Self::Malformed(_)
            | Self::Location(_)
            | Self::NoCredentials => false,
        }
    }
}
