//! Forecast provider speaking the Dark Sky response format (Pirate Weather
//! and compatible services).

use crate::classify::code_for_provider_icon;
use crate::types::{Coordinates, HourlySample, Observation, RawForecast, WeatherError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.pirateweather.net";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const EXCLUDED_BLOCKS: &str = "minutely,daily,alerts,flags";

/// A source of raw forecasts for one credential
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch(&self, api_key: &str, coordinates: Coordinates) -> Result<RawForecast, WeatherError>;
}

/// Try each key in order and return the first successful forecast.
///
/// Key values never appear in logs or errors, only their position.
pub async fn fetch_with_fallback(
    source: &dyn ForecastSource,
    api_keys: &[String],
    coordinates: Coordinates,
) -> Result<RawForecast, WeatherError> {
    if api_keys.is_empty() {
        return Err(WeatherError::NoCredentials);
    }

    let mut failures = Vec::with_capacity(api_keys.len());
    for (index, api_key) in api_keys.iter().enumerate() {
        match source.fetch(api_key, coordinates).await {
            Ok(forecast) => {
                if index > 0 {
                    tracing::info!("Forecast fetched with fallback key #{}", index + 1);
                }
                return Ok(forecast);
            }
            Err(e) => {
                tracing::warn!("Forecast key #{} failed: {}", index + 1, e);
                failures.push(format!("key #{}: {}", index + 1, e));
            }
        }
    }

    Err(WeatherError::AllCredentialsFailed(failures))
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    base_url: String,
    timeout: Duration,
}

impl WeatherProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, WeatherError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// The key is part of the path, so transport errors lose their URL
    fn transport_error(&self, err: reqwest::Error) -> WeatherError {
        if err.is_timeout() {
            WeatherError::Timeout(self.timeout)
        } else {
            WeatherError::Network(err.without_url())
        }
    }

    fn forecast_url(&self, api_key: &str, coordinates: Coordinates) -> String {
        format!(
            "{}/forecast/{}/{},{}",
            self.base_url, api_key, coordinates.latitude, coordinates.longitude
        )
    }
}

#[async_trait]
impl ForecastSource for WeatherProvider {
    async fn fetch(&self, api_key: &str, coordinates: Coordinates) -> Result<RawForecast, WeatherError> {
        tracing::debug!(
            "Fetching forecast for {:.2},{:.2}",
            coordinates.latitude,
            coordinates.longitude
        );

        let response = self
            .client
            .get(self.forecast_url(api_key, coordinates))
            .query(&[("units", "ca"), ("exclude", EXCLUDED_BLOCKS)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(WeatherError::InvalidApiKey);
        }
        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        parse_forecast(&body)
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    /// Hours east of UTC at the forecast location
    offset: Option<f64>,
    currently: DataPoint,
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    data: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataPoint {
    time: i64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    icon: String,
    precip_probability: Option<f64>,
    temperature: Option<f64>,
}

/// Parse and validate a provider response body.
///
/// Times are expressed in the location's UTC offset. A missing
/// precipitation probability reads as zero.
pub fn parse_forecast(body: &str) -> Result<RawForecast, WeatherError> {
    let response: ForecastResponse =
        serde_json::from_str(body).map_err(|e| WeatherError::Malformed(e.to_string()))?;

    let offset_hours = response.offset.unwrap_or(0.0);
    let offset = FixedOffset::east_opt((offset_hours * 3600.0).round() as i32)
        .ok_or_else(|| WeatherError::Malformed(format!("invalid UTC offset {}", offset_hours)))?;

    let currently = response.currently;
    let temperature = currently
        .temperature
        .ok_or_else(|| WeatherError::Malformed("current temperature missing".to_string()))?;
    let current = Observation {
        time: local_time(currently.time, offset)?,
        temperature,
        condition_code: code_for_provider_icon(&currently.icon),
        precipitation_probability: probability(currently.precip_probability)?,
        summary: currently.summary,
        icon: currently.icon,
    };

    let points = response.hourly.map(|block| block.data).unwrap_or_default();
    let mut hourly: Vec<HourlySample> = Vec::with_capacity(points.len());
    for point in points {
        let time = local_time(point.time, offset)?;
        if hourly.last().is_some_and(|previous| previous.time >= time) {
            return Err(WeatherError::Malformed(format!(
                "hourly samples out of order at {}",
                time
            )));
        }
        hourly.push(HourlySample {
            time,
            precipitation_probability: probability(point.precip_probability)?,
            summary: point.summary,
            icon: point.icon,
            temperature: point.temperature,
        });
    }

    Ok(RawForecast { current, hourly })
}

/// Shift every timestamp by the whole-hour difference between the request
/// clock and the observation time, so hour labels follow the local clock
/// even when the provider's observation lags.
pub fn align_to_request(forecast: &mut RawForecast, requested_at: DateTime<Utc>) {
    let offset = *forecast.current.time.offset();
    let requested = requested_at.with_timezone(&offset);
    let shift = floor_to_hour(requested) - floor_to_hour(forecast.current.time);
    if shift == ChronoDuration::zero() {
        return;
    }

    tracing::debug!("Aligning forecast by {} hour(s)", shift.num_hours());
    forecast.current.time = forecast.current.time + shift;
    for sample in &mut forecast.hourly {
        sample.time = sample.time + shift;
    }
}

fn floor_to_hour(time: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    time - ChronoDuration::seconds(i64::from(time.minute() * 60 + time.second()))
        - ChronoDuration::nanoseconds(i64::from(time.nanosecond()))
}

fn local_time(timestamp: i64, offset: FixedOffset) -> Result<DateTime<FixedOffset>, WeatherError> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|utc| utc.with_timezone(&offset))
        .ok_or_else(|| WeatherError::Malformed(format!("timestamp {} out of range", timestamp)))
}

fn probability(value: Option<f64>) -> Result<f64, WeatherError> {
    let value = value.unwrap_or(0.0);
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(WeatherError::Malformed(format!(
            "precipitation probability {} outside [0, 1]",
            value
        )))
    }
}
