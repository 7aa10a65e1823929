use crate::geocode::geocode;
use crate::types::{Coordinates, LocationError, ResolvedLocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_GEOIP_URL: &str = "http://geoip.nekudo.com/api/";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("stormline/", env!("CARGO_PKG_VERSION"));

/// Turns an optional place query into coordinates.
/// `None` asks for the machine's current location.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, query: Option<&str>) -> Result<ResolvedLocation, LocationError>;
}

/// Always answers with the same location
#[derive(Debug, Clone)]
pub struct FixedLocation(pub ResolvedLocation);

#[async_trait]
impl LocationResolver for FixedLocation {
    async fn resolve(&self, _query: Option<&str>) -> Result<ResolvedLocation, LocationError> {
        Ok(self.0.clone())
    }
}

/// GeoIP lookup for the current location, Nominatim for named places.
///
/// Successful resolutions are remembered per query for the lifetime of the
/// resolver; failures are retried on the next call.
pub struct GeoIpResolver {
    client: Client,
    geoip_url: String,
    geocode_url: String,
    resolved: Mutex<HashMap<Option<String>, ResolvedLocation>>,
}

impl GeoIpResolver {
    pub fn new(geoip_url: impl Into<String>, geocode_url: impl Into<String>) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            geoip_url: geoip_url.into(),
            geocode_url: geocode_url.into(),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    async fn current_location(&self) -> Result<ResolvedLocation, LocationError> {
        let response = self.client.get(&self.geoip_url).send().await?;
        if !response.status().is_success() {
            return Err(LocationError::Malformed(format!(
                "GeoIP lookup returned status {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let location = parse_geoip(&body)?;
        tracing::info!("Location returned by GeoIP is {}", location.name);
        Ok(location)
    }
}

#[async_trait]
impl LocationResolver for GeoIpResolver {
    async fn resolve(&self, query: Option<&str>) -> Result<ResolvedLocation, LocationError> {
        let key = query.map(str::to_string);
        let cached = self.resolved.lock().get(&key).cloned();
        if let Some(location) = cached {
            return Ok(location);
        }

        let location = match query {
            None => self.current_location().await?,
            Some(query) => geocode(&self.client, &self.geocode_url, query).await?,
        };

        self.resolved.lock().insert(key, location.clone());
        Ok(location)
    }
}

#[derive(Debug, Deserialize)]
struct GeoIpResponse {
    city: String,
    country: GeoIpCountry,
    location: GeoIpCoordinates,
}

#[derive(Debug, Deserialize)]
struct GeoIpCountry {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct GeoIpCoordinates {
    latitude: f64,
    longitude: f64,
}

/// Parse a GeoIP answer; the name reads `city,country,code`
fn parse_geoip(body: &str) -> Result<ResolvedLocation, LocationError> {
    let data: GeoIpResponse =
        serde_json::from_str(body).map_err(|e| LocationError::Malformed(e.to_string()))?;

    Ok(ResolvedLocation {
        name: [data.city, data.country.name, data.country.code].join(","),
        coordinates: Coordinates::new(data.location.latitude, data.location.longitude),
    })
}
