//! Forward geocoding: convert a free-text place query into coordinates.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use crate::types::{Coordinates, LocationError, ResolvedLocation};
use reqwest::Client;
use serde::Deserialize;

pub const DEFAULT_GEOCODE_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    // Nominatim returns coordinates as strings
    lat: String,
    lon: String,
    display_name: Option<String>,
}

/// Look up `query` and return the best match.
pub async fn geocode(client: &Client, base_url: &str, query: &str) -> Result<ResolvedLocation, LocationError> {
    let url = format!("{}/search", base_url.trim_end_matches('/'));

    let response = client
        .get(&url)
        .query(&[("q", query), ("format", "json"), ("limit", "1")])
        .send()
        .await?;

    if !response.status().is_success() {
        tracing::debug!("Geocode returned status {}", response.status());
        return Err(LocationError::NotFound(query.to_string()));
    }

    let places: Vec<NominatimPlace> = response
        .json()
        .await
        .map_err(|e| LocationError::Malformed(e.to_string()))?;
    let place = places
        .into_iter()
        .next()
        .ok_or_else(|| LocationError::NotFound(query.to_string()))?;

    let coordinates = Coordinates::new(parse_degrees(&place.lat)?, parse_degrees(&place.lon)?);
    let name = place.display_name.unwrap_or_else(|| query.to_string());

    tracing::info!("Geocoded '{}' to {}", query, name);
    Ok(ResolvedLocation { name, coordinates })
}

fn parse_degrees(value: &str) -> Result<f64, LocationError> {
    value
        .trim()
        .parse()
        .map_err(|_| LocationError::Malformed(format!("invalid coordinate '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_degrees() {
        assert_eq!(parse_degrees(" 59.9133301 ").unwrap(), 59.9133301);
        assert!(matches!(
            parse_degrees("north").unwrap_err(),
            LocationError::Malformed(_)
        ));
    }
}
