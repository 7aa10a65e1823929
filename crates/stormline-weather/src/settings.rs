//! User-facing weather settings, deserialized from the `[weather]` table
//! of the configuration file.

use crate::cache::{RefreshPolicy, DEFAULT_REFRESH_BUDGET_SECS, DEFAULT_TTL_SECS};
use crate::classify::IconSet;
use crate::evaluate::{BuiltinScorer, Evaluation, DEFAULT_TEMPLATE};
use crate::geocode::DEFAULT_GEOCODE_URL;
use crate::location::DEFAULT_GEOIP_URL;
use crate::provider::DEFAULT_BASE_URL;
use crate::types::{CacheKey, Coordinates, TemperatureUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TEMP_COLDEST: f64 = -30.0;
pub const DEFAULT_TEMP_HOTTEST: f64 = 40.0;
pub const DEFAULT_RENDER_INTERVAL_SECS: u64 = 60;

// Scalars first: TOML cannot emit a plain value after a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    pub unit: TemperatureUnit,
    pub temp_coldest: f64,
    pub temp_hottest: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_format: Option<String>,
    /// Place to forecast; absent means the current location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_query: Option<String>,
    pub refresh_seconds: u64,
    pub refresh_budget_seconds: u64,
    pub render_interval_seconds: u64,
    pub show_rain_window: bool,
    /// Icon overrides keyed by condition tag
    pub icons: BTreeMap<String, String>,
    pub forecast: ForecastSettings,
    pub location: LocationSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluations: Vec<EvaluationSettings>,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::default(),
            temp_coldest: DEFAULT_TEMP_COLDEST,
            temp_hottest: DEFAULT_TEMP_HOTTEST,
            temp_format: None,
            location_query: None,
            refresh_seconds: DEFAULT_TTL_SECS,
            refresh_budget_seconds: DEFAULT_REFRESH_BUDGET_SECS,
            render_interval_seconds: DEFAULT_RENDER_INTERVAL_SECS,
            show_rain_window: true,
            icons: BTreeMap::new(),
            forecast: ForecastSettings::default(),
            location: LocationSettings::default(),
            evaluations: Vec::new(),
        }
    }
}

impl WeatherSettings {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(
            Duration::from_secs(self.refresh_seconds),
            Duration::from_secs(self.refresh_budget_seconds),
        )
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_secs(self.render_interval_seconds)
    }

    /// Configured coordinates, when both halves are present
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.forecast.latitude, self.forecast.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
            _ => None,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            location_query: self.location_query.clone(),
            api_keys: self.forecast.api_keys.clone(),
            coordinates: self.coordinates(),
        }
    }

    pub fn icon_set(&self) -> IconSet {
        IconSet::new(
            self.icons
                .iter()
                .map(|(tag, icon)| (tag.clone(), icon.clone()))
                .collect(),
        )
    }

    pub fn evaluations(&self) -> Vec<Evaluation> {
        self.evaluations
            .iter()
            .map(EvaluationSettings::to_evaluation)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Tried in order until one succeeds
    pub api_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub base_url: String,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            latitude: None,
            longitude: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub geoip_url: String,
    pub geocode_url: String,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            geoip_url: DEFAULT_GEOIP_URL.to_string(),
            geocode_url: DEFAULT_GEOCODE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub name: String,
    pub scorer: BuiltinScorer,
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

impl EvaluationSettings {
    pub fn to_evaluation(&self) -> Evaluation {
        Evaluation::new(self.name.clone(), self.template.clone(), self.scorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let settings: WeatherSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, WeatherSettings::default());
        assert_eq!(settings.refresh_policy(), RefreshPolicy::default());
        assert!(settings.show_rain_window);
        assert_eq!(settings.forecast.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_coordinates_need_both_halves() {
        let mut settings = WeatherSettings::default();
        settings.forecast.latitude = Some(59.91);
        assert_eq!(settings.coordinates(), None);

        settings.forecast.longitude = Some(10.75);
        assert_eq!(settings.coordinates(), Some(Coordinates::new(59.91, 10.75)));
        assert_eq!(settings.cache_key().coordinates, settings.coordinates());
    }

    #[test]
    fn test_evaluation_template_defaults() {
        let json = r#"{ "evaluations": [ { "name": "dry", "scorer": "driest" } ] }"#;
        let settings: WeatherSettings = serde_json::from_str(json).unwrap();

        let evaluations = settings.evaluations();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].name, "dry");
        assert_eq!(evaluations[0].template, DEFAULT_TEMPLATE);
    }

    #[test]
    fn test_unknown_scorer_is_rejected() {
        let json = r#"{ "evaluations": [ { "name": "x", "scorer": "windiest" } ] }"#;
        assert!(serde_json::from_str::<WeatherSettings>(json).is_err());
    }

    #[test]
    fn test_icon_overrides_reach_icon_set() {
        let mut settings = WeatherSettings::default();
        settings.icons.insert("rainy".to_string(), "☔".to_string());
        assert_eq!(settings.icon_set().icon_for_tag("rainy"), "☔");
    }
}
