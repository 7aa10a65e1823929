//! Segment assembly: turns a cached forecast snapshot into the ordered
//! fragment list handed to the status line.

use crate::cache::{RefreshCache, Refresher};
use crate::classify::{classify, condition_style_tags, format_temperature, IconSet};
use crate::evaluate::{Evaluation, EvaluationEngine, EvaluationError};
use crate::location::{GeoIpResolver, LocationResolver};
use crate::provider::{align_to_request, fetch_with_fallback, ForecastSource, WeatherProvider};
use crate::rain::RainWindowFinder;
use crate::settings::WeatherSettings;
use crate::types::{
    CacheKey, CurrentConditions, DisplayFragment, ForecastSnapshot, TemperatureUnit, WeatherError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

const TEMPERATURE_STYLE: [&str; 3] = ["weather_temp_gradient", "weather_temp", "weather"];

/// Fetches and classifies one forecast for the refresh cache
pub struct ForecastRefresher {
    source: Arc<dyn ForecastSource>,
    resolver: Arc<dyn LocationResolver>,
}

impl ForecastRefresher {
    pub fn new(source: Arc<dyn ForecastSource>, resolver: Arc<dyn LocationResolver>) -> Self {
        Self { source, resolver }
    }
}

#[async_trait]
impl Refresher for ForecastRefresher {
    type Key = CacheKey;
    type Value = Arc<ForecastSnapshot>;
    type Error = WeatherError;

    async fn refresh(&self, key: &CacheKey) -> Result<Arc<ForecastSnapshot>, WeatherError> {
        let (location, coordinates) = match key.coordinates {
            Some(coordinates) => (key.location_query.clone(), coordinates),
            None => {
                let resolved = self.resolver.resolve(key.location_query.as_deref()).await?;
                (Some(resolved.name), resolved.coordinates)
            }
        };

        let requested_at = Utc::now();
        let mut forecast =
            fetch_with_fallback(self.source.as_ref(), &key.api_keys, coordinates).await?;
        align_to_request(&mut forecast, requested_at);

        let tags = classify(forecast.current.condition_code);
        Ok(Arc::new(ForecastSnapshot {
            location,
            current: CurrentConditions::from_observation(forecast.current, tags),
            hourly: forecast.hourly,
            fetched_at: requested_at,
        }))
    }
}

/// Output of one render. Evaluation failures never abort a render; they are
/// reported here next to whatever could be drawn.
#[derive(Debug, Default)]
pub struct Rendered {
    pub fragments: Vec<DisplayFragment>,
    pub failures: Vec<EvaluationError>,
}

pub struct SegmentAssembler {
    unit: TemperatureUnit,
    temp_coldest: f64,
    temp_hottest: f64,
    temp_format: Option<String>,
    show_rain_window: bool,
    icons: IconSet,
    engine: EvaluationEngine,
    evaluations: Vec<Evaluation>,
}

impl SegmentAssembler {
    pub fn new(settings: &WeatherSettings) -> Self {
        let icons = settings.icon_set();
        Self {
            unit: settings.unit,
            temp_coldest: settings.temp_coldest,
            temp_hottest: settings.temp_hottest,
            temp_format: settings.temp_format.clone(),
            show_rain_window: settings.show_rain_window,
            engine: EvaluationEngine::new(icons.clone()),
            icons,
            evaluations: settings.evaluations(),
        }
    }

    /// Register an additional evaluation, rendered after the configured ones
    pub fn push_evaluation(&mut self, evaluation: Evaluation) {
        self.evaluations.push(evaluation);
    }

    pub fn engine(&self) -> &EvaluationEngine {
        &self.engine
    }

    /// Condition icon, temperature, rain window, then one fragment per
    /// evaluation.
    pub fn assemble(&self, snapshot: &ForecastSnapshot) -> Rendered {
        let current = &snapshot.current;
        let mut fragments = Vec::new();

        fragments.push(
            DisplayFragment::new(format!("{} ", self.icons.icon_for(current.tags)))
                .styled(condition_style_tags(current.tags)),
        );

        let (text, level) = format_temperature(
            current.temperature,
            self.unit,
            self.temp_coldest,
            self.temp_hottest,
            self.temp_format.as_deref(),
        );
        fragments.push(
            DisplayFragment::new(text)
                .styled(TEMPERATURE_STYLE)
                .with_gradient(level),
        );

        if self.show_rain_window {
            fragments.extend(RainWindowFinder::new(&self.icons).find(current, &snapshot.hourly));
        }

        let mut failures = Vec::new();
        for evaluation in &self.evaluations {
            match self.engine.evaluate(evaluation, &snapshot.hourly) {
                Ok(rendered) => fragments.extend(rendered.iter().cloned()),
                Err(e) => {
                    tracing::error!("{}", e);
                    failures.push(e);
                }
            }
        }

        Rendered {
            fragments,
            failures,
        }
    }
}

/// The weather segment: a refresh cache for one configured location plus
/// the assembler that draws from it.
pub struct WeatherSegment {
    cache: RefreshCache<ForecastRefresher>,
    key: CacheKey,
    assembler: SegmentAssembler,
}

impl WeatherSegment {
    pub fn new(
        settings: &WeatherSettings,
        source: Arc<dyn ForecastSource>,
        resolver: Arc<dyn LocationResolver>,
    ) -> Self {
        Self {
            cache: RefreshCache::new(
                ForecastRefresher::new(source, resolver),
                settings.refresh_policy(),
            ),
            key: settings.cache_key(),
            assembler: SegmentAssembler::new(settings),
        }
    }

    /// Build a segment backed by the HTTP provider and GeoIP resolver
    pub fn from_settings(settings: &WeatherSettings) -> Result<Self, WeatherError> {
        let source = Arc::new(WeatherProvider::new(settings.forecast.base_url.as_str())?);
        let resolver = Arc::new(GeoIpResolver::new(
            settings.location.geoip_url.as_str(),
            settings.location.geocode_url.as_str(),
        )?);
        Ok(Self::new(settings, source, resolver))
    }

    pub fn push_evaluation(&mut self, evaluation: Evaluation) {
        self.assembler.push_evaluation(evaluation);
    }

    /// Render from the best snapshot available. Empty until the first
    /// successful refresh.
    pub async fn render(&self) -> Rendered {
        match self.cache.get(&self.key).await {
            Some(snapshot) => self.assembler.assemble(&snapshot),
            None => {
                tracing::debug!("No forecast available yet");
                Rendered::default()
            }
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn cache(&self) -> &RefreshCache<ForecastRefresher> {
        &self.cache
    }

    pub fn assembler(&self) -> &SegmentAssembler {
        &self.assembler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::BuiltinScorer;
    use crate::types::HourlySample;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn snapshot(tags: crate::types::ConditionTags, temperature: f64) -> ForecastSnapshot {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 6, 0, 0)
            .unwrap();
        let hourly = [(0.0, "Clear"), (0.5, "Rain"), (0.0, "Clear")]
            .iter()
            .enumerate()
            .map(|(index, (probability, summary))| HourlySample {
                time: start + Duration::hours(index as i64),
                precipitation_probability: *probability,
                summary: summary.to_string(),
                icon: if *summary == "Rain" { "rain" } else { "clear-day" }.to_string(),
                temperature: Some(temperature),
            })
            .collect();

        ForecastSnapshot {
            location: Some("Oslo".to_string()),
            current: CurrentConditions {
                time: start,
                temperature,
                condition_code: 32,
                tags,
                precipitation_probability: 0.0,
                summary: "Clear".to_string(),
                icon: "clear-day".to_string(),
            },
            hourly,
            fetched_at: Utc::now(),
        }
    }

    fn texts(rendered: &Rendered) -> Vec<&str> {
        rendered.fragments.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn test_assembly_order() {
        let mut settings = WeatherSettings::default();
        settings.evaluations.push(crate::settings::EvaluationSettings {
            name: "dry".to_string(),
            scorer: BuiltinScorer::Driest,
            template: "dry@{hour}".to_string(),
        });
        let assembler = SegmentAssembler::new(&settings);

        let rendered = assembler.assemble(&snapshot(&["sun", "sunny"], 10.0));

        assert_eq!(
            texts(&rendered),
            vec!["SUN ", "10°C", "RAIN ", "50%", "/07h", "SUN ", "0%", "/08h", "dry@08h"]
        );
        assert_eq!(
            rendered.fragments[0].style_tags,
            vec![
                "weather_condition_sun",
                "weather_condition_sunny",
                "weather_conditions",
                "weather"
            ]
        );
        assert_eq!(rendered.fragments[1].style_tags, TEMPERATURE_STYLE);
        assert_eq!(rendered.fragments[1].gradient_level, Some((10.0 - -30.0) * 100.0 / (40.0 - -30.0)));
        assert!(rendered.failures.is_empty());
    }

    #[test]
    fn test_rain_window_can_be_disabled() {
        let settings = WeatherSettings {
            show_rain_window: false,
            unit: TemperatureUnit::Fahrenheit,
            ..WeatherSettings::default()
        };
        let rendered = SegmentAssembler::new(&settings).assemble(&snapshot(&["sunny"], 100.0));
        assert_eq!(texts(&rendered), vec!["SUN ", "212°F"]);
        assert_eq!(rendered.fragments[1].gradient_level, Some(100.0));
    }

    #[test]
    fn test_evaluation_failure_is_reported_not_fatal() {
        let mut assembler = SegmentAssembler::new(&WeatherSettings::default());
        assembler.push_evaluation(Evaluation::new(
            "broken",
            "{hour}",
            |_: &HourlySample| -> Result<f64, crate::evaluate::ScoreError> {
                Err(crate::evaluate::ScoreError::Other("boom".to_string()))
            },
        ));
        assembler.push_evaluation(Evaluation::new("wet", "wet@{hour}", BuiltinScorer::Wettest));

        let rendered = assembler.assemble(&snapshot(&["sunny"], 10.0));

        assert_eq!(rendered.failures.len(), 1);
        assert_eq!(rendered.failures[0].name(), "broken");
        assert_eq!(texts(&rendered).last().copied(), Some("wet@07h"));
    }

    #[test]
    fn test_icon_override_applies_to_condition() {
        let mut settings = WeatherSettings::default();
        settings.icons.insert("sunny".to_string(), "☀".to_string());
        let rendered = SegmentAssembler::new(&settings).assemble(&snapshot(&["sun", "sunny"], 10.0));
        assert_eq!(rendered.fragments[0].text, "☀ ");
    }
}
