//! Weather segment for status lines
//!
//! Fetches forecasts from a Dark Sky compatible API behind a stale-serving
//! refresh cache, and renders current conditions, the upcoming rain window
//! and best-hour evaluations as display fragments.

pub mod types;
pub mod cache;
pub mod classify;
pub mod evaluate;
pub mod geocode;
pub mod location;
pub mod provider;
pub mod rain;
pub mod segment;
pub mod settings;

pub use types::*;
pub use cache::{RefreshCache, RefreshPolicy, Refresher};
pub use classify::IconSet;
pub use evaluate::{BuiltinScorer, Evaluation, EvaluationEngine, EvaluationError, HourScorer, ScoreError};
pub use location::{FixedLocation, GeoIpResolver, LocationResolver};
pub use provider::{fetch_with_fallback, ForecastSource, WeatherProvider};
pub use rain::RainWindowFinder;
pub use segment::{ForecastRefresher, Rendered, SegmentAssembler, WeatherSegment};
pub use settings::WeatherSettings;
