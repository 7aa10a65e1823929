//! Condition classification, icon selection and temperature formatting.
//!
//! Condition codes follow the Yahoo! Weather numbering. Each code maps to
//! an ordered tag list: the specific condition first and the generic
//! fallback last. The last tag is the default rendering key.

use std::collections::HashMap;

use crate::types::{ConditionTags, TemperatureUnit};

/// Provider sentinel for "no data for this location"
pub const NOT_AVAILABLE_CODE: i32 = 3200;

pub const NOT_AVAILABLE: ConditionTags = &["not_available"];
pub const UNKNOWN: ConditionTags = &["unknown"];

const CONDITIONS: [ConditionTags; 48] = [
    &["tornado", "stormy"],                 // 0
    &["tropical_storm", "stormy"],          // 1
    &["hurricane", "stormy"],               // 2
    &["severe_thunderstorms", "stormy"],    // 3
    &["thunderstorms", "stormy"],           // 4
    &["mixed_rain_and_snow", "rainy"],      // 5
    &["mixed_rain_and_sleet", "rainy"],     // 6
    &["mixed_snow_and_sleet", "snowy"],     // 7
    &["freezing_drizzle", "rainy"],         // 8
    &["drizzle", "rainy"],                  // 9
    &["freezing_rain", "rainy"],            // 10
    &["showers", "rainy"],                  // 11
    &["showers", "rainy"],                  // 12
    &["snow_flurries", "snowy"],            // 13
    &["light_snow_showers", "snowy"],       // 14
    &["blowing_snow", "snowy"],             // 15
    &["snow", "snowy"],                     // 16
    &["hail", "snowy"],                     // 17
    &["sleet", "snowy"],                    // 18
    &["dust", "foggy"],                     // 19
    &["fog", "foggy"],                      // 20
    &["haze", "foggy"],                     // 21
    &["smoky", "foggy"],                    // 22
    &["blustery", "windy"],                 // 23
    &["windy"],                             // 24
    &["cold", "day"],                       // 25
    &["clouds", "cloudy"],                  // 26
    &["mostly_cloudy_night", "cloudy"],     // 27
    &["mostly_cloudy_day", "cloudy"],       // 28
    &["partly_cloudy_night", "cloudy"],     // 29
    &["partly_cloudy_day", "cloudy"],       // 30
    &["clear_night", "night"],              // 31
    &["sun", "sunny"],                      // 32
    &["fair_night", "night"],               // 33
    &["fair_day", "day"],                   // 34
    &["mixed_rain_and_hail", "rainy"],      // 35
    &["hot", "sunny"],                      // 36
    &["isolated_thunderstorms", "stormy"],  // 37
    &["scattered_thunderstorms", "stormy"], // 38
    &["scattered_thunderstorms", "stormy"], // 39
    &["scattered_showers", "rainy"],        // 40
    &["heavy_snow", "snowy"],               // 41
    &["scattered_snow_showers", "snowy"],   // 42
    &["heavy_snow", "snowy"],               // 43
    &["partly_cloudy", "cloudy"],           // 44
    &["thundershowers", "rainy"],           // 45
    &["snow_showers", "snowy"],             // 46
    &["isolated_thundershowers", "rainy"],  // 47
];

/// Table lookup without fallback
pub fn lookup(code: i32) -> Option<ConditionTags> {
    usize::try_from(code)
        .ok()
        .and_then(|index| CONDITIONS.get(index).copied())
}

/// Classify a condition code. Out-of-range codes fall back to
/// `not_available` (provider sentinel) or `unknown`.
pub fn classify(code: i32) -> ConditionTags {
    if let Some(tags) = lookup(code) {
        return tags;
    }
    if code == NOT_AVAILABLE_CODE {
        tracing::warn!("Weather is not available for this location");
        NOT_AVAILABLE
    } else {
        tracing::error!("Unknown condition code: {}", code);
        UNKNOWN
    }
}

/// Map a Dark Sky style icon id onto the condition table
pub fn code_for_provider_icon(icon: &str) -> i32 {
    match icon {
        "tornado" => 0,
        "thunderstorm" => 4,
        "rain" => 12,
        "snow" => 16,
        "hail" => 17,
        "sleet" => 18,
        "fog" => 20,
        "wind" => 24,
        "cloudy" => 26,
        "partly-cloudy-night" => 29,
        "partly-cloudy-day" => 30,
        "clear-night" => 31,
        "clear-day" => 32,
        _ => NOT_AVAILABLE_CODE,
    }
}

/// Tags for a provider icon id, without logging on unmapped ids
pub fn tags_for_provider_icon(icon: &str) -> ConditionTags {
    lookup(code_for_provider_icon(icon)).unwrap_or(NOT_AVAILABLE)
}

fn default_icon(tag: &str) -> Option<&'static str> {
    let icon = match tag {
        "day" => "DAY",
        "blustery" => "WIND",
        "rainy" => "RAIN",
        "cloudy" => "CLOUDS",
        "snowy" => "SNOW",
        "stormy" => "STORM",
        "foggy" => "FOG",
        "sunny" => "SUN",
        "night" => "NIGHT",
        "windy" => "WINDY",
        "not_available" => "NA",
        "unknown" => "UKN",
        _ => return None,
    };
    Some(icon)
}

/// Icon lookup with user overrides keyed by tag
#[derive(Debug, Clone, Default)]
pub struct IconSet {
    overrides: HashMap<String, String>,
}

impl IconSet {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// First overridden tag wins; otherwise the default icon of the last tag.
    pub fn icon_for(&self, tags: ConditionTags) -> String {
        tags.iter()
            .find_map(|tag| self.overrides.get(*tag))
            .cloned()
            .unwrap_or_else(|| {
                tags.last()
                    .and_then(|tag| default_icon(tag))
                    .unwrap_or("UKN")
                    .to_string()
            })
    }

    pub fn icon_for_tag(&self, tag: &str) -> String {
        self.overrides
            .get(tag)
            .cloned()
            .unwrap_or_else(|| default_icon(tag).unwrap_or("UKN").to_string())
    }

    pub fn icon_for_provider(&self, provider_icon: &str) -> String {
        self.icon_for(tags_for_provider_icon(provider_icon))
    }
}

/// Style tags for a condition icon: `weather_condition_<tag>` for every
/// tag, then the generic groups
pub fn condition_style_tags(tags: ConditionTags) -> Vec<String> {
    tags.iter()
        .map(|tag| format!("weather_condition_{}", tag))
        .chain(["weather_conditions".to_string(), "weather".to_string()])
        .collect()
}

/// Position of `celsius` between `coldest` and `hottest`, 0 to 100
pub fn gradient_level(celsius: f64, coldest: f64, hottest: f64) -> f64 {
    if celsius <= coldest {
        0.0
    } else if celsius >= hottest {
        100.0
    } else {
        (celsius - coldest) * 100.0 / (hottest - coldest)
    }
}

/// Render a Celsius reading in `unit`, returning the text and its gradient
/// level. The gradient is computed on the Celsius value.
///
/// `template` understands `{temp}` and `{temp:.N}`; the default is
/// `{temp:.0}` followed by the unit symbol.
pub fn format_temperature(
    celsius: f64,
    unit: TemperatureUnit,
    coldest: f64,
    hottest: f64,
    template: Option<&str>,
) -> (String, f64) {
    let converted = unit.convert(celsius);
    let text = match template {
        Some(template) => fill_temperature(template, converted),
        None => format!("{:.0}{}", converted, unit.symbol()),
    };
    (text, gradient_level(celsius, coldest, hottest))
}

fn fill_temperature(template: &str, value: f64) -> String {
    const OPEN: &str = "{temp";
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let spec = &tail[OPEN.len()..end];
        if spec.is_empty() {
            out.push_str(&value.to_string());
        } else if let Some(precision) = parse_precision(spec) {
            out.push_str(&format!("{:.*}", precision, value));
        } else {
            out.push_str(&tail[..=end]);
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}

fn parse_precision(spec: &str) -> Option<usize> {
    spec.strip_prefix(":.")?.trim_end_matches('f').parse().ok()
}
