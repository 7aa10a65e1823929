//! Rain window: the worst precipitation expected in the next day and the
//! hour it is forecast to clear.
//!
//! Whether a sample counts as rain is decided from the provider summary
//! text, not from the probability. Percentages are truncated, never
//! rounded, both for comparison and display.

use chrono::{DateTime, FixedOffset};

use crate::classify::{condition_style_tags, tags_for_provider_icon, IconSet};
use crate::types::{CurrentConditions, DisplayFragment, HourlySample};

/// Samples considered, counting the current hour at index 0
pub const HORIZON: usize = 24;
pub const MAX_ESCALATIONS: usize = 3;
/// Stands in for the icon once one has been shown
pub const SLOT_MARKER: &str = " ";

const RAIN_KEYWORDS: [&str; 2] = ["rain", "drizzle"];
const RAIN_STYLE: [&str; 3] = ["weather_rain_gradient", "weather_rain", "weather"];

pub fn is_rain(summary: &str) -> bool {
    let summary = summary.to_lowercase();
    RAIN_KEYWORDS.iter().any(|keyword| summary.contains(keyword))
}

/// Probability in [0, 1] as a whole percentage, truncated toward zero
pub fn percent(probability: f64) -> u32 {
    (probability * 100.0).trunc().clamp(0.0, 100.0) as u32
}

pub fn hour_label(time: &DateTime<FixedOffset>) -> String {
    time.format("%Hh").to_string()
}

pub struct RainWindowFinder<'a> {
    icons: &'a IconSet,
}

impl<'a> RainWindowFinder<'a> {
    pub fn new(icons: &'a IconSet) -> Self {
        Self { icons }
    }

    /// Scan the forecast and describe the approaching rain, if any.
    ///
    /// When the current sample already reads as rain the icon counts as
    /// shown and nothing is emitted for it. Otherwise a non-zero current
    /// probability is emitted with the rain icon. Up to
    /// [`MAX_ESCALATIONS`] strictly worsening rainy hours follow, and the
    /// first dry hour after an escalation ends the window.
    pub fn find(&self, current: &CurrentConditions, hourly: &[HourlySample]) -> Vec<DisplayFragment> {
        let mut fragments = Vec::new();
        let mut worst = percent(current.precipitation_probability);
        let mut icon_shown = false;

        if is_rain(&current.summary) {
            icon_shown = true;
        } else if current.precipitation_probability > 0.0 {
            fragments.push(
                DisplayFragment::new(format!("{} ", self.icons.icon_for_tag("rainy")))
                    .styled(["weather_condition_rainy", "weather_conditions", "weather"]),
            );
            fragments.push(percent_fragment(worst));
            icon_shown = true;
        }

        let mut escalations = 0;
        for hour in hourly.iter().take(HORIZON).skip(1) {
            let chance = percent(hour.precipitation_probability);
            let raining = is_rain(&hour.summary);

            if raining && chance > worst && escalations < MAX_ESCALATIONS {
                escalations += 1;
                worst = chance;
                let show_icon = !icon_shown;
                self.push_hour(&mut fragments, hour, show_icon);
                icon_shown = true;
            }

            if escalations > 0 && !raining {
                self.push_hour(&mut fragments, hour, true);
                break;
            }
        }

        fragments
    }

    fn push_hour(&self, fragments: &mut Vec<DisplayFragment>, hour: &HourlySample, show_icon: bool) {
        if show_icon {
            fragments.push(
                DisplayFragment::new(format!("{} ", self.icons.icon_for_provider(&hour.icon)))
                    .styled(condition_style_tags(tags_for_provider_icon(&hour.icon))),
            );
        } else {
            fragments.push(DisplayFragment::new(SLOT_MARKER));
        }
        fragments.push(percent_fragment(percent(hour.precipitation_probability)));
        fragments.push(DisplayFragment::new(format!("/{}", hour_label(&hour.time))));
    }
}

fn percent_fragment(chance: u32) -> DisplayFragment {
    DisplayFragment::new(format!("{}%", chance))
        .styled(RAIN_STYLE)
        .with_gradient(f64::from(chance))
}
