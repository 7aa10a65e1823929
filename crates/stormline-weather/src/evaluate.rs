//! Best-hour evaluations.
//!
//! An evaluation scores every hour of the next day with a caller-supplied
//! [`HourScorer`] and renders the best hour through a template. Results
//! are memoized by evaluation name for the lifetime of the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::IconSet;
use crate::rain::{hour_label, percent, HORIZON};
use crate::types::{DisplayFragment, HourlySample};

pub const DEFAULT_TEMPLATE: &str = "{icon}{hour}";

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("sample has no {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Other(String),
}

/// Scores one hour; higher is better
pub trait HourScorer: Send + Sync {
    fn score(&self, sample: &HourlySample) -> Result<f64, ScoreError>;
}

impl<F> HourScorer for F
where
    F: Fn(&HourlySample) -> Result<f64, ScoreError> + Send + Sync,
{
    fn score(&self, sample: &HourlySample) -> Result<f64, ScoreError> {
        self(sample)
    }
}

/// Scorers selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinScorer {
    Driest,
    Wettest,
    Warmest,
    Coldest,
}

impl HourScorer for BuiltinScorer {
    fn score(&self, sample: &HourlySample) -> Result<f64, ScoreError> {
        let temperature = || sample.temperature.ok_or(ScoreError::MissingField("temperature"));
        match self {
            Self::Driest => Ok(1.0 - sample.precipitation_probability),
            Self::Wettest => Ok(sample.precipitation_probability),
            Self::Warmest => temperature(),
            Self::Coldest => temperature().map(|t| -t),
        }
    }
}

/// A named scorer plus the template used to render its best hour.
///
/// Placeholders: `{hour}`, `{summary}`, `{precipitation}`, `{icon}`,
/// `{score}`.
#[derive(Clone)]
pub struct Evaluation {
    pub name: String,
    pub template: String,
    scorer: Arc<dyn HourScorer>,
}

impl Evaluation {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        scorer: impl HourScorer + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            scorer: Arc::new(scorer),
        }
    }
}

impl fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluation")
            .field("name", &self.name)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("evaluation '{name}' failed for {time}: {source}")]
    Score {
        name: String,
        time: DateTime<FixedOffset>,
        #[source]
        source: ScoreError,
    },
    #[error("evaluation '{name}' scored NaN for {time}")]
    NotANumber {
        name: String,
        time: DateTime<FixedOffset>,
    },
}

impl EvaluationError {
    pub fn name(&self) -> &str {
        match self {
            Self::Score { name, .. } | Self::NotANumber { name, .. } => name,
        }
    }
}

type Memo = Arc<Mutex<Option<Arc<[DisplayFragment]>>>>;

/// Memoizing evaluator. The first successful, non-empty result for a name
/// is kept until [`EvaluationEngine::clear`].
pub struct EvaluationEngine {
    icons: IconSet,
    memo: Mutex<HashMap<String, Memo>>,
    scans: AtomicUsize,
}

impl EvaluationEngine {
    pub fn new(icons: IconSet) -> Self {
        Self {
            icons,
            memo: Mutex::new(HashMap::new()),
            scans: AtomicUsize::new(0),
        }
    }

    /// Evaluate `evaluation` over `hourly[1..24]`.
    ///
    /// Concurrent first calls for one name scan once; the others wait and
    /// receive the same result. Failures and empty windows are not
    /// memoized.
    pub fn evaluate(
        &self,
        evaluation: &Evaluation,
        hourly: &[HourlySample],
    ) -> Result<Arc<[DisplayFragment]>, EvaluationError> {
        let memo = Arc::clone(self.memo.lock().entry(evaluation.name.clone()).or_default());
        let mut memoized = memo.lock();
        if let Some(fragments) = memoized.as_ref() {
            return Ok(Arc::clone(fragments));
        }

        let fragments: Arc<[DisplayFragment]> = self.scan(evaluation, hourly)?.into();
        if !fragments.is_empty() {
            *memoized = Some(Arc::clone(&fragments));
        }
        Ok(fragments)
    }

    /// Number of scans performed so far
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.memo.lock().clear();
    }

    fn scan(
        &self,
        evaluation: &Evaluation,
        hourly: &[HourlySample],
    ) -> Result<Vec<DisplayFragment>, EvaluationError> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let mut best: Option<(&HourlySample, f64)> = None;
        for sample in hourly.iter().take(HORIZON).skip(1) {
            let score = evaluation
                .scorer
                .score(sample)
                .map_err(|source| EvaluationError::Score {
                    name: evaluation.name.clone(),
                    time: sample.time,
                    source,
                })?;
            if score.is_nan() {
                return Err(EvaluationError::NotANumber {
                    name: evaluation.name.clone(),
                    time: sample.time,
                });
            }
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((sample, score));
            }
        }

        Ok(best
            .map(|(sample, score)| vec![self.render(evaluation, sample, score)])
            .unwrap_or_default())
    }

    fn render(&self, evaluation: &Evaluation, sample: &HourlySample, score: f64) -> DisplayFragment {
        let text = fill_placeholders(&evaluation.template, |name| match name {
            "hour" => Some(hour_label(&sample.time)),
            "summary" => Some(sample.summary.clone()),
            "precipitation" => Some(percent(sample.precipitation_probability).to_string()),
            "icon" => Some(self.icons.icon_for_provider(&sample.icon)),
            "score" => Some(format!("{:.2}", score)),
            _ => None,
        });
        DisplayFragment::new(text).styled([
            format!("weather_evaluation_{}", evaluation.name),
            "weather_evaluation".to_string(),
            "weather".to_string(),
        ])
    }
}

/// Single-pass `{name}` substitution; unknown names are left as written
fn fill_placeholders(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        match lookup(&tail[1..close]) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    fn hourly(probabilities: &[f64]) -> Vec<HourlySample> {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 12, 0, 0)
            .unwrap();
        probabilities
            .iter()
            .enumerate()
            .map(|(index, probability)| HourlySample {
                time: start + Duration::hours(index as i64),
                precipitation_probability: *probability,
                summary: format!("hour {}", index),
                icon: "clear-day".to_string(),
                temperature: Some(index as f64),
            })
            .collect()
    }

    fn engine() -> EvaluationEngine {
        EvaluationEngine::new(IconSet::default())
    }

    #[test]
    fn test_picks_strictly_best_hour() {
        let engine = engine();
        let evaluation = Evaluation::new("driest", "{hour} {precipitation}% {summary}", BuiltinScorer::Driest);
        let samples = hourly(&[0.0, 0.6, 0.3, 0.1, 0.5]);

        let fragments = engine.evaluate(&evaluation, &samples).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "15h 10% hour 3");
        assert_eq!(
            fragments[0].style_tags,
            vec!["weather_evaluation_driest", "weather_evaluation", "weather"]
        );
    }

    #[test]
    fn test_first_hour_wins_ties() {
        let engine = engine();
        let evaluation = Evaluation::new("wettest", "{hour}", BuiltinScorer::Wettest);
        let samples = hourly(&[0.9, 0.4, 0.7, 0.7, 0.2]);

        let fragments = engine.evaluate(&evaluation, &samples).unwrap();
        assert_eq!(fragments[0].text, "14h");
    }

    #[test]
    fn test_hour_zero_is_excluded() {
        let engine = engine();
        let evaluation = Evaluation::new("coldest", "{summary}", BuiltinScorer::Coldest);
        let fragments = engine.evaluate(&evaluation, &hourly(&[0.0; 5])).unwrap();
        assert_eq!(fragments[0].text, "hour 1");
    }

    #[test]
    fn test_memoized_by_name_without_rescan() {
        let engine = engine();
        let evaluation = Evaluation::new("warmest", DEFAULT_TEMPLATE, BuiltinScorer::Warmest);
        let samples = hourly(&[0.0; 6]);

        let first = engine.evaluate(&evaluation, &samples).unwrap();
        let second = engine.evaluate(&evaluation, &hourly(&[0.5; 3])).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.scans(), 1);
        assert_eq!(first[0].text, "SUN17h");

        engine.clear();
        engine.evaluate(&evaluation, &samples).unwrap();
        assert_eq!(engine.scans(), 2);
    }

    #[test]
    fn test_scorer_failure_is_reported_and_not_memoized() {
        let engine = engine();
        let evaluation = Evaluation::new("warmest", "{hour}", BuiltinScorer::Warmest);
        let mut samples = hourly(&[0.0; 4]);
        samples[2].temperature = None;

        let error = engine.evaluate(&evaluation, &samples).unwrap_err();
        assert_eq!(error.name(), "warmest");
        assert!(matches!(
            error,
            EvaluationError::Score {
                source: ScoreError::MissingField("temperature"),
                ..
            }
        ));

        samples[2].temperature = Some(1.5);
        assert!(engine.evaluate(&evaluation, &samples).is_ok());
        assert_eq!(engine.scans(), 2);
    }

    #[test]
    fn test_nan_score_is_an_error() {
        let engine = engine();
        let evaluation = Evaluation::new("broken", "{hour}", |_: &HourlySample| -> Result<f64, ScoreError> {
            Ok(f64::NAN)
        });
        let error = engine.evaluate(&evaluation, &hourly(&[0.0; 3])).unwrap_err();
        assert!(matches!(error, EvaluationError::NotANumber { .. }));
    }

    #[test]
    fn test_empty_window_is_empty_and_not_memoized() {
        let engine = engine();
        let evaluation = Evaluation::new("driest", "{hour}", BuiltinScorer::Driest);

        assert!(engine.evaluate(&evaluation, &hourly(&[0.3])).unwrap().is_empty());
        assert_eq!(engine.evaluate(&evaluation, &hourly(&[0.3, 0.2])).unwrap().len(), 1);
    }

    #[test]
    fn test_custom_closure_scorer() {
        let engine = engine();
        let evaluation = Evaluation::new(
            "late",
            "{hour} ({score})",
            |sample: &HourlySample| -> Result<f64, ScoreError> {
                Ok(sample.time.timestamp() as f64 / 3600.0 % 24.0)
            },
        );
        let fragments = engine.evaluate(&evaluation, &hourly(&[0.0; 4])).unwrap();
        assert_eq!(fragments[0].text, "15h (15.00)");
    }

    #[test]
    fn test_concurrent_first_evaluation_scans_once() {
        let engine = engine();
        let evaluation = Evaluation::new("slow", "{hour}", |sample: &HourlySample| -> Result<f64, ScoreError> {
            std::thread::sleep(StdDuration::from_millis(5));
            Ok(sample.precipitation_probability)
        });
        let samples = hourly(&[0.0, 0.1, 0.2, 0.3]);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| engine.evaluate(&evaluation, &samples).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(engine.scans(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn test_placeholders_single_pass() {
        let filled = fill_placeholders("{a}-{b}-{c", |name| match name {
            "a" => Some("{b}".to_string()),
            "b" => Some("B".to_string()),
            _ => None,
        });
        assert_eq!(filled, "{b}-B-{c");
    }
}
