use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Positive/negative/neutral shares of one scored document or one aggregate.
/// Components are in [0, 1] and sum to 1 within floating tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl SentimentScores {
    /// Fallback triple for symbols with no coverage. Neutral is derived from
    /// the other two components so the triple sums to exactly 1.
    pub fn neutral_default() -> Self {
        let positive = 1.0 / 3.0;
        let negative = 1.0 / 3.0;
        Self {
            positive,
            negative,
            neutral: 1.0 - positive - negative,
        }
    }

    pub fn sum(&self) -> f64 {
        self.positive + self.negative + self.neutral
    }
}

/// One scored document for one symbol, as produced by the external scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub scores: SentimentScores,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Direction of change in the positive component between the two most recent
/// record windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Reduced sentiment signal for one symbol over its recent document window.
/// Derived on each request; callers may cache it but this crate never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentAggregate {
    pub symbol: String,
    #[serde(rename = "sentiment")]
    pub label: SentimentLabel,
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
    pub trend: Trend,
    pub sample_size: usize,
}

impl SentimentAggregate {
    /// Aggregate for a symbol with no scored documents at all.
    pub fn neutral(symbol: &str) -> Self {
        let scores = SentimentScores::neutral_default();
        Self {
            symbol: symbol.to_string(),
            label: SentimentLabel::Neutral,
            positive: scores.positive,
            negative: scores.negative,
            neutral: scores.neutral,
            trend: Trend::Stable,
            sample_size: 0,
        }
    }

    pub fn scores(&self) -> SentimentScores {
        SentimentScores {
            positive: self.positive,
            negative: self.negative,
            neutral: self.neutral,
        }
    }
}

/// Source of the optional aggregate perturbation. Injected so production can
/// use a real RNG while tests supply a fixed sequence.
pub trait SentimentNoise {
    /// Uniform sample in [-1, 1].
    fn sample(&mut self) -> f64;
}

/// Thread-RNG noise for live serving paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNoise;

impl SentimentNoise for RandomNoise {
    fn sample(&mut self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Maximum number of newest-first records considered per symbol.
    pub window: usize,

    /// Size of each of the two windows compared for the trend.
    pub trend_window: usize,

    /// Minimum positive-share move between windows to leave "stable".
    pub trend_delta: f64,

    /// Mean share above which an aggregate is labeled POSITIVE/NEGATIVE.
    /// Equality stays NEUTRAL.
    pub label_threshold: f64,

    /// Maximum absolute perturbation applied to the positive share.
    pub jitter_magnitude: f64,

    /// Fraction of the positive perturbation applied inversely to the
    /// negative share.
    pub jitter_negative_ratio: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window: 50,
            trend_window: 10,
            trend_delta: 0.1,
            label_threshold: 0.5,
            jitter_magnitude: 0.04,
            jitter_negative_ratio: 0.6,
        }
    }
}

/// Reduces a symbol's newest-first scored documents into one
/// [`SentimentAggregate`]. Pure; all tunables live in [`AggregatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct SentimentAggregator {
    config: AggregatorConfig,
}

impl SentimentAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Deterministic aggregation; no perturbation.
    pub fn aggregate(&self, symbol: &str, records: &[SentimentRecord]) -> SentimentAggregate {
        self.build(symbol, records, None)
    }

    /// Aggregation with the "live" perturbation applied once. Callers must
    /// reuse the returned aggregate for every consumer of the same logical
    /// request instead of calling this again per consumer.
    pub fn aggregate_with(
        &self,
        symbol: &str,
        records: &[SentimentRecord],
        noise: &mut dyn SentimentNoise,
    ) -> SentimentAggregate {
        self.build(symbol, records, Some(noise))
    }

    fn build(
        &self,
        symbol: &str,
        records: &[SentimentRecord],
        noise: Option<&mut dyn SentimentNoise>,
    ) -> SentimentAggregate {
        let records = &records[..records.len().min(self.config.window)];
        if records.is_empty() {
            return SentimentAggregate::neutral(symbol);
        }

        let n = records.len() as f64;
        let mut scores = SentimentScores {
            positive: records.iter().map(|r| r.scores.positive).sum::<f64>() / n,
            negative: records.iter().map(|r| r.scores.negative).sum::<f64>() / n,
            neutral: records.iter().map(|r| r.scores.neutral).sum::<f64>() / n,
        };

        if let Some(noise) = noise {
            scores = self.perturb(scores, noise);
        }

        SentimentAggregate {
            symbol: symbol.to_string(),
            label: self.label(&scores),
            positive: scores.positive,
            negative: scores.negative,
            neutral: scores.neutral,
            trend: self.trend(records),
            sample_size: records.len(),
        }
    }

    fn label(&self, scores: &SentimentScores) -> SentimentLabel {
        if scores.positive > self.config.label_threshold {
            SentimentLabel::Positive
        } else if scores.negative > self.config.label_threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    /// Trend of the positive share only; the negative share is not trended.
    /// Requires two full windows, otherwise stable.
    fn trend(&self, records: &[SentimentRecord]) -> Trend {
        let w = self.config.trend_window;
        if w == 0 || records.len() < w * 2 {
            return Trend::Stable;
        }

        let mean_positive =
            |window: &[SentimentRecord]| window.iter().map(|r| r.scores.positive).sum::<f64>() / w as f64;
        let recent_avg = mean_positive(&records[..w]);
        let older_avg = mean_positive(&records[w..w * 2]);

        if recent_avg - older_avg > self.config.trend_delta {
            Trend::Improving
        } else if older_avg - recent_avg > self.config.trend_delta {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    fn perturb(&self, scores: SentimentScores, noise: &mut dyn SentimentNoise) -> SentimentScores {
        let delta = noise.sample().clamp(-1.0, 1.0) * self.config.jitter_magnitude;
        let positive = (scores.positive + delta).clamp(0.0, 1.0);
        let negative =
            (scores.negative - delta * self.config.jitter_negative_ratio).clamp(0.0, 1.0);

        let mut out = SentimentScores {
            positive,
            negative,
            neutral: 1.0 - positive - negative,
        };
        if out.neutral < 0.0 {
            // Clamping pushed positive + negative past 1; scale them back
            // onto the simplex.
            let scale = 1.0 / (out.positive + out.negative);
            out.positive *= scale;
            out.negative *= scale;
            out.neutral = 0.0;
        }
        out
    }
}
