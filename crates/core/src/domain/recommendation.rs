use crate::domain::portfolio::{current_price, Holding, PortfolioMetrics, PriceQuote};
use crate::domain::sentiment::{SentimentAggregate, SentimentScores, Trend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// Coarse urgency bucket derived from the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Boundaries of the rule cascade. These values are the actual tunable
/// "model"; every predicate in the cascade reads them from here.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Share above which sentiment counts as strong (strict).
    pub strong_sentiment: f64,
    /// Lower bound (strict) of the moderate band; the upper bound is
    /// `strong_sentiment` inclusive.
    pub moderate_sentiment: f64,
    /// Portfolio weight (percent) above which a position is overweight.
    pub overweight_pct: f64,

    /// Loss bands (percent, negative).
    pub severe_loss_pct: f64,
    pub moderate_loss_pct: f64,
    pub shallow_loss_pct: f64,
    /// Lower bound of the buy-the-dip band.
    pub deep_dip_pct: f64,

    /// Gain bands (percent, positive).
    pub small_gain_pct: f64,
    pub large_gain_pct: f64,
    /// Gains beyond this no longer count as building momentum.
    pub momentum_gain_cap_pct: f64,

    /// Weight bands (percent).
    pub room_to_grow_weight_pct: f64,
    pub full_size_weight_pct: f64,

    /// Half-width of the near-entry band on profit/loss percent.
    pub near_entry_band_pct: f64,

    /// Priority cut-offs on confidence (strict).
    pub high_priority_confidence: f64,
    pub medium_priority_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            strong_sentiment: 0.55,
            moderate_sentiment: 0.45,
            overweight_pct: 25.0,
            severe_loss_pct: -20.0,
            moderate_loss_pct: -10.0,
            shallow_loss_pct: -5.0,
            deep_dip_pct: -25.0,
            small_gain_pct: 5.0,
            large_gain_pct: 30.0,
            momentum_gain_cap_pct: 15.0,
            room_to_grow_weight_pct: 15.0,
            full_size_weight_pct: 20.0,
            near_entry_band_pct: 10.0,
            high_priority_confidence: 80.0,
            medium_priority_confidence: 65.0,
        }
    }
}

impl Priority {
    pub fn from_confidence(confidence: f64, thresholds: &Thresholds) -> Self {
        if confidence > thresholds.high_priority_confidence {
            Priority::High
        } else if confidence > thresholds.medium_priority_confidence {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Per-holding figures the cascade decides on, derived once before
/// classification.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub purchase_price: f64,
    pub current_price: f64,
    pub profit_loss_pct: f64,
    pub portfolio_weight: f64,
    pub positive: f64,
    pub negative: f64,
    pub trend: Trend,
}

impl Position {
    pub fn derive(
        holding: &Holding,
        prices: &HashMap<String, PriceQuote>,
        sentiments: &HashMap<String, SentimentAggregate>,
        metrics: &PortfolioMetrics,
    ) -> Self {
        let price = current_price(prices, holding);
        let profit_loss_pct = if holding.purchase_price > 0.0 {
            (price - holding.purchase_price) / holding.purchase_price * 100.0
        } else {
            0.0
        };
        let position_value = price * holding.quantity;
        let portfolio_weight = if metrics.total_value > 0.0 {
            position_value / metrics.total_value * 100.0
        } else {
            0.0
        };
        let (positive, negative, trend) = match sentiments.get(&holding.symbol) {
            Some(agg) => (agg.positive, agg.negative, agg.trend),
            None => {
                let d = SentimentScores::neutral_default();
                (d.positive, d.negative, Trend::Stable)
            }
        };

        Self {
            symbol: holding.symbol.clone(),
            quantity: holding.quantity,
            purchase_price: holding.purchase_price,
            current_price: price,
            profit_loss_pct,
            portfolio_weight,
            positive,
            negative,
            trend,
        }
    }

    fn overweight(&self, t: &Thresholds) -> bool {
        self.portfolio_weight > t.overweight_pct
    }

    fn strong_neg(&self, t: &Thresholds) -> bool {
        self.negative > t.strong_sentiment
    }

    fn strong_pos(&self, t: &Thresholds) -> bool {
        self.positive > t.strong_sentiment
    }

    fn moderate_neg(&self, t: &Thresholds) -> bool {
        self.negative > t.moderate_sentiment && self.negative <= t.strong_sentiment
    }

    fn moderate_pos(&self, t: &Thresholds) -> bool {
        self.positive > t.moderate_sentiment && self.positive <= t.strong_sentiment
    }
}

/// What a matched rule decided for a position.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub action: Action,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

type RuleFn = fn(&Position, &Thresholds) -> Option<Outcome>;

pub struct Rule {
    pub name: &'static str,
    pub apply: RuleFn,
}

/// Ordered decision list: rules are evaluated top to bottom and the first
/// match wins. The order is load-bearing; reordering changes the classifier.
pub const RULES: &[Rule] = &[
    Rule {
        name: "severe_loss_strong_negative",
        apply: severe_loss_strong_negative,
    },
    Rule {
        name: "moderate_loss_strong_negative",
        apply: moderate_loss_strong_negative,
    },
    Rule {
        name: "declining_while_down",
        apply: declining_while_down,
    },
    Rule {
        name: "lock_in_gains_before_decline",
        apply: lock_in_gains_before_decline,
    },
    Rule {
        name: "rebalance_overconcentrated_winner",
        apply: rebalance_overconcentrated_winner,
    },
    Rule {
        name: "buy_the_dip",
        apply: buy_the_dip,
    },
    Rule {
        name: "improving_with_room_to_grow",
        apply: improving_with_room_to_grow,
    },
    Rule {
        name: "add_to_winner",
        apply: add_to_winner,
    },
    Rule {
        name: "building_momentum",
        apply: building_momentum,
    },
    Rule {
        name: "well_sized_winner",
        apply: well_sized_winner,
    },
    Rule {
        name: "modest_gain_neutral",
        apply: modest_gain_neutral,
    },
    Rule {
        name: "near_entry_no_signal",
        apply: near_entry_no_signal,
    },
    Rule {
        name: "monitor",
        apply: monitor,
    },
];

fn severe_loss_strong_negative(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_neg(t) && p.profit_loss_pct < t.severe_loss_pct) {
        return None;
    }
    Some(Outcome {
        action: Action::Sell,
        confidence: (70.0 + p.negative * 30.0).min(95.0),
        reasoning: vec![
            format!(
                "Down {:.1}% with strong negative sentiment ({:.1}%)",
                p.profit_loss_pct.abs(),
                p.negative * 100.0
            ),
            "Sell to limit further damage".to_string(),
        ],
    })
}

fn moderate_loss_strong_negative(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_neg(t) && p.profit_loss_pct < t.moderate_loss_pct) {
        return None;
    }
    Some(Outcome {
        action: Action::Sell,
        confidence: (65.0 + p.negative * 30.0).min(90.0),
        reasoning: vec![
            format!(
                "Down {:.1}% with strong negative sentiment ({:.1}%)",
                p.profit_loss_pct.abs(),
                p.negative * 100.0
            ),
            "Cut losses before the position deteriorates further".to_string(),
        ],
    })
}

fn declining_while_down(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.moderate_neg(t) && p.trend == Trend::Declining && p.profit_loss_pct < t.shallow_loss_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Sell,
        confidence: 75.0,
        reasoning: vec![
            format!(
                "Sentiment declining while already down {:.1}%",
                p.profit_loss_pct.abs()
            ),
            "Exit before further deterioration".to_string(),
        ],
    })
}

fn lock_in_gains_before_decline(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_neg(t) && p.profit_loss_pct > t.small_gain_pct) {
        return None;
    }
    Some(Outcome {
        action: Action::Sell,
        confidence: 85.0,
        reasoning: vec![
            format!("Strong negative sentiment ({:.1}%)", p.negative * 100.0),
            format!(
                "Lock in the {:.1}% gain before a sentiment-driven decline",
                p.profit_loss_pct
            ),
        ],
    })
}

fn rebalance_overconcentrated_winner(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.overweight(t) && p.profit_loss_pct > t.large_gain_pct && !p.strong_pos(t)) {
        return None;
    }
    Some(Outcome {
        action: Action::Sell,
        confidence: 80.0,
        reasoning: vec![
            format!(
                "Position is {:.1}% of the portfolio (overconcentrated)",
                p.portfolio_weight
            ),
            format!("Take profits at {:.1}% gain and rebalance", p.profit_loss_pct),
        ],
    })
}

fn buy_the_dip(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_pos(t)
        && p.profit_loss_pct > t.deep_dip_pct
        && p.profit_loss_pct < t.shallow_loss_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Buy,
        confidence: (65.0 + p.positive * 30.0).min(90.0),
        reasoning: vec![
            format!("Strong positive sentiment ({:.1}%)", p.positive * 100.0),
            format!(
                "Currently {:.1}% below purchase price",
                p.profit_loss_pct.abs()
            ),
            "Opportunity to average down with a positive outlook".to_string(),
        ],
    })
}

fn improving_with_room_to_grow(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_pos(t)
        && p.trend == Trend::Improving
        && p.portfolio_weight < t.room_to_grow_weight_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Buy,
        confidence: 85.0,
        reasoning: vec![
            "Improving sentiment trend".to_string(),
            format!("Underweight at {:.1}% of the portfolio", p.portfolio_weight),
            "Room to increase the position".to_string(),
        ],
    })
}

fn add_to_winner(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.strong_pos(t)
        && p.profit_loss_pct > 0.0
        && p.profit_loss_pct < t.large_gain_pct
        && p.portfolio_weight < t.full_size_weight_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Buy,
        confidence: (70.0 + p.positive * 20.0).min(88.0),
        reasoning: vec![
            format!("Strong positive sentiment ({:.1}%)", p.positive * 100.0),
            format!(
                "Up {:.1}% with portfolio weight at {:.1}%",
                p.profit_loss_pct, p.portfolio_weight
            ),
            "Add to a winner with room left".to_string(),
        ],
    })
}

fn building_momentum(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.moderate_pos(t)
        && p.trend == Trend::Improving
        && p.profit_loss_pct < t.momentum_gain_cap_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Buy,
        confidence: 75.0,
        reasoning: vec![
            "Improving trend on a moderately positive signal".to_string(),
            format!("Building momentum at {:.1}%", p.profit_loss_pct),
        ],
    })
}

fn well_sized_winner(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.profit_loss_pct > t.small_gain_pct
        && p.strong_pos(t)
        && p.portfolio_weight >= t.full_size_weight_pct)
    {
        return None;
    }
    Some(Outcome {
        action: Action::Hold,
        confidence: 85.0,
        reasoning: vec![
            format!("Up {:.1}% with sentiment still strong", p.profit_loss_pct),
            format!(
                "Position already {:.1}% of the portfolio",
                p.portfolio_weight
            ),
            "Hold the current size".to_string(),
        ],
    })
}

fn modest_gain_neutral(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.profit_loss_pct > 0.0
        && p.profit_loss_pct < t.large_gain_pct
        && !p.strong_neg(t)
        && !p.strong_pos(t))
    {
        return None;
    }
    Some(Outcome {
        action: Action::Hold,
        confidence: 70.0,
        reasoning: vec![
            format!("Currently up {:.1}%", p.profit_loss_pct),
            "Sentiment neutral to positive".to_string(),
            "Let the winner run".to_string(),
        ],
    })
}

fn near_entry_no_signal(p: &Position, t: &Thresholds) -> Option<Outcome> {
    if !(p.profit_loss_pct.abs() < t.near_entry_band_pct && !p.strong_neg(t) && !p.strong_pos(t)) {
        return None;
    }
    Some(Outcome {
        action: Action::Hold,
        confidence: 65.0,
        reasoning: vec![
            format!("Position near entry price ({:.1}%)", p.profit_loss_pct),
            "No clear sentiment signal".to_string(),
            "Wait for a clearer trend".to_string(),
        ],
    })
}

/// Catch-all; always matches so every holding gets a recommendation.
fn monitor(p: &Position, _t: &Thresholds) -> Option<Outcome> {
    Some(Outcome {
        action: Action::Hold,
        confidence: 60.0,
        reasoning: vec![
            format!("No strong signal at {:.1}%", p.profit_loss_pct),
            "Monitor the position".to_string(),
        ],
    })
}

/// Runs the cascade for one position. Returns the matched rule's name
/// alongside its outcome.
pub fn classify(position: &Position, thresholds: &Thresholds) -> (&'static str, Outcome) {
    for rule in RULES {
        if let Some(outcome) = (rule.apply)(position, thresholds) {
            return (rule.name, outcome);
        }
    }
    // Only reachable if RULES is edited to drop the catch-all.
    (
        "monitor",
        Outcome {
            action: Action::Hold,
            confidence: 60.0,
            reasoning: vec!["Monitor the position".to_string()],
        },
    )
}

/// Compact sentiment echo carried on each recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentBrief {
    pub positive: f64,
    pub negative: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub portfolio_weight: f64,
    pub profit_loss_percent: f64,
    pub priority: Priority,
    pub current_price: f64,
    pub purchase_price: f64,
    pub quantity: f64,
    pub sentiment: SentimentBrief,
}

/// One recommendation per holding, ranked by confidence descending. The sort
/// is stable: equal confidence preserves holding input order. Empty holdings
/// short-circuit to an empty list without touching the cascade.
pub fn recommend(
    holdings: &[Holding],
    prices: &HashMap<String, PriceQuote>,
    sentiments: &HashMap<String, SentimentAggregate>,
    metrics: &PortfolioMetrics,
    thresholds: &Thresholds,
) -> Vec<Recommendation> {
    if holdings.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(holdings.len());
    for holding in holdings {
        let position = Position::derive(holding, prices, sentiments, metrics);
        let (_, outcome) = classify(&position, thresholds);
        out.push(Recommendation {
            symbol: position.symbol,
            action: outcome.action,
            confidence: outcome.confidence,
            reasoning: outcome.reasoning,
            portfolio_weight: position.portfolio_weight,
            profit_loss_percent: position.profit_loss_pct,
            priority: Priority::from_confidence(outcome.confidence, thresholds),
            current_price: position.current_price,
            purchase_price: position.purchase_price,
            quantity: position.quantity,
            sentiment: SentimentBrief {
                positive: position.positive,
                negative: position.negative,
                trend: position.trend,
            },
        });
    }

    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::compute_portfolio_metrics;
    use crate::domain::sentiment::SentimentLabel;

    fn holding(symbol: &str, quantity: f64, purchase_price: f64) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            quantity,
            purchase_price,
        }
    }

    fn quote(symbol: &str, price: f64) -> (String, PriceQuote) {
        (
            symbol.to_string(),
            PriceQuote {
                symbol: symbol.to_string(),
                price,
            },
        )
    }

    fn aggregate(symbol: &str, positive: f64, negative: f64, trend: Trend) -> SentimentAggregate {
        SentimentAggregate {
            symbol: symbol.to_string(),
            label: if positive > 0.5 {
                SentimentLabel::Positive
            } else if negative > 0.5 {
                SentimentLabel::Negative
            } else {
                SentimentLabel::Neutral
            },
            positive,
            negative,
            neutral: 1.0 - positive - negative,
            trend,
            sample_size: 30,
        }
    }

    fn position(
        profit_loss_pct: f64,
        portfolio_weight: f64,
        positive: f64,
        negative: f64,
        trend: Trend,
    ) -> Position {
        Position {
            symbol: "TEST".to_string(),
            quantity: 1.0,
            purchase_price: 100.0,
            current_price: 100.0 * (1.0 + profit_loss_pct / 100.0),
            profit_loss_pct,
            portfolio_weight,
            positive,
            negative,
            trend,
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn severe_loss_with_strong_negative_sells() {
        let (name, outcome) =
            classify(&position(-25.0, 10.0, 0.1, 0.8, Trend::Stable), &thresholds());
        assert_eq!(name, "severe_loss_strong_negative");
        assert_eq!(outcome.action, Action::Sell);
        assert!((outcome.confidence - 94.0).abs() < 1e-9);
    }

    #[test]
    fn severe_loss_confidence_is_capped() {
        let (_, outcome) =
            classify(&position(-30.0, 10.0, 0.05, 0.9, Trend::Stable), &thresholds());
        assert_eq!(outcome.confidence, 95.0);
    }

    #[test]
    fn moderate_loss_with_strong_negative_sells() {
        let (name, outcome) =
            classify(&position(-12.0, 10.0, 0.1, 0.7, Trend::Stable), &thresholds());
        assert_eq!(name, "moderate_loss_strong_negative");
        assert_eq!(outcome.action, Action::Sell);
        assert!((outcome.confidence - 86.0).abs() < 1e-9);
    }

    #[test]
    fn moderate_negative_declining_while_down_sells() {
        let (name, outcome) =
            classify(&position(-6.0, 10.0, 0.3, 0.5, Trend::Declining), &thresholds());
        assert_eq!(name, "declining_while_down");
        assert_eq!(outcome.action, Action::Sell);
        assert_eq!(outcome.confidence, 75.0);
    }

    #[test]
    fn sentiment_boundary_at_strong_threshold_is_moderate() {
        // negative == 0.55 is not strong but is moderate.
        let (name, _) = classify(
            &position(-6.0, 10.0, 0.2, 0.55, Trend::Declining),
            &thresholds(),
        );
        assert_eq!(name, "declining_while_down");
    }

    #[test]
    fn gain_with_strong_negative_locks_in() {
        let (name, outcome) = classify(
            &position(11.46, 24.2, 0.1, 0.78, Trend::Stable),
            &thresholds(),
        );
        assert_eq!(name, "lock_in_gains_before_decline");
        assert_eq!(outcome.action, Action::Sell);
        assert_eq!(outcome.confidence, 85.0);
    }

    #[test]
    fn overconcentrated_winner_rebalances() {
        let (name, outcome) =
            classify(&position(35.0, 30.0, 0.4, 0.2, Trend::Stable), &thresholds());
        assert_eq!(name, "rebalance_overconcentrated_winner");
        assert_eq!(outcome.action, Action::Sell);
        assert_eq!(outcome.confidence, 80.0);
    }

    #[test]
    fn overconcentrated_winner_with_strong_positive_does_not_rebalance() {
        let (name, _) =
            classify(&position(35.0, 30.0, 0.7, 0.1, Trend::Stable), &thresholds());
        assert_ne!(name, "rebalance_overconcentrated_winner");
    }

    #[test]
    fn dip_with_strong_positive_buys() {
        let (name, outcome) =
            classify(&position(-10.0, 10.0, 0.7, 0.1, Trend::Stable), &thresholds());
        assert_eq!(name, "buy_the_dip");
        assert_eq!(outcome.action, Action::Buy);
        assert!((outcome.confidence - 86.0).abs() < 1e-9);
    }

    #[test]
    fn improving_underweight_position_buys() {
        // Down 3.1% with strong positive sentiment and an improving trend at
        // 6.8% weight: the dip band does not apply, the room-to-grow rule
        // does.
        let (name, outcome) = classify(
            &position(-3.1, 6.8, 0.82, 0.08, Trend::Improving),
            &thresholds(),
        );
        assert_eq!(name, "improving_with_room_to_grow");
        assert_eq!(outcome.action, Action::Buy);
        assert_eq!(outcome.confidence, 85.0);
    }

    #[test]
    fn winner_with_room_left_buys() {
        let (name, outcome) =
            classify(&position(12.0, 10.0, 0.8, 0.1, Trend::Stable), &thresholds());
        assert_eq!(name, "add_to_winner");
        assert_eq!(outcome.action, Action::Buy);
        assert!((outcome.confidence - 86.0).abs() < 1e-9);
    }

    #[test]
    fn moderate_positive_improving_builds_momentum() {
        let (name, outcome) =
            classify(&position(8.0, 25.0, 0.5, 0.2, Trend::Improving), &thresholds());
        assert_eq!(name, "building_momentum");
        assert_eq!(outcome.action, Action::Buy);
        assert_eq!(outcome.confidence, 75.0);
    }

    #[test]
    fn full_size_winner_holds() {
        let (name, outcome) =
            classify(&position(12.0, 22.0, 0.8, 0.1, Trend::Stable), &thresholds());
        assert_eq!(name, "well_sized_winner");
        assert_eq!(outcome.action, Action::Hold);
        assert_eq!(outcome.confidence, 85.0);
    }

    #[test]
    fn modest_gain_without_signal_holds() {
        let (name, outcome) =
            classify(&position(7.0, 10.0, 0.4, 0.3, Trend::Stable), &thresholds());
        assert_eq!(name, "modest_gain_neutral");
        assert_eq!(outcome.action, Action::Hold);
        assert_eq!(outcome.confidence, 70.0);
    }

    #[test]
    fn near_entry_without_signal_holds() {
        let (name, outcome) =
            classify(&position(-2.0, 10.0, 0.4, 0.3, Trend::Stable), &thresholds());
        assert_eq!(name, "near_entry_no_signal");
        assert_eq!(outcome.action, Action::Hold);
        assert_eq!(outcome.confidence, 65.0);
    }

    #[test]
    fn unmatched_position_falls_to_monitor() {
        // Deep loss with strong positive sentiment and no improving trend at
        // full weight: none of the directional rules fire.
        let (name, outcome) =
            classify(&position(-30.0, 20.0, 0.7, 0.1, Trend::Stable), &thresholds());
        assert_eq!(name, "monitor");
        assert_eq!(outcome.action, Action::Hold);
        assert_eq!(outcome.confidence, 60.0);
    }

    #[test]
    fn reasoning_percentages_use_one_decimal() {
        let (_, outcome) =
            classify(&position(-12.345, 10.0, 0.1, 0.7, Trend::Stable), &thresholds());
        assert!(outcome.reasoning[0].contains("12.3%"));
    }

    #[test]
    fn every_holding_yields_exactly_one_recommendation() {
        let holdings = vec![
            holding("AAPL", 10.0, 100.0),
            holding("MSFT", 5.0, 200.0),
            holding("GOOGL", 2.0, 300.0),
        ];
        let prices: HashMap<_, _> = [quote("AAPL", 110.0), quote("MSFT", 150.0)].into();
        let sentiments = HashMap::new();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
        let recs = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        assert_eq!(recs.len(), holdings.len());
        let mut symbols: Vec<_> = recs.iter().map(|r| r.symbol.as_str()).collect();
        symbols.sort_unstable();
        assert_eq!(symbols, vec!["AAPL", "GOOGL", "MSFT"]);
    }

    #[test]
    fn empty_holdings_short_circuit() {
        let metrics = compute_portfolio_metrics(&[], &HashMap::new(), &HashMap::new());
        let recs = recommend(&[], &HashMap::new(), &HashMap::new(), &metrics, &thresholds());
        assert!(recs.is_empty());
    }

    #[test]
    fn results_rank_by_confidence_descending() {
        let holdings = vec![
            holding("FLAT", 1.0, 100.0),
            holding("CRASH", 1.0, 100.0),
            holding("DIP", 1.0, 100.0),
        ];
        let prices: HashMap<_, _> = [
            quote("FLAT", 101.0),
            quote("CRASH", 70.0),
            quote("DIP", 90.0),
        ]
        .into();
        let sentiments: HashMap<_, _> = [
            (
                "CRASH".to_string(),
                aggregate("CRASH", 0.1, 0.8, Trend::Stable),
            ),
            ("DIP".to_string(), aggregate("DIP", 0.7, 0.1, Trend::Stable)),
        ]
        .into();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
        let recs = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        let symbols: Vec<_> = recs.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CRASH", "DIP", "FLAT"]);
    }

    #[test]
    fn ties_preserve_input_order() {
        // Both fall through to the monitor rule at confidence 60.
        let holdings = vec![holding("ZZZ", 1.0, 100.0), holding("AAA", 1.0, 100.0)];
        let prices: HashMap<_, _> = [quote("ZZZ", 60.0), quote("AAA", 60.0)].into();
        let sentiments: HashMap<_, _> = [
            ("ZZZ".to_string(), aggregate("ZZZ", 0.7, 0.1, Trend::Stable)),
            ("AAA".to_string(), aggregate("AAA", 0.7, 0.1, Trend::Stable)),
        ]
        .into();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
        let recs = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        assert!(recs.iter().all(|r| r.confidence == 60.0));
        let symbols: Vec<_> = recs.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ZZZ", "AAA"]);
    }

    #[test]
    fn cascade_is_deterministic_with_supplied_sentiment() {
        let holdings = vec![holding("AAPL", 10.0, 175.43), holding("TSLA", 3.0, 200.0)];
        let prices: HashMap<_, _> = [quote("AAPL", 170.0), quote("TSLA", 222.92)].into();
        let sentiments: HashMap<_, _> = [
            (
                "AAPL".to_string(),
                aggregate("AAPL", 0.82, 0.08, Trend::Improving),
            ),
            (
                "TSLA".to_string(),
                aggregate("TSLA", 0.1, 0.78, Trend::Stable),
            ),
        ]
        .into();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
        let first = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        let second = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn priority_buckets_follow_confidence() {
        let t = thresholds();
        assert_eq!(Priority::from_confidence(85.0, &t), Priority::High);
        assert_eq!(Priority::from_confidence(80.0, &t), Priority::Medium);
        assert_eq!(Priority::from_confidence(70.0, &t), Priority::Medium);
        assert_eq!(Priority::from_confidence(65.0, &t), Priority::Low);
        assert_eq!(Priority::from_confidence(60.0, &t), Priority::Low);
    }

    #[test]
    fn zero_purchase_price_does_not_panic() {
        let h = holding("BAD", 1.0, 0.0);
        let metrics =
            compute_portfolio_metrics(std::slice::from_ref(&h), &HashMap::new(), &HashMap::new());
        let recs = recommend(
            std::slice::from_ref(&h),
            &HashMap::new(),
            &HashMap::new(),
            &metrics,
            &thresholds(),
        );
        assert_eq!(recs.len(), 1);
        assert!(recs[0].profit_loss_percent.is_finite());
    }

    #[test]
    fn recommendation_serializes_with_wire_casing() {
        let holdings = vec![holding("AAPL", 10.0, 100.0)];
        let prices: HashMap<_, _> = [quote("AAPL", 110.0)].into();
        let sentiments = HashMap::new();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
        let recs = recommend(&holdings, &prices, &sentiments, &metrics, &thresholds());
        let v = serde_json::to_value(&recs[0]).unwrap();
        assert!(v.get("portfolioWeight").is_some());
        assert!(v.get("profitLossPercent").is_some());
        assert!(v.get("currentPrice").is_some());
        assert_eq!(v["action"], "HOLD");
        assert_eq!(v["priority"], "MEDIUM");
    }
}
