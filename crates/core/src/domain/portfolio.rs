use crate::domain::sentiment::{SentimentAggregate, SentimentScores};
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mean share above which the portfolio-wide sentiment leaves "neutral".
const OVERALL_SENTIMENT_THRESHOLD: f64 = 0.5;

/// How many of the largest positions make up the concentration figure.
const CONCENTRATION_TOP_N: usize = 2;

/// One position in a portfolio. Quantity and purchase price are validated at
/// intake ([`NewHolding`]) and treated as immutable for the duration of one
/// computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub purchase_price: f64,
}

/// Unvalidated holding payload as submitted by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHolding {
    pub symbol: String,
    pub quantity: f64,
    pub purchase_price: f64,
}

impl NewHolding {
    pub fn validate_into_holding(self) -> anyhow::Result<Holding> {
        let symbol = self.symbol.trim().to_uppercase();
        ensure!(!symbol.is_empty(), "symbol must be non-empty");
        ensure!(
            self.quantity.is_finite() && self.quantity > 0.0,
            "quantity must be > 0 (got {})",
            self.quantity
        );
        ensure!(
            self.purchase_price.is_finite() && self.purchase_price > 0.0,
            "purchasePrice must be > 0 (got {})",
            self.purchase_price
        );

        Ok(Holding {
            symbol,
            quantity: self.quantity,
            purchase_price: self.purchase_price,
        })
    }
}

/// Latest known price for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallSentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Portfolio-wide totals and risk indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    pub total_value: f64,
    pub total_cost: f64,
    pub total_profit_loss: f64,
    pub total_profit_loss_percent: f64,
    /// Fraction of portfolio value held in the two largest positions.
    pub concentration_risk: f64,
    pub overall_sentiment: OverallSentiment,
    pub avg_sentiment: SentimentScores,
}

impl PortfolioMetrics {
    /// Metrics for a portfolio with no holdings.
    pub fn empty() -> Self {
        Self {
            total_value: 0.0,
            total_cost: 0.0,
            total_profit_loss: 0.0,
            total_profit_loss_percent: 0.0,
            concentration_risk: 0.0,
            overall_sentiment: OverallSentiment::Neutral,
            avg_sentiment: SentimentScores::neutral_default(),
        }
    }
}

/// Price used for a holding in this computation: the latest quote, or the
/// purchase price when the symbol has no quote.
pub fn current_price(prices: &HashMap<String, PriceQuote>, holding: &Holding) -> f64 {
    prices
        .get(&holding.symbol)
        .map(|q| q.price)
        .unwrap_or(holding.purchase_price)
}

/// Computes portfolio metrics from holdings, a price lookup, and a sentiment
/// lookup. Missing quotes fall back to purchase price; missing aggregates to
/// the neutral default. Never fails: zero totals resolve the ratios to 0.
pub fn compute_portfolio_metrics(
    holdings: &[Holding],
    prices: &HashMap<String, PriceQuote>,
    sentiments: &HashMap<String, SentimentAggregate>,
) -> PortfolioMetrics {
    if holdings.is_empty() {
        return PortfolioMetrics::empty();
    }

    let mut total_value = 0.0;
    let mut total_cost = 0.0;
    let mut position_values = Vec::with_capacity(holdings.len());
    let mut sentiment_sum = SentimentScores {
        positive: 0.0,
        negative: 0.0,
        neutral: 0.0,
    };

    for holding in holdings {
        let position_value = current_price(prices, holding) * holding.quantity;
        total_value += position_value;
        total_cost += holding.purchase_price * holding.quantity;
        position_values.push(position_value);

        let scores = sentiments
            .get(&holding.symbol)
            .map(SentimentAggregate::scores)
            .unwrap_or_else(SentimentScores::neutral_default);
        sentiment_sum.positive += scores.positive;
        sentiment_sum.negative += scores.negative;
        sentiment_sum.neutral += scores.neutral;
    }

    position_values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top_value: f64 = position_values.iter().take(CONCENTRATION_TOP_N).sum();
    let concentration_risk = if total_value > 0.0 {
        top_value / total_value
    } else {
        0.0
    };

    let n = holdings.len() as f64;
    let avg_sentiment = SentimentScores {
        positive: sentiment_sum.positive / n,
        negative: sentiment_sum.negative / n,
        neutral: sentiment_sum.neutral / n,
    };
    let overall_sentiment = if avg_sentiment.negative > OVERALL_SENTIMENT_THRESHOLD {
        OverallSentiment::Bearish
    } else if avg_sentiment.positive > OVERALL_SENTIMENT_THRESHOLD {
        OverallSentiment::Bullish
    } else {
        OverallSentiment::Neutral
    };

    let total_profit_loss = total_value - total_cost;
    let total_profit_loss_percent = if total_cost > 0.0 {
        total_profit_loss / total_cost * 100.0
    } else {
        0.0
    };

    PortfolioMetrics {
        total_value,
        total_cost,
        total_profit_loss,
        total_profit_loss_percent,
        concentration_risk,
        overall_sentiment,
        avg_sentiment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sentiment::{SentimentAggregator, SentimentRecord, SentimentScores, Trend};
    use chrono::{Duration, TimeZone, Utc};

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

    fn aggregate_for(symbol: &str, positive: f64, negative: f64) -> SentimentAggregate {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let records: Vec<_> = (0..5)
            .map(|i| SentimentRecord {
                symbol: symbol.to_string(),
                timestamp: base - Duration::hours(i),
                source: "news".to_string(),
                scores: SentimentScores {
                    positive,
                    negative,
                    neutral: 1.0 - positive - negative,
                },
            })
            .collect();
        SentimentAggregator::default().aggregate(symbol, &records)
    }

    #[test]
    fn empty_holdings_yield_zeroed_metrics() {
        let metrics =
            compute_portfolio_metrics(&[], &HashMap::new(), &HashMap::new());
        assert_eq!(metrics.total_value, 0.0);
        assert_eq!(metrics.total_profit_loss_percent, 0.0);
        assert_eq!(metrics.concentration_risk, 0.0);
        assert_eq!(metrics.overall_sentiment, OverallSentiment::Neutral);
    }

    #[test]
    fn totals_and_profit_loss() {
        let holdings = vec![holding("AAPL", 10.0, 100.0), holding("MSFT", 5.0, 200.0)];
        let prices: HashMap<_, _> = [quote("AAPL", 110.0), quote("MSFT", 180.0)].into();
        let metrics = compute_portfolio_metrics(&holdings, &prices, &HashMap::new());

        assert!((metrics.total_value - 2000.0).abs() < 1e-9);
        assert!((metrics.total_cost - 2000.0).abs() < 1e-9);
        assert!(metrics.total_profit_loss.abs() < 1e-9);
        assert!(metrics.total_profit_loss_percent.abs() < 1e-9);
    }

    #[test]
    fn missing_quote_falls_back_to_purchase_price() {
        let holdings = vec![holding("AAPL", 10.0, 150.0)];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert!((metrics.total_value - 1500.0).abs() < 1e-9);
        assert_eq!(metrics.total_profit_loss_percent, 0.0);
    }

    #[test]
    fn concentration_risk_two_equal_positions_is_one() {
        let holdings = vec![holding("AAPL", 1.0, 100.0), holding("MSFT", 1.0, 100.0)];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert_eq!(metrics.concentration_risk, 1.0);
    }

    #[test]
    fn concentration_risk_four_equal_positions_is_half() {
        let holdings = vec![
            holding("AAPL", 1.0, 100.0),
            holding("MSFT", 1.0, 100.0),
            holding("GOOGL", 1.0, 100.0),
            holding("AMZN", 1.0, 100.0),
        ];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert_eq!(metrics.concentration_risk, 0.5);
    }

    #[test]
    fn concentration_risk_uses_largest_positions() {
        let holdings = vec![
            holding("AAPL", 1.0, 700.0),
            holding("MSFT", 1.0, 200.0),
            holding("GOOGL", 1.0, 100.0),
        ];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert!((metrics.concentration_risk - 0.9).abs() < 1e-9);
    }

    #[test]
    fn zero_total_cost_resolves_percent_to_zero() {
        // Degenerate input outside the validated intake path; the guard must
        // still hold.
        let holdings = vec![holding("AAPL", 10.0, 0.0)];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert_eq!(metrics.total_profit_loss_percent, 0.0);
        assert!(metrics.total_profit_loss_percent.is_finite());
    }

    #[test]
    fn overall_sentiment_follows_average() {
        let holdings = vec![holding("AAPL", 1.0, 100.0), holding("MSFT", 1.0, 100.0)];
        let sentiments: HashMap<_, _> = [
            ("AAPL".to_string(), aggregate_for("AAPL", 0.8, 0.1)),
            ("MSFT".to_string(), aggregate_for("MSFT", 0.7, 0.2)),
        ]
        .into();
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &sentiments);
        assert_eq!(metrics.overall_sentiment, OverallSentiment::Bullish);
        assert!((metrics.avg_sentiment.positive - 0.75).abs() < 1e-9);

        let sentiments: HashMap<_, _> = [
            ("AAPL".to_string(), aggregate_for("AAPL", 0.1, 0.8)),
            ("MSFT".to_string(), aggregate_for("MSFT", 0.2, 0.7)),
        ]
        .into();
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &sentiments);
        assert_eq!(metrics.overall_sentiment, OverallSentiment::Bearish);
    }

    #[test]
    fn missing_aggregates_average_to_neutral() {
        let holdings = vec![holding("AAPL", 1.0, 100.0)];
        let metrics = compute_portfolio_metrics(&holdings, &HashMap::new(), &HashMap::new());
        assert_eq!(metrics.overall_sentiment, OverallSentiment::Neutral);
        assert!((metrics.avg_sentiment.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn new_holding_validation() {
        let ok = NewHolding {
            symbol: " aapl ".to_string(),
            quantity: 2.0,
            purchase_price: 150.0,
        }
        .validate_into_holding()
        .unwrap();
        assert_eq!(ok.symbol, "AAPL");

        for (quantity, purchase_price) in [(0.0, 100.0), (-1.0, 100.0), (1.0, 0.0), (1.0, -5.0)] {
            let res = NewHolding {
                symbol: "AAPL".to_string(),
                quantity,
                purchase_price,
            }
            .validate_into_holding();
            assert!(res.is_err(), "expected rejection for qty={quantity} price={purchase_price}");
        }
    }

    #[test]
    fn aggregate_trend_is_stable_for_short_history() {
        let agg = aggregate_for("AAPL", 0.6, 0.2);
        assert_eq!(agg.trend, Trend::Stable);
    }
}
