use crate::domain::sentiment::SentimentScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest quotes for a set of symbols, as served by the market-data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBatchResponse {
    pub as_of: DateTime<Utc>,
    pub quotes: Vec<QuoteItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteItem {
    pub symbol: String,
    pub price: f64,
}

/// A batch of externally-scored documents from the sentiment feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFeedResponse {
    pub items: Vec<ScoredDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredDocument {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub source_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub scores: SentimentScores,
}
