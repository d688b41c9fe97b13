use crate::config::Settings;
use crate::ingest::types::{QuoteBatchResponse, QuoteItem, ScoredDocument, ScoredFeedResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_QUOTES_PATH: &str = "/v1/quotes";
const DEFAULT_DOCUMENTS_PATH: &str = "/v1/scored_documents";

/// Feed score triples must sum to ~1; the scorer occasionally loses a little
/// mass to rounding.
const SCORE_SUM_TOLERANCE: f64 = 0.05;

#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    fn feed_name(&self) -> &'static str;

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<(QuoteBatchResponse, Value)>;

    async fn fetch_scored_documents(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<(ScoredFeedResponse, Value)>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonFeedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    quotes_path: String,
    documents_path: String,
    retries: u32,
}

impl HttpJsonFeedClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_feed_base_url()?.to_string();
        let api_key = settings.feed_api_key.clone();

        let timeout_secs = std::env::var("FEED_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("FEED_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let quotes_path = std::env::var("FEED_QUOTES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUOTES_PATH.to_string());

        let documents_path = std::env::var("FEED_DOCUMENTS_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOCUMENTS_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build feed http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            quotes_path,
            documents_path,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        let headers = self.headers()?;

        let res = self
            .http
            .get(url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .context("feed request failed")?;

        let status = res.status();
        let text = res.text().await.context("failed to read feed response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("feed response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("feed HTTP {status}: {raw_json}");
        }

        Ok(raw_json)
    }

    async fn fetch_quotes_once(&self, symbols: &[String]) -> Result<(QuoteBatchResponse, Value)> {
        let raw_json = self
            .get_json(&self.quotes_path, &[("symbols", symbols.join(","))])
            .await?;
        let parsed = serde_json::from_value::<QuoteBatchResponse>(raw_json.clone())
            .context("failed to parse feed response into QuoteBatchResponse")?;
        validate_quotes(&parsed)?;
        Ok((parsed, raw_json))
    }

    async fn fetch_documents_once(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<(ScoredFeedResponse, Value)> {
        let raw_json = self
            .get_json(
                &self.documents_path,
                &[
                    ("symbols", symbols.join(",")),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let parsed = serde_json::from_value::<ScoredFeedResponse>(raw_json.clone())
            .context("failed to parse feed response into ScoredFeedResponse")?;
        for doc in &parsed.items {
            validate_document(doc)?;
        }
        Ok((parsed, raw_json))
    }
}

#[async_trait::async_trait]
impl FeedClient for HttpJsonFeedClient {
    fn feed_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<(QuoteBatchResponse, Value)> {
        anyhow::ensure!(!symbols.is_empty(), "symbols must be non-empty");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_quotes_once(symbols).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "quote fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_scored_documents(
        &self,
        symbols: &[String],
        limit: usize,
    ) -> Result<(ScoredFeedResponse, Value)> {
        anyhow::ensure!(!symbols.is_empty(), "symbols must be non-empty");
        anyhow::ensure!(limit >= 1, "limit must be >= 1");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_documents_once(symbols, limit).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "document fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn validate_quotes(resp: &QuoteBatchResponse) -> Result<()> {
    for quote in &resp.quotes {
        validate_quote(quote)?;
    }
    Ok(())
}

fn validate_quote(quote: &QuoteItem) -> Result<()> {
    anyhow::ensure!(!quote.symbol.trim().is_empty(), "symbol must be non-empty");
    anyhow::ensure!(
        quote.price.is_finite() && quote.price > 0.0,
        "price must be > 0 for {} (got {})",
        quote.symbol,
        quote.price
    );
    Ok(())
}

fn validate_document(doc: &ScoredDocument) -> Result<()> {
    anyhow::ensure!(!doc.symbol.trim().is_empty(), "symbol must be non-empty");
    anyhow::ensure!(!doc.source.trim().is_empty(), "source must be non-empty");
    anyhow::ensure!(
        !doc.source_id.trim().is_empty(),
        "sourceId must be non-empty"
    );

    for (name, value) in [
        ("positive", doc.scores.positive),
        ("negative", doc.scores.negative),
        ("neutral", doc.scores.neutral),
    ] {
        anyhow::ensure!(
            (0.0..=1.0).contains(&value),
            "{name} score out of range for {} (got {value})",
            doc.symbol
        );
    }

    let sum = doc.scores.sum();
    anyhow::ensure!(
        (sum - 1.0).abs() <= SCORE_SUM_TOLERANCE,
        "score components must sum to ~1 for {} (got {sum})",
        doc.symbol
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_quote_batch_shape() {
        let v = json!({
            "asOf": "2026-03-02T21:00:00Z",
            "quotes": [
                {"symbol": "AAPL", "price": 182.5},
                {"symbol": "MSFT", "price": 410.0}
            ]
        });

        let parsed: QuoteBatchResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.quotes.len(), 2);
        assert_eq!(parsed.quotes[0].symbol, "AAPL");
        assert!(validate_quotes(&parsed).is_ok());
    }

    #[test]
    fn rejects_non_positive_price() {
        let quote = QuoteItem {
            symbol: "AAPL".to_string(),
            price: 0.0,
        };
        assert!(validate_quote(&quote).is_err());
    }

    #[test]
    fn parses_scored_document_shape() {
        let v = json!({
            "items": [
                {
                    "symbol": "AAPL",
                    "timestamp": "2026-03-02T20:00:00Z",
                    "source": "news",
                    "sourceId": "news-AAPL-1",
                    "title": "Apple Announces Record Quarter",
                    "scores": {"positive": 0.72, "negative": 0.08, "neutral": 0.20}
                }
            ]
        });

        let parsed: ScoredFeedResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert!(validate_document(&parsed.items[0]).is_ok());
    }

    #[test]
    fn title_is_optional() {
        let v = json!({
            "items": [
                {
                    "symbol": "AAPL",
                    "timestamp": "2026-03-02T20:00:00Z",
                    "source": "twitter",
                    "sourceId": "tw-123",
                    "scores": {"positive": 0.3, "negative": 0.4, "neutral": 0.3}
                }
            ]
        });

        let parsed: ScoredFeedResponse = serde_json::from_value(v).unwrap();
        assert!(parsed.items[0].title.is_none());
        assert!(validate_document(&parsed.items[0]).is_ok());
    }

    #[test]
    fn rejects_scores_that_do_not_sum_to_one() {
        let v = json!({
            "items": [
                {
                    "symbol": "AAPL",
                    "timestamp": "2026-03-02T20:00:00Z",
                    "source": "news",
                    "sourceId": "news-AAPL-2",
                    "scores": {"positive": 0.9, "negative": 0.5, "neutral": 0.1}
                }
            ]
        });

        let parsed: ScoredFeedResponse = serde_json::from_value(v).unwrap();
        assert!(validate_document(&parsed.items[0]).is_err());
    }

    #[test]
    fn rejects_out_of_range_component() {
        let v = json!({
            "items": [
                {
                    "symbol": "AAPL",
                    "timestamp": "2026-03-02T20:00:00Z",
                    "source": "news",
                    "sourceId": "news-AAPL-3",
                    "scores": {"positive": 1.2, "negative": -0.2, "neutral": 0.0}
                }
            ]
        });

        let parsed: ScoredFeedResponse = serde_json::from_value(v).unwrap();
        assert!(validate_document(&parsed.items[0]).is_err());
    }
}
