use crate::domain::sentiment::{SentimentRecord, SentimentScores};
use crate::ingest::types::ScoredDocument;
use anyhow::Context;
use chrono::{DateTime, Utc};

/// Newest-first window of scored documents for one symbol, read in a single
/// consistent scan.
pub async fn fetch_recent_records(
    pool: &sqlx::PgPool,
    symbol: &str,
    limit: usize,
) -> anyhow::Result<Vec<SentimentRecord>> {
    let rows = sqlx::query_as::<_, (String, DateTime<Utc>, String, f64, f64, f64)>(
        "SELECT symbol, ts, source, positive, negative, neutral \
         FROM sentiment_records \
         WHERE symbol = $1 \
         ORDER BY ts DESC \
         LIMIT $2",
    )
    .bind(symbol)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .context("select sentiment_records failed")?;

    Ok(rows
        .into_iter()
        .map(|(symbol, timestamp, source, positive, negative, neutral)| SentimentRecord {
            symbol,
            timestamp,
            source,
            scores: SentimentScores {
                positive,
                negative,
                neutral,
            },
        })
        .collect())
}

/// Batched, idempotent insert: a document already stored for the same
/// (symbol, source, source_id) is skipped. Returns the number of new rows.
pub async fn insert_scored_documents(
    pool: &sqlx::PgPool,
    documents: &[ScoredDocument],
) -> anyhow::Result<u64> {
    anyhow::ensure!(!documents.is_empty(), "documents must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let chunk_size: usize = std::env::var("SENTIMENT_INSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(200);
    anyhow::ensure!(chunk_size >= 1, "SENTIMENT_INSERT_BATCH must be >= 1");

    let mut inserted: u64 = 0;
    for chunk in documents.chunks(chunk_size) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO sentiment_records \
             (id, symbol, ts, source, source_id, title, positive, negative, neutral) ",
        );
        qb.push_values(chunk, |mut b, doc| {
            b.push_bind(uuid::Uuid::new_v4())
                .push_bind(doc.symbol.trim())
                .push_bind(doc.timestamp)
                .push_bind(doc.source.trim())
                .push_bind(doc.source_id.trim())
                .push_bind(&doc.title)
                .push_bind(doc.scores.positive)
                .push_bind(doc.scores.negative)
                .push_bind(doc.scores.neutral);
        });
        qb.push(" ON CONFLICT (symbol, source, source_id) DO NOTHING");

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch insert sentiment_records failed")?;
        inserted += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(inserted)
}
