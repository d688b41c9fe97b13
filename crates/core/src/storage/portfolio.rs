use crate::domain::portfolio::{Holding, PriceQuote};
use crate::ingest::types::QuoteItem;
use anyhow::Context;
use chrono::{DateTime, Utc};

pub async fn fetch_holdings(
    pool: &sqlx::PgPool,
    portfolio_id: &str,
) -> anyhow::Result<Vec<Holding>> {
    let rows = sqlx::query_as::<_, (String, f64, f64)>(
        "SELECT symbol, quantity, purchase_price \
         FROM holdings \
         WHERE portfolio_id = $1 \
         ORDER BY created_at ASC, symbol ASC",
    )
    .bind(portfolio_id)
    .fetch_all(pool)
    .await
    .context("select holdings failed")?;

    Ok(rows
        .into_iter()
        .map(|(symbol, quantity, purchase_price)| Holding {
            symbol,
            quantity,
            purchase_price,
        })
        .collect())
}

pub async fn upsert_holding(
    pool: &sqlx::PgPool,
    portfolio_id: &str,
    holding: &Holding,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO holdings (portfolio_id, symbol, quantity, purchase_price) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (portfolio_id, symbol) DO UPDATE \
           SET quantity = EXCLUDED.quantity, purchase_price = EXCLUDED.purchase_price",
    )
    .bind(portfolio_id)
    .bind(&holding.symbol)
    .bind(holding.quantity)
    .bind(holding.purchase_price)
    .execute(pool)
    .await
    .context("upsert holdings failed")?;

    Ok(())
}

/// Returns false when the holding does not exist.
pub async fn update_holding(
    pool: &sqlx::PgPool,
    portfolio_id: &str,
    symbol: &str,
    quantity: f64,
    purchase_price: f64,
) -> anyhow::Result<bool> {
    let res = sqlx::query(
        "UPDATE holdings SET quantity = $3, purchase_price = $4 \
         WHERE portfolio_id = $1 AND symbol = $2",
    )
    .bind(portfolio_id)
    .bind(symbol)
    .bind(quantity)
    .bind(purchase_price)
    .execute(pool)
    .await
    .context("update holdings failed")?;

    Ok(res.rows_affected() > 0)
}

/// Returns false when the holding does not exist.
pub async fn delete_holding(
    pool: &sqlx::PgPool,
    portfolio_id: &str,
    symbol: &str,
) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM holdings WHERE portfolio_id = $1 AND symbol = $2")
        .bind(portfolio_id)
        .bind(symbol)
        .execute(pool)
        .await
        .context("delete holdings failed")?;

    Ok(res.rows_affected() > 0)
}

/// Distinct symbols currently held across all portfolios.
pub async fn fetch_held_symbols(pool: &sqlx::PgPool) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT DISTINCT symbol FROM holdings ORDER BY symbol ASC",
    )
    .fetch_all(pool)
    .await
    .context("select held symbols failed")?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}

pub async fn fetch_price(
    pool: &sqlx::PgPool,
    symbol: &str,
) -> anyhow::Result<Option<PriceQuote>> {
    let row = sqlx::query_as::<_, (String, f64)>(
        "SELECT symbol, price FROM stock_prices WHERE symbol = $1",
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .context("select stock_prices failed")?;

    Ok(row.map(|(symbol, price)| PriceQuote { symbol, price }))
}

pub async fn upsert_prices(
    pool: &sqlx::PgPool,
    quotes: &[QuoteItem],
    as_of: DateTime<Utc>,
) -> anyhow::Result<u64> {
    anyhow::ensure!(!quotes.is_empty(), "quotes must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut qb =
        sqlx::QueryBuilder::new("INSERT INTO stock_prices (symbol, price, updated_at) ");
    qb.push_values(quotes, |mut b, quote| {
        b.push_bind(quote.symbol.trim())
            .push_bind(quote.price)
            .push_bind(as_of);
    });
    qb.push(
        " ON CONFLICT (symbol) DO UPDATE \
           SET price = EXCLUDED.price, updated_at = EXCLUDED.updated_at",
    );

    let res = qb
        .build()
        .persistent(false)
        .execute(&mut *tx)
        .await
        .context("batch upsert stock_prices failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(res.rows_affected())
}
