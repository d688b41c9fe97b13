use anyhow::Context;

/// Upper bound on symbols per ingest run; the feed rejects oversized batches.
const MAX_SYMBOLS_PER_RUN: usize = 200;

/// Normalizes a comma-separated symbol list: trimmed, uppercased, de-duplicated
/// preserving first occurrence.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let symbol = part.trim().to_uppercase();
        if symbol.is_empty() || out.contains(&symbol) {
            continue;
        }
        out.push(symbol);
    }
    out
}

/// Symbol universe for one ingest run: an explicit list when given, otherwise
/// every symbol currently held in any portfolio.
pub async fn resolve_symbols(
    pool: Option<&sqlx::PgPool>,
    explicit: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let symbols = match explicit {
        Some(raw) => parse_symbol_list(raw),
        None => {
            let pool = pool.context("no --symbols given and no database available")?;
            sentifolio_core::storage::portfolio::fetch_held_symbols(pool).await?
        }
    };

    anyhow::ensure!(!symbols.is_empty(), "symbol universe is empty; nothing to ingest");
    anyhow::ensure!(
        symbols.len() <= MAX_SYMBOLS_PER_RUN,
        "symbol universe too large: {} (max {MAX_SYMBOLS_PER_RUN})",
        symbols.len()
    );

    Ok(symbols)
}
