use anyhow::Context;
use clap::Parser;
use sentifolio_core::ingest::provider::{FeedClient, HttpJsonFeedClient};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod symbols;

#[derive(Debug, Parser)]
#[command(name = "sentifolio_worker")]
struct Args {
    /// Comma-separated symbols to ingest. Defaults to the symbols currently
    /// held in any portfolio.
    #[arg(long)]
    symbols: Option<String>,

    /// Scored documents to request from the sentiment feed per run.
    #[arg(long, default_value_t = 200)]
    document_limit: usize,

    /// Fetch from the feed but skip all database writes.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sentifolio_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let feed = HttpJsonFeedClient::from_settings(&settings)?;

    if args.dry_run {
        let symbols = symbols::resolve_symbols(None, args.symbols.as_deref())
            .await
            .context("dry-run requires --symbols")?;

        let (quotes, _) = feed.fetch_quotes(&symbols).await?;
        let (documents, _) = feed.fetch_scored_documents(&symbols, args.document_limit).await?;

        tracing::info!(
            dry_run = true,
            feed = feed.feed_name(),
            symbols_len = symbols.len(),
            quotes_len = quotes.quotes.len(),
            documents_len = documents.items.len(),
            "feed ingest (dry-run)"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    sentifolio_core::storage::migrate(&pool).await?;

    let symbols = symbols::resolve_symbols(Some(&pool), args.symbols.as_deref()).await?;

    let run_date = chrono::Utc::now().date_naive();
    let acquired =
        sentifolio_core::storage::lock::try_acquire_ingest_lock(&pool, run_date).await?;
    if !acquired {
        tracing::warn!(%run_date, "ingest lock not acquired; another run in progress");
        return Ok(());
    }

    match feed.fetch_quotes(&symbols).await {
        Ok((quotes, _raw)) => {
            if quotes.quotes.is_empty() {
                tracing::warn!(%run_date, "feed returned no quotes");
            } else {
                let affected = sentifolio_core::storage::portfolio::upsert_prices(
                    &pool,
                    &quotes.quotes,
                    quotes.as_of,
                )
                .await?;
                tracing::info!(%run_date, affected, "upserted stock prices");
            }
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%run_date, error = %err, "quote ingest failed");
        }
    }

    match feed.fetch_scored_documents(&symbols, args.document_limit).await {
        Ok((documents, _raw)) => {
            if documents.items.is_empty() {
                tracing::warn!(%run_date, "feed returned no scored documents");
            } else {
                let inserted = sentifolio_core::storage::sentiment::insert_scored_documents(
                    &pool,
                    &documents.items,
                )
                .await?;
                tracing::info!(
                    %run_date,
                    fetched = documents.items.len(),
                    inserted,
                    "stored scored documents"
                );
            }
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%run_date, error = %err, "sentiment ingest failed");
        }
    }

    let _ = sentifolio_core::storage::lock::release_ingest_lock(&pool, run_date).await;
    Ok(())
}

fn init_sentry(settings: &sentifolio_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
