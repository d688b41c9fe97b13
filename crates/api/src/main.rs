use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentifolio_core::domain::portfolio::{
    compute_portfolio_metrics, current_price, Holding, NewHolding, PortfolioMetrics, PriceQuote,
};
use sentifolio_core::domain::recommendation::{recommend, Recommendation, Thresholds};
use sentifolio_core::domain::sentiment::{
    RandomNoise, SentimentAggregate, SentimentAggregator, SentimentNoise,
};
use sentifolio_core::storage;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        pool,
        aggregator: SentimentAggregator::default(),
        thresholds: Thresholds::default(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/portfolios/:portfolio_id", get(get_portfolio))
        .route("/portfolios/:portfolio_id/holdings", post(add_holding))
        .route(
            "/portfolios/:portfolio_id/holdings/:symbol",
            put(update_holding).delete(delete_holding),
        )
        .route("/sentiment", get(get_sentiment))
        .route(
            "/portfolios/:portfolio_id/recommendations",
            get(get_recommendations).post(post_recommendations),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
    aggregator: SentimentAggregator,
    thresholds: Thresholds,
}

fn internal_error(err: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&err);
    tracing::error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioSummary {
    id: String,
    total_value: f64,
    total_cost: f64,
    total_profit_loss: f64,
    total_profit_loss_percent: f64,
    holdings: Vec<HoldingPosition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldingPosition {
    symbol: String,
    quantity: f64,
    purchase_price: f64,
    current_price: f64,
    value: f64,
}

async fn get_portfolio(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
) -> Result<Json<PortfolioSummary>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let holdings = storage::portfolio::fetch_holdings(pool, &portfolio_id)
        .await
        .map_err(internal_error)?;
    let prices = load_prices(pool, &holdings).await;

    let metrics = compute_portfolio_metrics(&holdings, &prices, &HashMap::new());
    let positions = holdings
        .iter()
        .map(|h| {
            let price = current_price(&prices, h);
            HoldingPosition {
                symbol: h.symbol.clone(),
                quantity: h.quantity,
                purchase_price: h.purchase_price,
                current_price: price,
                value: price * h.quantity,
            }
        })
        .collect();

    Ok(Json(PortfolioSummary {
        id: portfolio_id,
        total_value: metrics.total_value,
        total_cost: metrics.total_cost,
        total_profit_loss: metrics.total_profit_loss,
        total_profit_loss_percent: metrics.total_profit_loss_percent,
        holdings: positions,
    }))
}

async fn add_holding(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
    Json(body): Json<NewHolding>,
) -> Result<(StatusCode, Json<Holding>), StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let holding = body.validate_into_holding().map_err(|err| {
        tracing::warn!(error = %err, "rejected holding payload");
        StatusCode::BAD_REQUEST
    })?;

    storage::portfolio::upsert_holding(pool, &portfolio_id, &holding)
        .await
        .map_err(internal_error)?;

    Ok((StatusCode::CREATED, Json(holding)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateHoldingRequest {
    quantity: f64,
    purchase_price: f64,
}

async fn update_holding(
    State(state): State<AppState>,
    Path((portfolio_id, symbol)): Path<(String, String)>,
    Json(body): Json<UpdateHoldingRequest>,
) -> Result<Json<Holding>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let holding = NewHolding {
        symbol,
        quantity: body.quantity,
        purchase_price: body.purchase_price,
    }
    .validate_into_holding()
    .map_err(|err| {
        tracing::warn!(error = %err, "rejected holding update");
        StatusCode::BAD_REQUEST
    })?;

    let updated = storage::portfolio::update_holding(
        pool,
        &portfolio_id,
        &holding.symbol,
        holding.quantity,
        holding.purchase_price,
    )
    .await
    .map_err(internal_error)?;

    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(holding))
}

async fn delete_holding(
    State(state): State<AppState>,
    Path((portfolio_id, symbol)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let symbol = symbol.trim().to_uppercase();
    let deleted = storage::portfolio::delete_holding(pool, &portfolio_id, &symbol)
        .await
        .map_err(internal_error)?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SentimentQuery {
    symbols: Option<String>,
}

/// Deterministic per-symbol aggregates; no perturbation on this view.
async fn get_sentiment(
    State(state): State<AppState>,
    Query(query): Query<SentimentQuery>,
) -> Result<Json<HashMap<String, SentimentAggregate>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let symbols: Vec<String> = query
        .symbols
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let sentiments = load_sentiments(pool, &state.aggregator, &symbols, None).await;
    Ok(Json(sentiments))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationResponse {
    recommendations: Vec<Recommendation>,
    portfolio_metrics: PortfolioMetrics,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Convenience path: recomputes the sentiment snapshot (with jitter) once and
/// threads it through both the metrics and the engine. The snapshot may drift
/// from a concurrently-fetched /sentiment view; callers that need the two to
/// agree should POST the sentiment they displayed.
async fn get_recommendations(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
) -> Result<Json<RecommendationResponse>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let holdings = storage::portfolio::fetch_holdings(pool, &portfolio_id)
        .await
        .map_err(internal_error)?;
    if holdings.is_empty() {
        return Ok(Json(empty_response()));
    }

    let symbols: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
    let mut noise = RandomNoise;
    let sentiments = load_sentiments(pool, &state.aggregator, &symbols, Some(&mut noise)).await;

    Ok(Json(respond(&state, pool, holdings, sentiments).await))
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    #[serde(default)]
    sentiments: HashMap<String, SentimentAggregate>,
}

/// Authoritative path: the caller supplies the sentiment snapshot it already
/// displayed, and the engine uses exactly that input. Symbols missing from
/// the map fall back to the neutral default.
async fn post_recommendations(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<RecommendationResponse>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let holdings = storage::portfolio::fetch_holdings(pool, &portfolio_id)
        .await
        .map_err(internal_error)?;
    if holdings.is_empty() {
        return Ok(Json(empty_response()));
    }

    Ok(Json(respond(&state, pool, holdings, request.sentiments).await))
}

async fn respond(
    state: &AppState,
    pool: &PgPool,
    holdings: Vec<Holding>,
    sentiments: HashMap<String, SentimentAggregate>,
) -> RecommendationResponse {
    let prices = load_prices(pool, &holdings).await;

    // One snapshot for the whole request: metrics and engine must agree.
    let metrics = compute_portfolio_metrics(&holdings, &prices, &sentiments);
    let recommendations = recommend(&holdings, &prices, &sentiments, &metrics, &state.thresholds);

    RecommendationResponse {
        recommendations,
        portfolio_metrics: metrics,
        timestamp: Utc::now(),
        message: None,
    }
}

fn empty_response() -> RecommendationResponse {
    RecommendationResponse {
        recommendations: Vec::new(),
        portfolio_metrics: PortfolioMetrics::empty(),
        timestamp: Utc::now(),
        message: Some("No holdings in portfolio".to_string()),
    }
}

/// Per-symbol price lookup; a failed or missing lookup degrades to the
/// purchase-price fallback instead of failing the request.
async fn load_prices(pool: &PgPool, holdings: &[Holding]) -> HashMap<String, PriceQuote> {
    let mut prices = HashMap::with_capacity(holdings.len());
    for holding in holdings {
        match storage::portfolio::fetch_price(pool, &holding.symbol).await {
            Ok(Some(quote)) => {
                prices.insert(holding.symbol.clone(), quote);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    symbol = %holding.symbol,
                    error = %err,
                    "price lookup failed; falling back to purchase price"
                );
            }
        }
    }
    prices
}

/// Per-symbol aggregation over the newest-first record window. A failed
/// lookup degrades that symbol to the neutral aggregate.
async fn load_sentiments(
    pool: &PgPool,
    aggregator: &SentimentAggregator,
    symbols: &[String],
    mut noise: Option<&mut (dyn SentimentNoise + Send)>,
) -> HashMap<String, SentimentAggregate> {
    let mut out = HashMap::with_capacity(symbols.len());
    for symbol in symbols {
        let records = match storage::sentiment::fetch_recent_records(
            pool,
            symbol,
            aggregator.config().window,
        )
        .await
        {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    %symbol,
                    error = %err,
                    "sentiment lookup failed; falling back to neutral"
                );
                out.insert(symbol.clone(), SentimentAggregate::neutral(symbol));
                continue;
            }
        };

        let aggregate = match noise.as_mut() {
            Some(noise) => aggregator.aggregate_with(symbol, &records, &mut **noise),
            None => aggregator.aggregate(symbol, &records),
        };
        out.insert(symbol.clone(), aggregate);
    }
    out
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
