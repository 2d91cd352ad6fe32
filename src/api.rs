//! Read-only HTTP diagnostics surface: a `GET /status` JSON dump of the
//! link/channel/cache counters the core already tracks, modeled on the
//! reference's own controller service. Issues no commands; has no bearing
//! on protocol correctness.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::config::Config;
use crate::server::SharedStats;

#[cfg(feature = "prometheus")]
use crate::server::LiveStats;

#[derive(Clone)]
struct ApiState {
    stats: SharedStats,
    allow_origin: HeaderValue,
}

async fn status(State(state): State<ApiState>) -> Response {
    let body = serde_json::to_string(&*state.stats.read()).unwrap_or_else(|_| "{}".to_string());
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert("content-type", HeaderValue::from_static("application/json"));
    response.headers_mut().insert("access-control-allow-origin", state.allow_origin.clone());
    response
}

#[cfg(feature = "prometheus")]
async fn metrics(State(state): State<ApiState>) -> Response {
    let snapshot: LiveStats = state.stats.read().clone();
    let registry = prometheus::Registry::new();

    let links = prometheus::Gauge::new("ircd_links", "currently registered links").unwrap();
    links.set(snapshot.links as f64);
    registry.register(Box::new(links.clone())).ok();

    let channels = prometheus::Gauge::new("ircd_channels", "currently active channels").unwrap();
    channels.set(snapshot.channels as f64);
    registry.register(Box::new(channels.clone())).ok();

    let cache_entries = prometheus::Gauge::new("ircd_resolver_cache_entries", "resolver cache size").unwrap();
    cache_entries.set(snapshot.cache_entries as f64);
    registry.register(Box::new(cache_entries.clone())).ok();

    let encoder = prometheus::TextEncoder::new();
    let body = encoder.encode_to_string(&registry.gather()).unwrap_or_default();
    (StatusCode::OK, body).into_response()
}

/// Binds and serves the status endpoint until the process exits; callers
/// spawn this alongside the main server loop.
pub async fn start(config: &Config, stats: SharedStats) -> anyhow::Result<()> {
    let allow_origin = HeaderValue::from_str(&config.controller.allow_origin).unwrap_or(HeaderValue::from_static("*"));
    let state = ApiState { stats, allow_origin };

    let router = Router::new().route("/status", get(status));
    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(metrics));
    let router = router.with_state(state);

    log::info!("diagnostics http endpoint listening: addr={}", config.controller.listen);
    let listener = tokio::net::TcpListener::bind(config.controller.listen).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
