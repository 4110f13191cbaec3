use crate::config::ProxyConfig;
use crate::error::Result;
use crate::logging::{AccessEntry, AccessLog};
use crate::relay::Relay;
use crate::router::{TargetResolver, USAGE_TEXT};

use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub resolver: TargetResolver,
    pub relay: Relay,
    pub access_log: Option<AccessLog>,
}

impl AppState {
    /// `config` is expected to have passed `ProxyConfig::validate`.
    pub fn new(config: ProxyConfig, access_log: Option<AccessLog>) -> Result<Self> {
        let relay = Relay::new(&config.upstream)?;
        let resolver = TargetResolver::from_config(&config);
        Ok(Self {
            config,
            resolver,
            relay,
            access_log,
        })
    }

    fn record(&self, entry: AccessEntry) {
        if let Some(ref log) = self.access_log {
            log.record(entry);
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handle_proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(target) = state.resolver.resolve(request.uri()) else {
        tracing::debug!(%method, %path, "Unrecognized path, answering with usage text");
        state.record(
            AccessEntry::new(request_id, method.as_str(), path, "none")
                .with_status(200, elapsed_ms(started)),
        );
        return usage_response();
    };

    let span = tracing::info_span!("proxy", %request_id, kind = %target.kind);
    let entry = AccessEntry::new(request_id, method.as_str(), path, target.kind.as_str())
        .with_upstream(target.url.as_str());

    match state.relay.forward(request, &target).instrument(span).await {
        Ok(response) => {
            let status = response.status().as_u16();
            tracing::info!(%request_id, %method, upstream = %target.url, status, "Proxied");
            state.record(entry.with_status(status, elapsed_ms(started)));
            response
        }
        Err(e) => {
            tracing::warn!(%request_id, %method, upstream = %target.url, error = %e, "Proxy request failed");
            let status = e.status().as_u16();
            state.record(
                entry
                    .with_status(status, elapsed_ms(started))
                    .with_error(e.to_string()),
            );
            e.into_response()
        }
    }
}

fn usage_response() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        USAGE_TEXT,
    )
        .into_response()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
