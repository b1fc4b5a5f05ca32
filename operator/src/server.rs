use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::switch::{error_body, Switch, SwitchError};

const INIT_RATE_LIMIT: u32 = 100;
const DKG_RATE_LIMIT: u32 = 500;
const RATE_WINDOW: Duration = Duration::from_secs(60);

const INIT_LIMIT_BODY: &str = "too many requests to initialize ceremonies";
const DKG_LIMIT_BODY: &str = "too many requests to process dkg rounds";

/// Fixed-window request counter for one endpoint family.
struct RateLimiter {
    max: u32,
    state: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    fn new(max: u32) -> Self {
        Self {
            max,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        if state.0.elapsed() > RATE_WINDOW {
            *state = (Instant::now(), 0);
        }
        state.1 += 1;
        state.1 <= self.max
    }
}

struct AppState {
    switch: Arc<Switch>,
    init_limiter: RateLimiter,
    dkg_limiter: RateLimiter,
}

pub fn router(switch: Arc<Switch>) -> Router {
    let state = Arc::new(AppState {
        switch,
        init_limiter: RateLimiter::new(INIT_RATE_LIMIT),
        dkg_limiter: RateLimiter::new(DKG_RATE_LIMIT),
    });
    Router::new()
        .route("/init", post(handle_init))
        .route("/reshare", post(handle_reshare))
        .route("/dkg", post(handle_dkg))
        .route("/results", post(handle_results))
        .route("/health_check", post(handle_health_check))
        .with_state(state)
}

/// Binds and serves until the process exits.
pub async fn run(switch: Arc<Switch>, addr: SocketAddr) -> Result<(), String> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("unable to bind to {addr}: {e}"))?;
    info!(%addr, "operator server listening");
    axum::serve(listener, router(switch))
        .await
        .map_err(|e| format!("server error: {e}"))
}

fn to_response(result: Result<Vec<u8>, SwitchError>) -> Response {
    match result {
        Ok(bytes) => octet_stream(StatusCode::OK, bytes),
        Err(SwitchError::Ceremony(message)) => {
            warn!(error = %message, "ceremony error");
            octet_stream(StatusCode::OK, error_body(&message))
        }
        Err(SwitchError::Transport(message)) => {
            warn!(error = %message, "transport error");
            (StatusCode::BAD_REQUEST, message).into_response()
        }
    }
}

fn octet_stream(status: StatusCode, bytes: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response()
}

async fn handle_init(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.init_limiter.allow() {
        return (StatusCode::TOO_MANY_REQUESTS, INIT_LIMIT_BODY).into_response();
    }
    to_response(state.switch.init_instance(&body).await)
}

async fn handle_reshare(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.init_limiter.allow() {
        return (StatusCode::TOO_MANY_REQUESTS, INIT_LIMIT_BODY).into_response();
    }
    to_response(state.switch.reshare_instance(&body).await)
}

async fn handle_dkg(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.dkg_limiter.allow() {
        return (StatusCode::TOO_MANY_REQUESTS, DKG_LIMIT_BODY).into_response();
    }
    to_response(state.switch.process_message(&body).await)
}

async fn handle_results(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    to_response(state.switch.store_results(&body))
}

async fn handle_health_check(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    to_response(state.switch.health_check(&body))
}

#[cfg(test)]
mod rate_limiter_tests {
    use super::*;

    #[test]
    fn allows_up_to_the_cap() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
