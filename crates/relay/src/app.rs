// HTTP application assembly: routes, middleware, and backend selection.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::AccessTokenService;
use crate::broadcast::BroadcastRouter;
use crate::config::RelayConfig;
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, PoolConfig},
};
use crate::presence::PresenceTracker;
use crate::store::WorkflowStore;
use crate::ws::{self, CollabRouterState};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the relay application from configuration, selecting PostgreSQL or
/// in-process backends based on whether a database URL is configured.
pub async fn build_app_from_config(config: &RelayConfig) -> anyhow::Result<Router> {
    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set RUNBOOK_RELAY_JWT_SECRET in production");
    }
    let jwt_service =
        Arc::new(AccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?);

    let (store, presence) = match &config.database_url {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize relay PostgreSQL pool")?;
            check_pool_health(&pool).await.context("relay PostgreSQL health check failed")?;
            run_migrations(&pool).await?;
            info!("relay backends: PostgreSQL");
            (WorkflowStore::Postgres(pool.clone()), PresenceTracker::Postgres(pool))
        }
        None => {
            info!("relay backends: in-process");
            (WorkflowStore::in_memory(), PresenceTracker::in_memory())
        }
    };

    Ok(build_router(jwt_service, store, presence, BroadcastRouter::default()))
}

pub fn build_router(
    jwt_service: Arc<AccessTokenService>,
    store: WorkflowStore,
    presence: PresenceTracker,
    router: BroadcastRouter,
) -> Router {
    let state = CollabRouterState { jwt_service, store, presence, router };
    apply_middleware(Router::new().route("/healthz", get(healthz)).merge(ws::router(state)))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
