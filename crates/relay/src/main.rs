mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod notify;
mod presence;
mod rooms;
mod store;
mod validation;
mod ws;

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
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    api::{feedback::FeedbackApiState, notifications::NotificationsApiState},
    auth::jwt::JwtAccessTokenService,
    config::RelayConfig,
    error::REQUEST_ID_HEADER,
    notify::NotificationAggregator,
    presence::{spawn_typing_sweeper, TypingTracker},
    rooms::RoomRouter,
    store::{AlertStore, FeedbackStore, ReportDirectory},
    validation::MAX_REST_BODY_BYTES,
    ws::WsRouterState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set CIVICA_RELAY_JWT_SECRET in production");
    }
    let jwt_service =
        Arc::new(JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?);

    let (reports, feedback, alerts) = build_stores(config.database_url.as_deref()).await?;
    let rooms = RoomRouter::default();
    let typing = TypingTracker::default();
    spawn_typing_sweeper(typing.clone(), rooms.clone());

    let app = build_router(
        WsRouterState {
            jwt: Arc::clone(&jwt_service),
            rooms: rooms.clone(),
            typing,
            reports: reports.clone(),
            feedback: feedback.clone(),
        },
        FeedbackApiState { feedback: feedback.clone(), reports: reports.clone(), rooms },
        NotificationsApiState {
            aggregator: NotificationAggregator::new(feedback, reports.clone(), alerts.clone()),
            reports,
            alerts,
        },
        jwt_service,
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

async fn build_stores(
    database_url: Option<&str>,
) -> anyhow::Result<(ReportDirectory, FeedbackStore, AlertStore)> {
    match database_url {
        Some(url) => {
            let pool = db::pool::create_pg_pool(url, db::pool::PoolConfig::from_env()).await?;
            db::migrations::run_migrations(&pool).await?;
            db::pool::check_pool_health(&pool).await?;
            info!("using postgres-backed stores");
            Ok((
                ReportDirectory::Postgres(pool.clone()),
                FeedbackStore::Postgres(pool.clone()),
                AlertStore::Postgres(pool),
            ))
        }
        None => {
            warn!("CIVICA_RELAY_DATABASE_URL not set; using in-memory stores (development only)");
            Ok((ReportDirectory::memory(), FeedbackStore::memory(), AlertStore::memory()))
        }
    }
}

fn build_router(
    ws_state: WsRouterState,
    feedback_state: FeedbackApiState,
    notifications_state: NotificationsApiState,
    jwt_service: Arc<JwtAccessTokenService>,
) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(ws_state))
            .merge(api::feedback::router(feedback_state, Arc::clone(&jwt_service)))
            .merge(api::notifications::router(notifications_state, jwt_service)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
        .layer(cors::cors_layer())
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
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
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        error::with_request_id_scope(request_id.clone(), next.run(request)).await;

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
