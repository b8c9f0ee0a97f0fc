// Notification endpoints for the relay API.
//
// Routes:
//   GET  /v1/notifications                          — aggregated feed + total
//   POST /v1/notifications/ack                      — mark status changes seen
//   POST /v1/notifications/alerts/{alert_id}/dismiss
//   POST /v1/alerts                                 — publish a city-wide alert (mayor only)
//
// Each source keeps its own "seen" mechanism: feedback clears through read
// receipts, status changes through the ack watermark, alerts through
// per-user dismissals. There is no shared mark-all-read.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use civica_common::types::{Alert, NotificationItem, NotificationSeverity, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtAccessTokenService,
        middleware::{require_bearer_auth, AuthenticatedUser},
    },
    error::{ErrorCode, RelayError},
    notify::NotificationAggregator,
    store::{AlertStore, ReportDirectory, StoreError},
    validation::ValidatedJson,
};

// ── Public API types ─────────────────────────────────────────────────

#[derive(Serialize)]
struct FeedResponse {
    success: bool,
    data: FeedData,
}

#[derive(Serialize)]
struct FeedData {
    total: u64,
    items: Vec<NotificationItem>,
}

#[derive(Serialize)]
struct AckResponse {
    success: bool,
    data: AckData,
}

#[derive(Serialize)]
struct AckData {
    acked_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct DismissResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub title: String,
    pub message: String,
    pub severity: NotificationSeverity,
}

#[derive(Serialize)]
struct CreateAlertResponse {
    success: bool,
    data: CreateAlertData,
}

#[derive(Serialize)]
struct CreateAlertData {
    alert: Alert,
}

// ── State & error ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct NotificationsApiState {
    pub aggregator: NotificationAggregator,
    pub reports: ReportDirectory,
    pub alerts: AlertStore,
}

#[derive(Debug)]
enum NotificationsApiError {
    Validation(RelayError),
    Forbidden(&'static str),
    Store(StoreError),
}

impl From<StoreError> for NotificationsApiError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl IntoResponse for NotificationsApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(error) => error.into_response(),
            Self::Forbidden(message) => {
                RelayError::new(ErrorCode::AuthForbidden, message).into_response()
            }
            Self::Store(StoreError::NotFound(message)) => {
                RelayError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::Store(StoreError::Unavailable(error)) => {
                tracing::error!(error = ?error, "notification store unavailable");
                RelayError::from_code(ErrorCode::PersistenceFailed).into_response()
            }
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────

pub fn router(state: NotificationsApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/notifications", get(get_feed))
        .route("/v1/notifications/ack", post(ack_status_changes))
        .route("/v1/notifications/alerts/{alert_id}/dismiss", post(dismiss_alert))
        .route("/v1/alerts", post(create_alert))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn get_feed(
    State(state): State<NotificationsApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<FeedResponse>, NotificationsApiError> {
    let feed = state.aggregator.feed(&user).await?;
    Ok(Json(FeedResponse {
        success: true,
        data: FeedData { total: feed.total, items: feed.items },
    }))
}

async fn ack_status_changes(
    State(state): State<NotificationsApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<AckResponse>, NotificationsApiError> {
    let now = Utc::now();
    state.reports.record_ack(user.user_id, now).await?;
    Ok(Json(AckResponse { success: true, data: AckData { acked_at: now } }))
}

async fn dismiss_alert(
    State(state): State<NotificationsApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<DismissResponse>, NotificationsApiError> {
    state.alerts.dismiss(alert_id, user.user_id).await?;
    Ok(Json(DismissResponse { success: true }))
}

async fn create_alert(
    State(state): State<NotificationsApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateAlertRequest>,
) -> Result<(StatusCode, Json<CreateAlertResponse>), NotificationsApiError> {
    if user.role != Role::Mayor {
        return Err(NotificationsApiError::Forbidden("only the mayor may publish alerts"));
    }

    let title = payload.title.trim();
    let message = payload.message.trim();
    if title.is_empty() || message.is_empty() {
        return Err(NotificationsApiError::Validation(RelayError::new(
            ErrorCode::ValidationFailed,
            "alert title and message must be non-empty",
        )));
    }

    let alert = state
        .alerts
        .create(title.to_string(), message.to_string(), payload.severity)
        .await?;
    tracing::info!(alert_id = %alert.id, "city-wide alert published");

    Ok((
        StatusCode::CREATED,
        Json(CreateAlertResponse { success: true, data: CreateAlertData { alert } }),
    ))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use civica_common::types::{Department, ReportStatus, ReportView};
    use tower::ServiceExt;

    use crate::store::FeedbackStore;

    fn test_jwt_service() -> Arc<JwtAccessTokenService> {
        Arc::new(
            JwtAccessTokenService::new("test-secret-that-is-at-least-32-chars-long!!")
                .expect("jwt service"),
        )
    }

    fn test_app() -> (Router, NotificationsApiState, FeedbackStore, Arc<JwtAccessTokenService>) {
        let feedback = FeedbackStore::memory();
        let reports = ReportDirectory::memory();
        let alerts = AlertStore::memory();
        let state = NotificationsApiState {
            aggregator: NotificationAggregator::new(
                feedback.clone(),
                reports.clone(),
                alerts.clone(),
            ),
            reports,
            alerts,
        };
        let jwt = test_jwt_service();
        let app = router(state.clone(), jwt.clone());
        (app, state, feedback, jwt)
    }

    fn token(jwt: &JwtAccessTokenService, user_id: Uuid, role: Role) -> String {
        let department =
            if role == Role::Admin { Some(Department::RoadService) } else { None };
        jwt.issue_access_token(user_id, "Test User", role, department)
            .expect("token should be issued")
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request should build")
    }

    fn post_request(uri: &str, body: Option<serde_json::Value>, token: &str) -> Request<Body> {
        let builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"));
        match body {
            Some(value) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&value).expect("request json body")))
                .expect("request should build"),
            None => builder.body(Body::empty()).expect("request should build"),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&bytes).expect("response body should be valid json")
    }

    #[tokio::test]
    async fn empty_feed_has_zero_total() {
        let (app, _state, _feedback, jwt) = test_app();
        let token = token(&jwt, Uuid::new_v4(), Role::Citizen);

        let response = app
            .oneshot(get_request("/v1/notifications", &token))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["total"], 0);
        assert!(body["data"]["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn feed_surfaces_unread_feedback() {
        let (app, state, feedback, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let now = Utc::now();
        let report = ReportView {
            id: Uuid::new_v4(),
            title: "Broken streetlight".into(),
            owner_id,
            department: Department::RoadService,
            status: ReportStatus::Open,
            status_changed_at: now,
            created_at: now,
        };
        state.reports.upsert(report.clone()).await.unwrap();
        feedback
            .create(
                report.id,
                crate::store::feedback::Sender {
                    user_id: Uuid::new_v4(),
                    name: "Roads Admin".into(),
                    role: Role::Admin,
                },
                "replacement ordered".into(),
                Vec::new(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(get_request("/v1/notifications", &token(&jwt, owner_id, Role::Citizen)))
            .await
            .expect("request should return response");
        let body = body_json(response).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["items"][0]["source"], "feedback");
    }

    #[tokio::test]
    async fn mayor_can_publish_alert_and_citizen_sees_it() {
        let (app, _state, _feedback, jwt) = test_app();
        let mayor = token(&jwt, Uuid::new_v4(), Role::Mayor);

        let response = app
            .clone()
            .oneshot(post_request(
                "/v1/alerts",
                Some(serde_json::json!({
                    "title": "Water outage",
                    "message": "Downtown supply interrupted until noon",
                    "severity": "warning"
                })),
                &mayor,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["data"]["alert"]["severity"], "warning");

        let citizen = token(&jwt, Uuid::new_v4(), Role::Citizen);
        let feed_response = app
            .oneshot(get_request("/v1/notifications", &citizen))
            .await
            .expect("request should return response");
        let feed = body_json(feed_response).await;
        assert_eq!(feed["data"]["items"][0]["source"], "alert");
        assert_eq!(feed["data"]["items"][0]["title"], "Water outage");
    }

    #[tokio::test]
    async fn non_mayor_cannot_publish_alert() {
        let (app, _state, _feedback, jwt) = test_app();
        let admin = token(&jwt, Uuid::new_v4(), Role::Admin);

        let response = app
            .oneshot(post_request(
                "/v1/alerts",
                Some(serde_json::json!({
                    "title": "Nope",
                    "message": "should fail",
                    "severity": "info"
                })),
                &admin,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn dismissed_alert_leaves_the_feed() {
        let (app, state, _feedback, jwt) = test_app();
        let alert = state
            .alerts
            .create("Road closure".into(), "5th avenue closed".into(), NotificationSeverity::Info)
            .await
            .unwrap();
        let user_id = Uuid::new_v4();
        let user = token(&jwt, user_id, Role::Citizen);

        let response = app
            .clone()
            .oneshot(post_request(
                &format!("/v1/notifications/alerts/{}/dismiss", alert.id),
                None,
                &user,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);

        let feed_response = app
            .oneshot(get_request("/v1/notifications", &user))
            .await
            .expect("request should return response");
        let feed = body_json(feed_response).await;
        assert_eq!(feed["data"]["total"], 0);
    }

    #[tokio::test]
    async fn dismissing_unknown_alert_returns_404() {
        let (app, _state, _feedback, jwt) = test_app();
        let user = token(&jwt, Uuid::new_v4(), Role::Citizen);

        let response = app
            .oneshot(post_request(
                &format!("/v1/notifications/alerts/{}/dismiss", Uuid::new_v4()),
                None,
                &user,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ack_clears_status_change_items() {
        let (app, state, _feedback, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let now = Utc::now();
        let report = ReportView {
            id: Uuid::new_v4(),
            title: "Leaking hydrant".into(),
            owner_id,
            department: Department::WaterManagement,
            status: ReportStatus::Resolved,
            status_changed_at: now - chrono::Duration::hours(1),
            created_at: now - chrono::Duration::days(2),
        };
        state.reports.upsert(report).await.unwrap();
        let user = token(&jwt, owner_id, Role::Citizen);

        let before = body_json(
            app.clone()
                .oneshot(get_request("/v1/notifications", &user))
                .await
                .expect("request should return response"),
        )
        .await;
        assert_eq!(before["data"]["items"][0]["source"], "status_change");

        let ack = app
            .clone()
            .oneshot(post_request("/v1/notifications/ack", None, &user))
            .await
            .expect("request should return response");
        assert_eq!(ack.status(), StatusCode::OK);

        let after = body_json(
            app.oneshot(get_request("/v1/notifications", &user))
                .await
                .expect("request should return response"),
        )
        .await;
        assert_eq!(after["data"]["total"], 0);
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let (app, _state, _feedback, _jwt) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/notifications")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
