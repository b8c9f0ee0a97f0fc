// Feedback endpoints for the relay API.
//
// Routes:
//   GET  /v1/reports/{report_id}/feedback — list messages; marks them read
//   POST /v1/reports/{report_id}/feedback — append a message
//
// The REST log is the source of truth. A successful POST fans the new
// message out to the report's room over WebSocket, excluding every
// connection owned by the author; socket frames are hints, and clients
// reconcile against this endpoint after a reconnect.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use civica_common::{
    protocol::ws::WsMessage,
    types::{Attachment, FeedbackMessage},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtAccessTokenService,
        middleware::{require_bearer_auth, AuthenticatedUser},
    },
    error::{ErrorCode, RelayError},
    rooms::RoomRouter,
    store::{reports::can_access, FeedbackStore, ReportDirectory, StoreError},
    validation::{validate_attachments, validate_feedback_body, ValidatedJson},
};

// ── Public API types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    /// The message text; stored as the feedback body.
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Serialize)]
struct ListFeedbackResponse {
    success: bool,
    data: ListFeedbackData,
}

#[derive(Serialize)]
struct ListFeedbackData {
    feedbacks: Vec<FeedbackMessage>,
}

#[derive(Serialize)]
struct CreateFeedbackResponse {
    success: bool,
    data: CreateFeedbackData,
}

#[derive(Serialize)]
struct CreateFeedbackData {
    feedback: FeedbackMessage,
}

// ── State & error ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FeedbackApiState {
    pub feedback: FeedbackStore,
    pub reports: ReportDirectory,
    pub rooms: RoomRouter,
}

#[derive(Debug)]
enum FeedbackApiError {
    Validation(RelayError),
    Forbidden,
    ReportNotFound,
    Store(StoreError),
}

impl From<StoreError> for FeedbackApiError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl IntoResponse for FeedbackApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(error) => error.into_response(),
            Self::Forbidden => {
                RelayError::new(ErrorCode::AuthForbidden, "caller may not access this report")
                    .into_response()
            }
            Self::ReportNotFound => {
                RelayError::new(ErrorCode::NotFound, "report not found").into_response()
            }
            Self::Store(StoreError::NotFound(message)) => {
                RelayError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::Store(StoreError::Unavailable(error)) => {
                tracing::error!(error = ?error, "feedback store unavailable");
                RelayError::from_code(ErrorCode::PersistenceFailed).into_response()
            }
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────

pub fn router(state: FeedbackApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/reports/{report_id}/feedback", get(list_feedback).post(create_feedback))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_feedback(
    State(state): State<FeedbackApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ListFeedbackResponse>, FeedbackApiError> {
    require_report_access(&state.reports, report_id, &user).await?;

    // Fetching the log doubles as the read receipt: everything in the
    // response is marked read for the caller.
    state.feedback.mark_read(report_id, user.user_id).await?;
    let feedbacks = state.feedback.list(report_id).await?;

    Ok(Json(ListFeedbackResponse { success: true, data: ListFeedbackData { feedbacks } }))
}

async fn create_feedback(
    State(state): State<FeedbackApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(report_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreateFeedbackRequest>,
) -> Result<(StatusCode, Json<CreateFeedbackResponse>), FeedbackApiError> {
    require_report_access(&state.reports, report_id, &user).await?;

    let body = validate_feedback_body(&payload.message).map_err(FeedbackApiError::Validation)?;
    validate_attachments(&payload.attachments).map_err(FeedbackApiError::Validation)?;

    let feedback = state
        .feedback
        .create(
            report_id,
            crate::store::feedback::Sender {
                user_id: user.user_id,
                name: user.name.clone(),
                role: user.role,
            },
            body,
            payload.attachments,
        )
        .await?;

    // Write gate: fan out only after the store accepted the message. The
    // author's own connections are excluded; their client trusts its local
    // echo and the REST response.
    let delivered = state
        .rooms
        .broadcast_to_report_excluding_user(
            report_id,
            WsMessage::NewFeedback { report_id, feedback: feedback.clone() },
            user.user_id,
        )
        .await;
    tracing::debug!(
        report_id = %report_id,
        feedback_id = %feedback.id,
        delivered,
        "feedback stored and broadcast"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateFeedbackResponse { success: true, data: CreateFeedbackData { feedback } }),
    ))
}

async fn require_report_access(
    reports: &ReportDirectory,
    report_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<(), FeedbackApiError> {
    let report = reports.find(report_id).await?.ok_or(FeedbackApiError::ReportNotFound)?;
    if !can_access(&report, user) {
        return Err(FeedbackApiError::Forbidden);
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use civica_common::types::{Department, ReportStatus, ReportView, Role};
    use tower::ServiceExt;

    fn test_jwt_service() -> Arc<JwtAccessTokenService> {
        Arc::new(
            JwtAccessTokenService::new("test-secret-that-is-at-least-32-chars-long!!")
                .expect("jwt service"),
        )
    }

    fn test_state() -> FeedbackApiState {
        FeedbackApiState {
            feedback: FeedbackStore::memory(),
            reports: ReportDirectory::memory(),
            rooms: RoomRouter::default(),
        }
    }

    fn test_app() -> (Router, FeedbackApiState, Arc<JwtAccessTokenService>) {
        let state = test_state();
        let jwt = test_jwt_service();
        let app = router(state.clone(), jwt.clone());
        (app, state, jwt)
    }

    async fn seed_report(state: &FeedbackApiState, owner_id: Uuid) -> Uuid {
        let now = Utc::now();
        let report = ReportView {
            id: Uuid::new_v4(),
            title: "Pothole on Main St".into(),
            owner_id,
            department: Department::RoadService,
            status: ReportStatus::Open,
            status_changed_at: now,
            created_at: now,
        };
        state.reports.upsert(report.clone()).await.unwrap();
        report.id
    }

    fn citizen_token(jwt: &JwtAccessTokenService, user_id: Uuid, name: &str) -> String {
        jwt.issue_access_token(user_id, name, Role::Citizen, None)
            .expect("token should be issued")
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::from(serde_json::to_vec(&body).expect("request json body")))
            .expect("request should build")
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request should build")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&bytes).expect("response body should be valid json")
    }

    #[tokio::test]
    async fn post_then_get_round_trips_a_message() {
        let (app, state, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let report_id = seed_report(&state, owner_id).await;
        let token = citizen_token(&jwt, owner_id, "Ada Citizen");

        let create_response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/reports/{report_id}/feedback"),
                serde_json::json!({ "message": "The pothole is getting worse" }),
                &token,
            ))
            .await
            .expect("create request should return response");
        assert_eq!(create_response.status(), StatusCode::CREATED);
        let create_body = body_json(create_response).await;
        assert_eq!(create_body["success"], true);
        assert_eq!(create_body["data"]["feedback"]["body"], "The pothole is getting worse");
        assert_eq!(create_body["data"]["feedback"]["sender_name"], "Ada Citizen");

        let list_response = app
            .oneshot(get_request(&format!("/v1/reports/{report_id}/feedback"), &token))
            .await
            .expect("list request should return response");
        assert_eq!(list_response.status(), StatusCode::OK);
        let list_body = body_json(list_response).await;
        assert_eq!(list_body["data"]["feedbacks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_marks_messages_read_for_the_caller() {
        let (app, state, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let report_id = seed_report(&state, owner_id).await;

        // A department admin writes first.
        state
            .feedback
            .create(
                report_id,
                crate::store::feedback::Sender {
                    user_id: Uuid::new_v4(),
                    name: "Roads Admin".into(),
                    role: Role::Admin,
                },
                "crew dispatched".into(),
                Vec::new(),
            )
            .await
            .unwrap();
        assert_eq!(state.feedback.unread_count(report_id, owner_id).await.unwrap(), 1);

        let token = citizen_token(&jwt, owner_id, "Ada Citizen");
        let response = app
            .oneshot(get_request(&format!("/v1/reports/{report_id}/feedback"), &token))
            .await
            .expect("list request should return response");
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(state.feedback.unread_count(report_id, owner_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn post_broadcasts_to_room_excluding_author() {
        let (app, state, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let report_id = seed_report(&state, owner_id).await;
        let token = citizen_token(&jwt, owner_id, "Ada Citizen");

        // Author and one admin are both in the room.
        let (author_sender, mut author_receiver) = tokio::sync::mpsc::unbounded_channel();
        let author_connection = state
            .rooms
            .register(owner_id, "Ada Citizen".into(), Role::Citizen, None, author_sender)
            .await;
        state.rooms.join(author_connection, report_id).await.unwrap();

        let (admin_sender, mut admin_receiver) = tokio::sync::mpsc::unbounded_channel();
        let admin_connection = state
            .rooms
            .register(
                Uuid::new_v4(),
                "Roads Admin".into(),
                Role::Admin,
                Some(Department::RoadService),
                admin_sender,
            )
            .await;
        state.rooms.join(admin_connection, report_id).await.unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/v1/reports/{report_id}/feedback"),
                serde_json::json!({ "message": "still broken" }),
                &token,
            ))
            .await
            .expect("create request should return response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let frame = admin_receiver.try_recv().expect("admin should receive a frame");
        match frame {
            WsMessage::NewFeedback { report_id: frame_report, feedback } => {
                assert_eq!(frame_report, report_id);
                assert_eq!(feedback.body, "still broken");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(author_receiver.try_recv().is_err(), "author must not receive their own echo");
    }

    #[tokio::test]
    async fn stranger_cannot_access_report_feedback() {
        let (app, state, jwt) = test_app();
        let report_id = seed_report(&state, Uuid::new_v4()).await;
        let token = citizen_token(&jwt, Uuid::new_v4(), "Nosy Neighbor");

        let response = app
            .oneshot(get_request(&format!("/v1/reports/{report_id}/feedback"), &token))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn department_admin_of_other_department_is_forbidden() {
        let (app, state, jwt) = test_app();
        let report_id = seed_report(&state, Uuid::new_v4()).await;
        let token = jwt
            .issue_access_token(
                Uuid::new_v4(),
                "Water Admin",
                Role::Admin,
                Some(Department::WaterManagement),
            )
            .unwrap();

        let response = app
            .oneshot(get_request(&format!("/v1/reports/{report_id}/feedback"), &token))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_report_returns_404() {
        let (app, _state, jwt) = test_app();
        let token = citizen_token(&jwt, Uuid::new_v4(), "Ada");

        let response = app
            .oneshot(get_request(&format!("/v1/reports/{}/feedback", Uuid::new_v4()), &token))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (app, state, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let report_id = seed_report(&state, owner_id).await;
        let token = citizen_token(&jwt, owner_id, "Ada");

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/v1/reports/{report_id}/feedback"),
                serde_json::json!({ "message": "   " }),
                &token,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn too_many_attachments_are_rejected() {
        let (app, state, jwt) = test_app();
        let owner_id = Uuid::new_v4();
        let report_id = seed_report(&state, owner_id).await;
        let token = citizen_token(&jwt, owner_id, "Ada");

        let attachments: Vec<serde_json::Value> = (0..4)
            .map(|i| {
                serde_json::json!({
                    "id": format!("att-{i}"),
                    "url": format!("https://cdn.civica.city/{i}.png"),
                    "kind": "image"
                })
            })
            .collect();

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/v1/reports/{report_id}/feedback"),
                serde_json::json!({ "message": "photos attached", "attachments": attachments }),
                &token,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let (app, state, _jwt) = test_app();
        let report_id = seed_report(&state, Uuid::new_v4()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/v1/reports/{report_id}/feedback"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
