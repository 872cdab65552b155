//! HTTP surface of the quote assistant.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use quote_flow::FlowRunner;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    collaborators::{Collaborators, ExtractionOutcome},
    profile::{FieldError, LineOfBusiness, Profile},
    rating::{Quote, RatingError, rate_profile},
    state::StateSummary,
    tasks::{session_keys, types::load_state},
    workflow::GRAPH_ID,
};

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub runner: FlowRunner,
    pub collaborators: Collaborators,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Structured form fields merged into the profile before routing
    #[serde(default)]
    pub profile: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub agent_state: StateSummary,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub media_type: String,
    /// Base64 encoded document
    pub data: String,
}

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    fields: Vec<FieldError>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        error!(error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if !self.fields.is_empty() {
            body["fields"] = json!(self.fields);
        }
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/reset", post(reset_session))
        .route("/api/session/{id}", get(get_session))
        .route("/api/quote/auto", post(quote_auto))
        .route("/api/quote/home", post(quote_home))
        .route("/api/analyze-quote", post(analyze_quote))
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Tag each request with a correlation id and run it inside a span carrying it
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(CORRELATION_HEADER, value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = state
        .runner
        .storage()
        .count()
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "status": "healthy",
        "llm": state.collaborators.model.name(),
        "orchestration": GRAPH_ID,
        "sessions": sessions,
        "timestamp": Utc::now(),
    })))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim().to_string();
    if message.is_empty() && request.profile.is_none() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(
        session_id = %session_id,
        message_length = message.len(),
        has_profile = request.profile.is_some(),
        "Processing chat message"
    );

    let profile = request.profile;
    let (result, session) = state
        .runner
        .run_turn(&session_id, move |session| {
            session.context.set_sync(session_keys::USER_INPUT, message);
            if let Some(profile) = profile {
                session
                    .context
                    .set_sync(session_keys::PROFILE_UPDATE, Value::Object(profile));
            }
        })
        .await
        .map_err(ApiError::internal)?;

    let conversation = load_state(&session.context).await;
    info!(
        session_id = %session_id,
        status = ?result.status,
        route = %conversation.route,
        "Chat turn completed"
    );

    Ok(Json(ChatResponse {
        response: result.response.unwrap_or_default(),
        agent_state: conversation.summary(session.context.chat_message_count()),
        session_id,
    }))
}

async fn reset_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    state
        .runner
        .reset(&query.session_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "Session reset successfully" })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StateSummary>, ApiError> {
    let session = state
        .runner
        .snapshot(&session_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Session not found"))?;

    let conversation = load_state(&session.context).await;
    Ok(Json(conversation.summary(session.context.chat_message_count())))
}

fn quote_from_form(line: LineOfBusiness, form: &Map<String, Value>) -> Result<Quote, ApiError> {
    let mut profile = Profile::default();
    profile.apply_update(form).map_err(|e| ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        message: "Invalid profile fields".to_string(),
        fields: e.field_errors().to_vec(),
    })?;

    rate_profile(line, &profile).map_err(|e| {
        let RatingError::MissingFields { fields, .. } = &e;
        ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: e.to_string(),
            fields: fields
                .iter()
                .map(|field| FieldError {
                    field: field.to_string(),
                    reason: "is required".to_string(),
                })
                .collect(),
        }
    })
}

async fn quote_auto(Json(form): Json<Map<String, Value>>) -> Result<Json<Quote>, ApiError> {
    quote_from_form(LineOfBusiness::Auto, &form).map(Json)
}

async fn quote_home(Json(form): Json<Map<String, Value>>) -> Result<Json<Quote>, ApiError> {
    quote_from_form(LineOfBusiness::Home, &form).map(Json)
}

async fn analyze_quote(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ExtractionOutcome>, (StatusCode, Json<ExtractionOutcome>)> {
    let bytes = STANDARD.decode(request.data.trim()).map_err(|e| {
        warn!(error = %e, "Rejected document upload");
        (
            StatusCode::BAD_REQUEST,
            Json(ExtractionOutcome::failed(
                e.to_string(),
                "The uploaded document is not valid base64 data.",
            )),
        )
    })?;

    let media_type = request.media_type.trim().to_ascii_lowercase();
    Ok(Json(
        state
            .collaborators
            .extract_document(&bytes, &media_type)
            .await,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::{
            OfflineModel,
            testing::{ScriptedModel, collaborators},
        },
        workflow::build_runner,
    };
    use axum::body::{Body, to_bytes};
    use quote_flow::InMemorySessionStorage;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_with(collaborators: Collaborators) -> Router {
        app_with_history(collaborators, 50)
    }

    fn app_with_history(collaborators: Collaborators, max_chat_messages: usize) -> Router {
        let runner = build_runner(
            collaborators.clone(),
            Arc::new(InMemorySessionStorage::new()),
            max_chat_messages,
        );
        router(AppState {
            runner,
            collaborators,
        })
    }

    fn app() -> Router {
        app_with(collaborators(Arc::new(OfflineModel)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_model_and_sessions() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["llm"], "offline");
        assert_eq!(body["orchestration"], GRAPH_ID);
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn chat_creates_session_and_returns_state() {
        let app = app_with(collaborators(Arc::new(ScriptedModel::text(&[
            "Great, what year is your car?",
        ]))));

        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({ "message": "I want auto insurance" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Great, what year is your car?");
        assert_eq!(body["agent_state"]["insurance_type"], "auto");
        assert_eq!(body["agent_state"]["has_quote"], false);
        assert_eq!(body["agent_state"]["message_count"], 2);
        assert_eq!(body["agent_state"]["route"], "gather_more");
        assert!(Uuid::parse_str(body["session_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn chat_with_complete_form_quotes_and_reset_clears() {
        let app = app();
        let (_, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({
                "message": "quote my car",
                "session_id": "abc",
                "profile": { "age": 28, "vehicle_year": 2020, "years_licensed": 10 }
            })),
        )
        .await;
        assert_eq!(body["agent_state"]["has_quote"], true);
        assert_eq!(body["agent_state"]["quote"]["monthly_premium"], 125.0);

        let (status, summary) = send(&app, "GET", "/api/session/abc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["profile"]["age"], 28);

        let (status, _) = send(&app, "POST", "/api/reset?session_id=abc", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/api/session/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({ "message": "hello", "session_id": "abc" })),
        )
        .await;
        assert_eq!(body["agent_state"]["has_quote"], false);
        assert_eq!(body["agent_state"]["profile"], json!({}));
    }

    #[tokio::test]
    async fn message_count_keeps_growing_past_the_history_bound() {
        let app = app_with_history(collaborators(Arc::new(OfflineModel)), 4);
        let hello = json!({ "message": "hello", "session_id": "long" });
        for turn in 1..=3 {
            let (_, body) = send(&app, "POST", "/api/chat", Some(hello.clone())).await;
            assert_eq!(body["agent_state"]["message_count"], turn * 2);
        }

        let (_, summary) = send(&app, "GET", "/api/session/long", None).await;
        assert_eq!(summary["message_count"], 6);
    }

    #[tokio::test]
    async fn empty_chat_message_is_rejected() {
        let (status, body) = send(&app(), "POST", "/api/chat", Some(json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "message must not be empty");
    }

    #[tokio::test]
    async fn direct_home_quote() {
        let (status, body) = send(
            &app(),
            "POST",
            "/api/quote/home",
            Some(json!({
                "year_built": "2015",
                "square_footage": 2000,
                "construction_type": "Frame",
                "dwelling_coverage": "$300,000"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["annual_premium"], 1700.0);
        assert_eq!(body["monthly_premium"], 141.67);
        assert_eq!(body["coverage"]["kind"], "home");
    }

    #[tokio::test]
    async fn direct_quote_reports_field_errors() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/quote/auto",
            Some(json!({ "age": 0, "vehicle_year": 2020, "years_licensed": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"][0]["field"], "age");

        let (status, body) = send(&app, "POST", "/api/quote/auto", Some(json!({ "age": 30 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn analyze_rejects_unsupported_and_invalid_uploads() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/analyze-quote",
            Some(json!({ "media_type": "text/plain", "data": STANDARD.encode("policy") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Unsupported file type");

        let (status, body) = send(
            &app,
            "POST",
            "/api/analyze-quote",
            Some(json!({ "media_type": "image/png", "data": "%%%" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn correlation_id_is_echoed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(CORRELATION_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[CORRELATION_HEADER], "req-42");
    }
}
