//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use espelho_core::domain::{Eligibility, SombraProgress, SombraResponse};
use espelho_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        initialize_progress_handler,
        eligibility_handler,
        next_question_handler,
        record_response_handler,
        history_handler,
    ),
    components(
        schemas(
            ProgressDto,
            EligibilityDto,
            NextQuestionDto,
            RecordResponseRequest,
            ResponseDto
        )
    ),
    tags(
        (name = "ESPELHO 365 Sombra API", description = "Eligibility, question selection, and response recording for the Sombra journaling module.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A user's Sombra enrollment progress. `current_phase` is recomputed from
/// `start_date` on every read.
#[derive(Serialize, ToSchema)]
pub struct ProgressDto {
    user_id: Uuid,
    start_date: DateTime<Utc>,
    last_question_date: Option<DateTime<Utc>>,
    questions_answered_count: u32,
    current_phase: String,
}

impl From<SombraProgress> for ProgressDto {
    fn from(p: SombraProgress) -> Self {
        Self {
            user_id: p.user_id,
            start_date: p.start_date,
            last_question_date: p.last_question_date,
            questions_answered_count: p.questions_answered_count,
            current_phase: p.current_phase.as_str().to_string(),
        }
    }
}

/// Whether the user may answer right now, with diagnostic counts.
#[derive(Serialize, ToSchema)]
pub struct EligibilityDto {
    can_answer: bool,
    questions_available_today: u32,
    questions_answered_this_week: u32,
    questions_per_week: u32,
    next_question_date: Option<DateTime<Utc>>,
}

impl From<Eligibility> for EligibilityDto {
    fn from(e: Eligibility) -> Self {
        Self {
            can_answer: e.can_answer,
            questions_available_today: e.questions_available_today,
            questions_answered_this_week: e.answered_this_week,
            questions_per_week: e.questions_per_week,
            next_question_date: e.next_question_at,
        }
    }
}

/// The next question to present, or `null` when the user is not enrolled.
#[derive(Serialize, ToSchema)]
pub struct NextQuestionDto {
    question: Option<String>,
}

/// The payload for recording an answered question.
#[derive(Deserialize, ToSchema)]
pub struct RecordResponseRequest {
    question_text: String,
    user_answer: String,
}

/// One stored response with its generated commentary.
#[derive(Serialize, ToSchema)]
pub struct ResponseDto {
    id: Uuid,
    question_text: String,
    user_answer: String,
    ai_response: String,
    masters_cited: Vec<String>,
    created_at: DateTime<Utc>,
    week_number: u32,
}

impl From<SombraResponse> for ResponseDto {
    fn from(r: SombraResponse) -> Self {
        Self {
            id: r.id,
            question_text: r.question_text,
            user_answer: r.user_answer,
            ai_response: r.ai_response,
            masters_cited: r.masters_cited,
            created_at: r.created_at,
            week_number: r.week_number,
        }
    }
}

#[derive(Deserialize)]
pub struct HistoryParams {
    limit: Option<u32>,
}

//=========================================================================================
// Shared Handler Helpers
//=========================================================================================

/// Extracts and parses the `x-user-id` header identifying the caller.
/// Real authentication lives with the external identity provider; this
/// service trusts the gateway-supplied header.
fn require_user_id(headers: &HeaderMap) -> Result<Uuid, (StatusCode, String)> {
    let user_id_str = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "x-user-id header is required".to_string(),
            )
        })?;

    Uuid::parse_str(user_id_str).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "Invalid x-user-id format".to_string(),
        )
    })
}

/// Maps a core port error onto an HTTP status and message.
fn port_error_response(err: PortError) -> (StatusCode, String) {
    let status = match &err {
        PortError::NotInitialized(_) | PortError::Conflict(_) => StatusCode::CONFLICT,
        PortError::NotEligible(_) => StatusCode::TOO_MANY_REQUESTS,
        PortError::GenerationUnavailable(_) => StatusCode::BAD_GATEWAY,
        PortError::Store(_) | PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Unhandled port error: {err}");
    }
    (status, err.to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Enroll the user into the Sombra module.
///
/// Idempotent: re-enrolling returns the existing progress record untouched.
#[utoipa::path(
    post,
    path = "/sombra/progress",
    responses(
        (status = 201, description = "Progress record created or already present", body = ProgressDto),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn initialize_progress_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let progress = app_state
        .engine
        .initialize_progress(user_id, Utc::now())
        .await
        .map_err(port_error_response)?;

    Ok((StatusCode::CREATED, Json(ProgressDto::from(progress))))
}

/// Check whether the user may answer a question right now.
///
/// An unenrolled user gets an ineligible result with zero counts, not an
/// error.
#[utoipa::path(
    get,
    path = "/sombra/eligibility",
    responses(
        (status = 200, description = "Current eligibility", body = EligibilityDto),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn eligibility_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let eligibility = app_state
        .engine
        .check_eligibility(user_id, Utc::now())
        .await
        .map_err(port_error_response)?;

    Ok(Json(EligibilityDto::from(eligibility)))
}

/// Fetch the next question to present to the user.
///
/// Selection is deterministic: the first bank question never answered, or
/// the bank head once every question has been used.
#[utoipa::path(
    get,
    path = "/sombra/next-question",
    responses(
        (status = 200, description = "The next question, or null when not enrolled", body = NextQuestionDto),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn next_question_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let question = app_state
        .engine
        .next_question(user_id)
        .await
        .map_err(port_error_response)?;

    Ok(Json(NextQuestionDto { question }))
}

/// Record an answered question.
///
/// Generates the masters' commentary, then durably appends the response and
/// advances the progress record in one atomic step. A generation failure
/// leaves no record behind, so the client can simply retry.
#[utoipa::path(
    post,
    path = "/sombra/responses",
    request_body = RecordResponseRequest,
    responses(
        (status = 201, description = "Response recorded", body = ResponseDto),
        (status = 400, description = "Missing header or malformed body"),
        (status = 409, description = "Progress not initialized, or a concurrent submission won"),
        (status = 429, description = "Daily or weekly quota exhausted"),
        (status = 502, description = "Commentary generation unavailable"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn record_response_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RecordResponseRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    if payload.user_answer.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "user_answer must not be empty".to_string(),
        ));
    }

    let response = app_state
        .engine
        .record_answer(
            user_id,
            &payload.question_text,
            &payload.user_answer,
            Utc::now(),
        )
        .await
        .map_err(port_error_response)?;

    Ok((StatusCode::CREATED, Json(ResponseDto::from(response))))
}

/// Fetch the user's most recent responses, newest first.
#[utoipa::path(
    get,
    path = "/sombra/responses",
    responses(
        (status = 200, description = "Recent responses, newest first", body = [ResponseDto]),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user."),
        ("limit" = Option<u32>, Query, description = "Maximum number of responses to return (default 10).")
    )
)]
pub async fn history_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    let limit = params.limit.unwrap_or(10);

    let history = app_state
        .engine
        .history(user_id, limit)
        .await
        .map_err(port_error_response)?;

    let dtos: Vec<ResponseDto> = history.into_iter().map(ResponseDto::from).collect();
    Ok(Json(dtos))
}
