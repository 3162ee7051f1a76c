//! HTTP API handlers for the survey session.
//!
//! The browser front-end drives one survey session through these endpoints.
//! Every mutating endpoint returns the new [`SurveySnapshot`], so the page can
//! re-render from the response alone.
//!
//! # Endpoints
//!
//! - `GET /health`
//! - `GET /survey` - current snapshot
//! - `POST /survey/duration` - declare the next survey's duration
//! - `POST /survey/start` - start counting
//! - `POST /survey/count` - change a vehicle counter
//! - `POST /survey/finish` - end counting early
//! - `POST /survey/details` - submit observations and request insights
//! - `POST /survey/reset` - abandon the survey
//! - `GET /report`, `GET /report/chart.svg`, `GET /report/history.csv`
//!
//! Free-text remarks are never logged.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::controller::SurveySnapshot;
use crate::error::SurveyError;
use crate::form::DetailsSubmission;
use crate::model::VehicleCategory;
use crate::report::{Report, ReportError};
use crate::session::SurveyHandle;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SurveyHandle,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/survey", get(get_survey))
        .route("/survey/duration", post(post_duration))
        .route("/survey/start", post(post_start))
        .route("/survey/count", post(post_count))
        .route("/survey/finish", post(post_finish))
        .route("/survey/details", post(post_details))
        .route("/survey/reset", post(post_reset))
        .route("/report", get(get_report))
        .route("/report/chart.svg", get(get_report_chart))
        .route("/report/history.csv", get(get_report_history))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Survey(#[from] SurveyError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Survey(SurveyError::Validation(errors)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.to_string(), "fields": errors }),
            ),
            ApiError::Survey(SurveyError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, json!({ "error": self.to_string() }))
            }
            ApiError::Survey(SurveyError::SessionClosed) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": self.to_string() }),
            ),
            ApiError::Report(ReportError::NotReady(_)) => {
                (StatusCode::NOT_FOUND, json!({ "error": self.to_string() }))
            }
            ApiError::Report(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /survey - Current survey snapshot.
pub async fn get_survey(State(state): State<AppState>) -> Json<SurveySnapshot> {
    Json(state.session.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct DurationRequest {
    pub minutes: i64,
}

/// POST /survey/duration - Declare the duration of the next survey.
///
/// Values below one minute are clamped to one.
#[instrument(skip(state))]
pub async fn post_duration(
    State(state): State<AppState>,
    Json(request): Json<DurationRequest>,
) -> ApiResult<Json<SurveySnapshot>> {
    Ok(Json(state.session.set_duration(request.minutes).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub minutes: Option<i64>,
}

/// POST /survey/start - Start counting.
///
/// # Request Body
///
/// Optional. `{ "minutes": 5 }` overrides the declared duration.
#[instrument(skip(state, body))]
pub async fn post_start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> ApiResult<Json<SurveySnapshot>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let snapshot = state.session.start(request.minutes).await?;
    info!(
        duration_minutes = snapshot.duration_minutes,
        "Survey started"
    );
    Ok(Json(snapshot))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountAction {
    Increment,
    Decrement,
    Set,
}

/// Request body for POST /survey/count.
#[derive(Debug, Deserialize)]
pub struct CountRequest {
    pub category: VehicleCategory,
    pub action: CountAction,
    /// Raw input for `set`, as a JSON string or number. Anything but a
    /// non-negative integer counts as 0.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Text form of a `set` value, as typed into a counter field.
fn raw_count(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

/// POST /survey/count - Change a vehicle counter.
///
/// # Request Body
///
/// ```json
/// { "category": "twoWheeler", "action": "increment" }
/// { "category": "heavy", "action": "set", "value": "12" }
/// { "category": "heavy", "action": "set", "value": 12 }
/// ```
pub async fn post_count(
    State(state): State<AppState>,
    Json(request): Json<CountRequest>,
) -> ApiResult<Json<SurveySnapshot>> {
    let session = &state.session;
    let snapshot = match request.action {
        CountAction::Increment => session.increment(request.category).await?,
        CountAction::Decrement => session.decrement(request.category).await?,
        CountAction::Set => {
            session
                .set_count(request.category, &raw_count(request.value.as_ref()))
                .await?
        }
    };
    Ok(Json(snapshot))
}

/// POST /survey/finish - End counting before the timer runs out.
#[instrument(skip(state))]
pub async fn post_finish(State(state): State<AppState>) -> ApiResult<Json<SurveySnapshot>> {
    Ok(Json(state.session.finish_early().await?))
}

/// POST /survey/details - Submit observations.
///
/// Returns `202 Accepted` with the analyzing snapshot; the analysis arrives
/// later and can be polled with `GET /survey`. Invalid fields yield
/// `422 Unprocessable Entity` with one entry per field; the same errors
/// appear as `fieldErrors` in the snapshot.
#[instrument(skip(state, submission))]
pub async fn post_details(
    State(state): State<AppState>,
    Json(submission): Json<DetailsSubmission>,
) -> ApiResult<impl IntoResponse> {
    match state.session.submit(submission).await {
        Ok(snapshot) => {
            info!(
                records = snapshot.history.len(),
                total_vehicles = snapshot.total,
                "Survey details accepted"
            );
            Ok((StatusCode::ACCEPTED, Json(snapshot)))
        }
        Err(e) => {
            warn!(error = %e, "Survey details rejected");
            Err(e.into())
        }
    }
}

/// POST /survey/reset - Abandon the current survey.
#[instrument(skip(state))]
pub async fn post_reset(State(state): State<AppState>) -> ApiResult<Json<SurveySnapshot>> {
    Ok(Json(state.session.reset().await?))
}

fn current_report(state: &AppState) -> ApiResult<Report> {
    let snapshot = state.session.snapshot();
    Ok(Report::from_snapshot(&snapshot, Local::now().date_naive())?)
}

/// GET /report - Markdown report of the latest analysis and all surveys.
pub async fn get_report(State(state): State<AppState>) -> ApiResult<Response> {
    let report = current_report(&state)?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        report.to_markdown(),
    )
        .into_response())
}

/// GET /report/chart.svg - Vehicle distribution chart.
pub async fn get_report_chart(State(state): State<AppState>) -> ApiResult<Response> {
    let report = current_report(&state)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], report.chart_svg()).into_response())
}

/// GET /report/history.csv - All recorded surveys as CSV.
pub async fn get_report_history(State(state): State<AppState>) -> ApiResult<Response> {
    let report = current_report(&state)?;
    let mut body = Vec::new();
    report.write_history_csv(&mut body)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"traffic-history.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}
