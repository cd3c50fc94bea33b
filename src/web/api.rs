use crate::config::types::ReportFormat;
use crate::report::ReportSummary;
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::source::CallEdge;
use crate::task::{EngineError, ReportFilter, Run, RunStatus, TaskEngine};
use crate::window::{parse_instant, WindowSpec};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: TaskEngine,
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: Option<String>,
    pub source: String,
    pub call_chain: Vec<CallEdge>,
    pub sinks: Vec<String>,
    pub default_window: WindowSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    pub minutes_ago: Option<u32>,
    pub hours_ago: Option<u32>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl RunQuery {
    fn window(&self) -> Result<Option<WindowSpec>, ApiError> {
        let spec = WindowSpec {
            since: parse_opt_instant(self.since.as_deref())?,
            until: parse_opt_instant(self.until.as_deref())?,
            minutes_ago: self.minutes_ago,
            hours_ago: self.hours_ago,
        };
        Ok((!spec.is_empty()).then_some(spec))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub task_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportsQuery {
    pub task: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<usize>,
}

const DEFAULT_REPORT_LIMIT: usize = 50;
const MAX_REPORT_LIMIT: usize = 500;

fn parse_opt_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_instant(v).map_err(|e| ApiError::BadRequest(e.to_string())))
        .transpose()
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskInfo>> {
    let tasks = state
        .engine
        .tasks()
        .map(|task| TaskInfo {
            name: task.name().to_string(),
            description: task.description().map(str::to_string),
            source: task.source().label().to_string(),
            call_chain: task.source().call_chain().to_vec(),
            sinks: task.sink_names(),
            default_window: task.default_window().clone(),
        })
        .collect();
    Json(tasks)
}

/// POST /api/tasks/:name/run?minutes_ago=&hours_ago=&since=&until=
pub async fn trigger_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let run = state.engine.trigger(&name, query.window()?)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            run_id: run.id,
            status: run.status,
            task_name: run.task_name,
        }),
    ))
}

/// GET /api/runs
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<Run>> {
    Json(state.engine.list_runs())
}

/// GET /api/runs/:id
pub async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Run>, ApiError> {
    state
        .engine
        .run_status(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {} not found", id)))
}

/// GET /api/runs/:id/report?format=json|markdown
///
/// The JSON body is the canonical serialization, byte for byte what the
/// sinks persist.
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        None | Some("json") => ReportFormat::Json,
        Some("markdown") | Some("md") => ReportFormat::Markdown,
        Some(other) => return Err(ApiError::BadRequest(format!("unknown format '{}'", other))),
    };
    let report = state
        .engine
        .report(id)
        .ok_or_else(|| ApiError::NotFound(format!("no report for run {}", id)))?;

    let response = match format {
        ReportFormat::Json => {
            let bytes = report
                .to_json_bytes()
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        ReportFormat::Markdown => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            report.render_markdown(),
        )
            .into_response(),
    };
    Ok(response)
}

/// GET /api/reports?task=&start_time=&end_time=&limit=
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<Vec<ReportSummary>>, ApiError> {
    let filter = ReportFilter {
        task: query.task.filter(|t| !t.is_empty()),
        start: parse_opt_instant(query.start_time.as_deref())?,
        end: parse_opt_instant(query.end_time.as_deref())?,
        limit: Some(query.limit.unwrap_or(DEFAULT_REPORT_LIMIT).clamp(1, MAX_REPORT_LIMIT)),
    };
    Ok(Json(state.engine.list_reports(&filter)))
}

/// GET /api/scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UnknownTask(_) => ApiError::NotFound(e.to_string()),
            EngineError::Conflict(_) => ApiError::Conflict(e.to_string()),
            EngineError::InvalidWindow(_) => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
