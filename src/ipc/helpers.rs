use crate::config::GradingSettings;
use crate::entries::MutationOutcome;
use crate::error::GradeError;
use crate::ipc::error::{err, failure};
use crate::ipc::types::{AppState, Request};
use crate::period::Period;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Required id-like string param; blank counts as missing.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    optional_str(req, key)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_path(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    required_str(req, key).map(PathBuf::from)
}

/// Explicit `workspacePath`, falling back to the selected workspace.
pub fn workspace_path(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    optional_str(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn flag(req: &Request, key: &str) -> bool {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Numeric score param. A missing or non-numeric value is a validation
/// failure on `score`, not a transport error.
pub fn score_param(req: &Request) -> Result<f64, serde_json::Value> {
    req.params
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            failure(
                &req.id,
                &GradeError::validation("score", "score must be a number"),
            )
        })
}

pub fn period_param(req: &Request) -> Result<Period, serde_json::Value> {
    Period::from_params(&req.params).map_err(|e| failure(&req.id, &e))
}

/// Period filter for read paths; absent `unit` and `month` mean "all".
pub fn optional_period_param(req: &Request) -> Result<Option<Period>, serde_json::Value> {
    let set = |k: &str| req.params.get(k).map(|v| !v.is_null()).unwrap_or(false);
    if !set("unit") && !set("month") {
        return Ok(None);
    }
    period_param(req).map(Some)
}

/// Data block shared by every single-entry mutation response.
pub fn mutation_data(outcome: &MutationOutcome) -> serde_json::Value {
    json!({
        "entry": outcome.entry,
        "created": outcome.created,
        "student_id": outcome.scope.student_id,
        "course_id": outcome.scope.course_id,
        "period": outcome.scope.period.to_json(),
        "average": outcome.average,
    })
}

pub fn grading_settings(conn: &Connection, req: &Request) -> Result<GradingSettings, serde_json::Value> {
    GradingSettings::load(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}
