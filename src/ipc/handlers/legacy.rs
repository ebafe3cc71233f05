//! Old single-score-per-period methods. Field names on the wire follow the
//! legacy clients (`nota`, `estudiante_id`, ...).

use crate::ipc::error::{failure, success};
use crate::ipc::helpers::{
    db_conn, grading_settings, mutation_data, optional_period_param, optional_str,
    period_param, required_str, score_param,
};
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period = match period_param(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let score = match score_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match legacy::record_score_legacy(conn, &student_id, &course_id, period, score) {
        Ok(outcome) => {
            let mut data = mutation_data(&outcome.mutation);
            data["evaluation_id"] = json!(outcome.evaluation_id);
            data["created_evaluation"] = json!(outcome.created_evaluation);
            let status = if outcome.mutation.created { 201 } else { 200 };
            success(&req.id, status, "Score recorded", data)
        }
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period = match period_param(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let score = match score_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match legacy::update_score_legacy(conn, &student_id, &course_id, period, score) {
        Ok(outcome) => success(&req.id, 200, "Score updated", mutation_data(&outcome)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period = match optional_period_param(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let settings = match grading_settings(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let student_id = optional_str(req, "studentId");

    match legacy::legacy_scores(
        conn,
        &course_id,
        period,
        student_id.as_deref(),
        settings.legacy_literal_policy,
    ) {
        Ok(rows) => success(&req.id, 200, "Scores listed", json!(rows)),
        Err(e) => failure(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "legacy.scores.record" => Some(handle_record(state, req)),
        "legacy.scores.update" => Some(handle_update(state, req)),
        "legacy.scores.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
