use crate::entries::{self, BulkItem};
use crate::ipc::error::{err, failure, reply, success};
use crate::ipc::helpers::{
    db_conn, grading_settings, mutation_data, period_param, required_str, score_param,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let score = match score_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match entries::record_score(conn, &evaluation_id, &student_id, score) {
        Ok(outcome) if outcome.created => {
            success(&req.id, 201, "Score recorded", mutation_data(&outcome))
        }
        Ok(outcome) => success(&req.id, 200, "Score replaced", mutation_data(&outcome)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_record_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(raw_items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "items must be an array", None);
    };
    let settings = match grading_settings(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let items: Vec<BulkItem> = raw_items.iter().map(BulkItem::from_json).collect();

    match entries::record_scores_bulk(conn, &items, settings.bulk_max_items) {
        Ok(outcome) => {
            let (status, message) = if outcome.is_complete() {
                (200, "All scores recorded".to_string())
            } else {
                (
                    207,
                    format!(
                        "{} scores recorded, {} rejected",
                        outcome.success_count, outcome.error_count
                    ),
                )
            };
            reply(
                &req.id,
                status,
                json!({
                    "success": outcome.is_complete(),
                    "message": message,
                    "success_count": outcome.success_count,
                    "error_count": outcome.error_count,
                    "errors": outcome.errors,
                }),
            )
        }
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let entry_id = match required_str(req, "entryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let score = match score_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match entries::update_score(conn, &entry_id, score) {
        Ok(outcome) => success(&req.id, 200, "Score updated", mutation_data(&outcome)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let entry_id = match required_str(req, "entryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match entries::delete_score(conn, &entry_id) {
        Ok(outcome) => success(&req.id, 200, "Score deleted", mutation_data(&outcome)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_by_evaluation(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match entries::entries_by_evaluation(conn, &evaluation_id) {
        Ok(rows) => success(&req.id, 200, "Scores listed", json!(rows)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match entries::entries_for_student(conn, &student_id, &course_id, period) {
        Ok(rows) => success(&req.id, 200, "Scores listed", json!(rows)),
        Err(e) => failure(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(handle_record(state, req)),
        "grades.recordBulk" => Some(handle_record_bulk(state, req)),
        "grades.update" => Some(handle_update(state, req)),
        "grades.delete" => Some(handle_delete(state, req)),
        "grades.byEvaluation" => Some(handle_by_evaluation(state, req)),
        "grades.byStudent" => Some(handle_by_student(state, req)),
        _ => None,
    }
}
