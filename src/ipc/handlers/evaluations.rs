use crate::catalog::{self, DeleteOutcome, EvaluationPatch, NewEvaluation};
use crate::error::GradeError;
use crate::ipc::error::{failure, reply, success};
use crate::ipc::helpers::{db_conn, flag, optional_str, period_param, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// `weight` as sent: absent, explicit null, or a number.
fn weight_param(req: &Request) -> Result<Option<Option<f64>>, serde_json::Value> {
    match req.params.get("weight") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(v) => match v.as_f64() {
            Some(w) => Ok(Some(Some(w))),
            None => Err(failure(
                &req.id,
                &GradeError::validation("weight", "weight must be a number or null"),
            )),
        },
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    let weight = match weight_param(req) {
        Ok(w) => w.flatten(),
        Err(resp) => return resp,
    };
    let new = NewEvaluation {
        course_id,
        period,
        name: req
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        kind: optional_str(req, "kind"),
        weight,
    };

    match catalog::create_evaluation(conn, &new) {
        Ok(evaluation) => success(&req.id, 201, "Evaluation created", json!(evaluation)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weight = match weight_param(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let patch = EvaluationPatch {
        name: req
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        kind: req
            .params
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        weight,
    };

    match catalog::update_evaluation(conn, &evaluation_id, &patch) {
        Ok(evaluation) => success(&req.id, 200, "Evaluation updated", json!(evaluation)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match catalog::delete_evaluation(conn, &evaluation_id, flag(req, "force")) {
        Ok(DeleteOutcome::Deleted {
            removed_entries,
            recomputed_students,
        }) => success(
            &req.id,
            200,
            "Evaluation deleted",
            json!({
                "removed_entries": removed_entries,
                "recomputed_students": recomputed_students,
            }),
        ),
        Ok(DeleteOutcome::RequiresConfirmation { total_notas }) => reply(
            &req.id,
            409,
            json!({
                "success": false,
                "message": format!(
                    "evaluation has {} recorded scores; repeat with force to delete them",
                    total_notas
                ),
                "requires_confirmation": true,
                "total_notas": total_notas,
            }),
        ),
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
    let period = match period_param(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match catalog::list_evaluations(conn, &course_id, period) {
        Ok(listing) => success(&req.id, 200, "Evaluations listed", json!(listing)),
        Err(e) => failure(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.create" => Some(handle_create(state, req)),
        "evaluations.update" => Some(handle_update(state, req)),
        "evaluations.delete" => Some(handle_delete(state, req)),
        "evaluations.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
