use crate::averages;
use crate::ipc::error::{failure, success};
use crate::ipc::helpers::{
    db_conn, flag, grading_settings, optional_period_param, period_param, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // No row simply means no scores yet; data is null.
    match averages::get_average(conn, &student_id, &course_id, period) {
        Ok(average) => success(&req.id, 200, "Average loaded", json!(average)),
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

    match averages::list_period_averages(conn, &course_id, period, flag(req, "ranked")) {
        Ok(rows) => success(&req.id, 200, "Averages listed", json!(rows)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_course_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match averages::course_stats(conn, &course_id, period, settings.pass_threshold) {
        Ok(stats) => success(&req.id, 200, "Course statistics", json!(stats)),
        Err(e) => failure(&req.id, &e),
    }
}

fn handle_recalculate(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match averages::recalculate_all(conn, &course_id, period) {
        Ok(processed) => success(
            &req.id,
            200,
            "Averages recalculated",
            json!({ "processed": processed }),
        ),
        Err(e) => failure(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "averages.get" => Some(handle_get(state, req)),
        "averages.list" => Some(handle_list(state, req)),
        "averages.courseStats" => Some(handle_course_stats(state, req)),
        "averages.recalculate" => Some(handle_recalculate(state, req)),
        _ => None,
    }
}
