use crate::calc::fmt_2dp;
use crate::error::GradeError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Engine-operation envelope: `ok` follows the status class.
pub fn reply(id: &str, status: u16, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": (200..300).contains(&status),
        "status": status,
        "result": result,
    })
}

pub fn success(
    id: &str,
    status: u16,
    message: &str,
    data: serde_json::Value,
) -> serde_json::Value {
    reply(
        id,
        status,
        json!({
            "success": true,
            "message": message,
            "data": data,
        }),
    )
}

pub fn failure(id: &str, e: &GradeError) -> serde_json::Value {
    let mut result = json!({
        "success": false,
        "message": e.to_string(),
    });
    match e {
        GradeError::Validation { field, message } => {
            result["errors"] = json!({ (*field): [message] });
        }
        GradeError::Capacity { available, .. } => {
            result["available_weight"] = json!(fmt_2dp(*available));
        }
        GradeError::DuplicateInBatch {
            evaluation_id,
            student_id,
        } => {
            result["duplicate"] = json!({
                "evaluation_id": evaluation_id,
                "estudiante_id": student_id,
            });
        }
        GradeError::Db(inner) => {
            tracing::error!(error = %inner, "storage failure");
        }
        GradeError::NotFound(_) => {}
    }
    if !matches!(e, GradeError::Db(_)) {
        tracing::debug!(code = e.code(), status = e.status(), message = %e, "operation rejected");
    }
    reply(id, e.status(), result)
}
