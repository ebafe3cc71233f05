use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn status(value: &serde_json::Value) -> u64 {
    value.get("status").and_then(|v| v.as_u64()).unwrap_or(0)
}

#[test]
fn legacy_scores_share_one_singleton_per_period() {
    let workspace = temp_dir("gradebook-legacy-shim");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "name": "Art" }));
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "lastName": "Flores", "firstName": "Nina" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let early_update = request(
        &mut stdin,
        &mut reader,
        "4",
        "legacy.scores.update",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 12 }),
    );
    assert_eq!(status(&early_update), 404);
    let listing = request(
        &mut stdin,
        &mut reader,
        "5",
        "evaluations.list",
        json!({ "courseId": course_id, "unit": 1 }),
    );
    assert_eq!(listing["result"]["data"]["evaluations"], json!([]));

    let first = request(
        &mut stdin,
        &mut reader,
        "6",
        "legacy.scores.record",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 13 }),
    );
    assert_eq!(status(&first), 201);
    assert_eq!(first["result"]["data"]["created_evaluation"], json!(true));
    let singleton = first["result"]["data"]["evaluation_id"].clone();

    let second = request(
        &mut stdin,
        &mut reader,
        "7",
        "legacy.scores.record",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 17.5 }),
    );
    assert_eq!(status(&second), 200);
    assert_eq!(second["result"]["data"]["created_evaluation"], json!(false));
    assert_eq!(second["result"]["data"]["evaluation_id"], singleton);
    assert_eq!(second["result"]["data"]["average"]["average"], json!("17.50"));

    let listing = request(
        &mut stdin,
        &mut reader,
        "8",
        "evaluations.list",
        json!({ "courseId": course_id, "unit": 1 }),
    );
    let evaluations = listing["result"]["data"]["evaluations"]
        .as_array()
        .expect("evaluations");
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0]["name"], json!("Period 1"));
    assert_eq!(evaluations[0]["kind"], json!("legacy"));
    assert!(evaluations[0]["weight"].is_null());
    assert_eq!(evaluations[0]["entry_count"], json!(1));

    let rows = request(
        &mut stdin,
        &mut reader,
        "9",
        "legacy.scores.list",
        json!({ "courseId": course_id }),
    );
    let rows = rows["result"]["data"].as_array().expect("rows").clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["estudiante_id"], json!(student_id));
    assert_eq!(rows[0]["curso_id"], json!(course_id));
    assert_eq!(rows[0]["unidad"], json!(1));
    assert!(rows[0]["mes"].is_null());
    assert_eq!(rows[0]["nota"], json!("17.50"));
    assert_eq!(rows[0]["nota_literal"], json!("A"));
    assert_eq!(rows[0]["total_notas"], json!(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "setup.update",
        json!({ "section": "grading", "patch": { "legacyLiteralPolicy": "ad17" } }),
    );
    let rows = request(
        &mut stdin,
        &mut reader,
        "11",
        "legacy.scores.list",
        json!({ "courseId": course_id, "unit": 1, "studentId": student_id }),
    );
    assert_eq!(rows["result"]["data"][0]["nota_literal"], json!("AD"));

    let updated = request(
        &mut stdin,
        &mut reader,
        "12",
        "legacy.scores.update",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 9 }),
    );
    assert_eq!(status(&updated), 200);
    assert_eq!(updated["result"]["data"]["average"]["literal"], json!("C"));

    let unscored = request_ok(
        &mut stdin,
        &mut reader,
        "12b",
        "students.create",
        json!({ "lastName": "Quispe", "firstName": "Ana" }),
    );
    let unscored_id = unscored["studentId"].as_str().expect("studentId").to_string();
    let no_entry = request(
        &mut stdin,
        &mut reader,
        "12c",
        "legacy.scores.update",
        json!({ "studentId": unscored_id, "courseId": course_id, "unit": 1, "score": 15 }),
    );
    assert_eq!(status(&no_entry), 404);
    let listing = request(
        &mut stdin,
        &mut reader,
        "12d",
        "evaluations.list",
        json!({ "courseId": course_id, "unit": 1 }),
    );
    assert_eq!(
        listing["result"]["data"]["evaluations"][0]["entry_count"],
        json!(1)
    );

    let monthly = request(
        &mut stdin,
        &mut reader,
        "13",
        "legacy.scores.record",
        json!({ "studentId": student_id, "courseId": course_id, "month": 6, "score": 14 }),
    );
    assert_eq!(status(&monthly), 201);
    let listing = request(
        &mut stdin,
        &mut reader,
        "14",
        "evaluations.list",
        json!({ "courseId": course_id, "month": 6 }),
    );
    assert_eq!(
        listing["result"]["data"]["evaluations"][0]["name"],
        json!("Period M6")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_scores_never_write_into_an_ordinary_evaluation() {
    let workspace = temp_dir("gradebook-legacy-name-clash");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "name": "Civics" }));
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "lastName": "Vargas", "firstName": "Elena" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let exam = request(
        &mut stdin,
        &mut reader,
        "4",
        "evaluations.create",
        json!({ "courseId": course_id, "unit": 2, "name": "Period 2", "kind": "exam", "weight": 40 }),
    );
    assert_eq!(status(&exam), 201);

    let record = request(
        &mut stdin,
        &mut reader,
        "5",
        "legacy.scores.record",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 2, "score": 15 }),
    );
    assert_eq!(status(&record), 422);
    assert!(record["result"]["errors"]["name"].is_array());

    let update = request(
        &mut stdin,
        &mut reader,
        "6",
        "legacy.scores.update",
        json!({ "studentId": student_id, "courseId": course_id, "unit": 2, "score": 15 }),
    );
    assert_eq!(status(&update), 422);

    let listing = request(
        &mut stdin,
        &mut reader,
        "7",
        "evaluations.list",
        json!({ "courseId": course_id, "unit": 2 }),
    );
    let evaluations = listing["result"]["data"]["evaluations"]
        .as_array()
        .expect("evaluations");
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0]["kind"], json!("exam"));
    assert_eq!(evaluations[0]["weight"], json!("40.00"));
    assert_eq!(evaluations[0]["entry_count"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
