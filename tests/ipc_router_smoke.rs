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

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.gbbackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let before = request(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.list",
        json!({ "courseId": "c", "unit": 1 }),
    );
    assert_eq!(before["error"]["code"], json!("no_workspace"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(&mut stdin, &mut reader, "4", "courses.create", json!({ "name": "Smoke" }));
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "lastName": "Smoke", "firstName": "Test" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let methods = [
        ("courses.list", json!({})),
        ("students.list", json!({})),
        ("evaluations.list", json!({ "courseId": course_id, "unit": 1 })),
        (
            "legacy.scores.record",
            json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 12 }),
        ),
        (
            "legacy.scores.update",
            json!({ "studentId": student_id, "courseId": course_id, "unit": 1, "score": 13 }),
        ),
        ("legacy.scores.list", json!({ "courseId": course_id })),
        ("averages.list", json!({ "courseId": course_id, "unit": 1 })),
        (
            "averages.get",
            json!({ "studentId": student_id, "courseId": course_id, "unit": 1 }),
        ),
        ("averages.courseStats", json!({ "courseId": course_id })),
        ("averages.recalculate", json!({ "courseId": course_id, "unit": 1 })),
        (
            "grades.byStudent",
            json!({ "studentId": student_id, "courseId": course_id, "unit": 1 }),
        ),
        ("setup.get", json!({})),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in methods.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("m{}", i), method, params.clone());
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }

    let setup = request_ok(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    assert_eq!(setup["grading"]["passThreshold"], json!(11.0));
    assert_eq!(setup["grading"]["legacyLiteralPolicy"], json!("ad18"));
    assert_eq!(setup["grading"]["bulkMaxItems"], json!(5000));

    let bad_setup = request(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "grading", "patch": { "passThreshold": 25 } }),
    );
    assert_eq!(bad_setup["error"]["code"], json!("bad_params"));
    let unknown_section = request(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "printer", "patch": {} }),
    );
    assert_eq!(unknown_section["error"]["code"], json!("bad_params"));

    let missing_id = request(&mut stdin, &mut reader, "9", "grades.record", json!({ "score": 10 }));
    assert_eq!(missing_id["error"]["code"], json!("bad_params"));

    let unknown = request(&mut stdin, &mut reader, "10", "grades.explode", json!({}));
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    // Malformed lines get an error line and the loop keeps going.
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse bad_json response");
    assert_eq!(bad["error"]["code"], json!("bad_json"));
    let _ = request_ok(&mut stdin, &mut reader, "11", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_env_var_selects_workspace_at_startup() {
    let workspace = temp_dir("gradebook-env-workspace");
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env("GRADEBOOKD_WORKSPACE", &workspace)
        .env("GRADEBOOKD_LOG", "debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health["workspacePath"],
        json!(workspace.to_string_lossy().to_string())
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "name": "Env" }));
    assert!(workspace.join("gradebook.sqlite3").is_file());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn backup_methods_restore_bundles_and_survive_bad_input() {
    let workspace = temp_dir("gradebook-backup-ipc");
    let restored = temp_dir("gradebook-backup-ipc-restored");
    let bundle = workspace.join("out").join("ws.gbbackup.zip");
    let broken = workspace.join("broken.zip");
    std::fs::write(&broken, b"PK\x03\x04not really a zip").expect("write broken bundle");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "name": "Kept" }));

    let no_out = request(&mut stdin, &mut reader, "3", "backup.exportWorkspaceBundle", json!({}));
    assert_eq!(no_out["error"]["code"], json!("bad_params"));

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["entryCount"], json!(3));
    assert_eq!(export["dbSha256"].as_str().map(str::len), Some(64));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importWorkspaceBundle",
        json!({ "inPath": broken.to_string_lossy() }),
    );
    assert_eq!(rejected["error"]["code"], json!("io_failed"));
    let courses = request_ok(&mut stdin, &mut reader, "6", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(Vec::len), Some(1));

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspaceBundle",
        json!({ "inPath": workspace.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": restored.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], json!("gradebook-workspace-v1"));
    assert_eq!(
        imported["workspacePath"],
        json!(restored.to_string_lossy().to_string())
    );
    let courses = request_ok(&mut stdin, &mut reader, "9", "courses.list", json!({}));
    assert_eq!(courses["courses"][0]["name"], json!("Kept"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
}
