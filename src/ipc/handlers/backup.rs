use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_path, workspace_path};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn io_failed(req: &Request, e: anyhow::Error, path: &std::path::Path) -> serde_json::Value {
    err(
        &req.id,
        "io_failed",
        e.to_string(),
        Some(json!({ "path": path.to_string_lossy() })),
    )
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out = match required_path(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let workspace = match workspace_path(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(&workspace, &out) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "ok": true,
                "path": out.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => io_failed(req, e, &out),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let src = match required_path(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target = match workspace_path(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": src.to_string_lossy() })),
        );
    }

    // The open handle must be released before its file is swapped.
    let previous = state.workspace.clone();
    state.db = None;

    let summary = match backup::import_workspace_bundle(&src, &target) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "bundle import rejected");
            if let Some(prev) = previous {
                if let Err(reopen) = state.open_workspace(&prev) {
                    tracing::error!(error = %reopen, "previous workspace could not be reopened");
                }
            }
            return io_failed(req, e, &src);
        }
    };

    match state.open_workspace(&target) {
        Ok(()) => ok(
            &req.id,
            json!({
                "ok": true,
                "workspacePath": target.to_string_lossy(),
                "bundleFormatDetected": summary.bundle_format_detected,
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import(state, req)),
        _ => None,
    }
}
