//! file.write capability: write, move, and delete operations.
//!
//! Disabled unless the invoke carries `allowWrite=true`. Deletes always
//! go to the platform trash; this capability never hard-unlinks a tree.

use super::params::{
    decode_content, encoding_name, normalize_token, parse_encoding, parse_optional_bool,
};
use super::{CapabilityError, CapabilityResult, absolutize};
use jqclaw_proto::extract_string;
use serde_json::{Value, json};
use std::path::Path;
use tracing::info;

const MAX_WRITE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOperation {
    Write,
    Move,
    Delete,
}

fn parse_operation(params: &Value) -> Result<WriteOperation, String> {
    let value = match params.get("operation") {
        None | Some(Value::Null) => return Ok(WriteOperation::Write),
        Some(value) => value,
    };
    let Some(text) = value.as_str() else {
        return Err("operation must be string".to_string());
    };

    match normalize_token(text).as_str() {
        "" | "write" => Ok(WriteOperation::Write),
        "move" | "cut" => Ok(WriteOperation::Move),
        "delete" | "remove" => Ok(WriteOperation::Delete),
        _ => Err("operation must be write, move/cut, or delete/remove".to_string()),
    }
}

pub fn run(params: &Value) -> CapabilityResult {
    if !params.is_object() {
        return Err(CapabilityError::runtime("file.write params must be object"));
    }

    let path = extract_string(params, "path");
    if path.is_empty() {
        return Err(CapabilityError::runtime("file.write path is required"));
    }

    let allow_write =
        parse_optional_bool(params, "allowWrite", false).map_err(CapabilityError::runtime)?;
    if !allow_write {
        return Err(CapabilityError::runtime(
            "file.write is disabled by default; set allowWrite=true to proceed",
        ));
    }

    let operation = parse_operation(params).map_err(CapabilityError::runtime)?;
    match operation {
        WriteOperation::Move => run_move(params, &path),
        WriteOperation::Delete => run_delete(&path),
        WriteOperation::Write => run_write(params, &path),
    }
}

// ─── write ───────────────────────────────────────────────────────────────────

fn run_write(params: &Value, path: &str) -> CapabilityResult {
    let Some(content) = params.get("content").and_then(Value::as_str) else {
        return Err(CapabilityError::runtime("file.write content must be string"));
    };

    let encoding = parse_encoding(params, "encoding").map_err(CapabilityError::runtime)?;
    let append = parse_optional_bool(params, "append", false).map_err(CapabilityError::runtime)?;
    let create_dirs =
        parse_optional_bool(params, "createDirs", true).map_err(CapabilityError::runtime)?;

    let content_bytes = decode_content(content, encoding).map_err(CapabilityError::runtime)?;
    if content_bytes.len() > MAX_WRITE_BYTES {
        return Err(CapabilityError::runtime(format!(
            "file.write content bytes exceed limit {MAX_WRITE_BYTES}"
        )));
    }

    let absolute = absolutize(path);
    if create_dirs {
        if let Some(parent) = absolute.parent() {
            if !parent.exists() && std::fs::create_dir_all(parent).is_err() {
                return Err(CapabilityError::runtime(
                    "file.write failed to create parent directories",
                ));
            }
        }
    }

    info!(
        path = %absolute.display(),
        bytes = content_bytes.len(),
        append,
        encoding = encoding_name(encoding),
        "file.write start"
    );

    use std::io::Write;
    let mut open_options = std::fs::OpenOptions::new();
    open_options.write(true).create(true);
    if append {
        open_options.append(true);
    } else {
        open_options.truncate(true);
    }
    let mut file = open_options
        .open(&absolute)
        .map_err(|e| CapabilityError::runtime(format!("file.write open failed: {e}")))?;
    file.write_all(&content_bytes)
        .map_err(|e| CapabilityError::runtime(format!("file.write failed: {e}")))?;
    file.flush()
        .map_err(|e| CapabilityError::runtime(format!("file.write failed: {e}")))?;
    drop(file);

    let size_bytes = std::fs::metadata(&absolute)
        .map(|metadata| metadata.len())
        .unwrap_or(content_bytes.len() as u64);

    info!(
        path = %absolute.display(),
        bytes_written = content_bytes.len(),
        size_bytes,
        "file.write done"
    );

    Ok(json!({
        "operation": "write",
        "path": absolute.display().to_string(),
        "encoding": encoding_name(encoding),
        "appended": append,
        "bytesWritten": content_bytes.len(),
        "sizeBytes": size_bytes,
    }))
}

// ─── move ────────────────────────────────────────────────────────────────────

fn run_move(params: &Value, path: &str) -> CapabilityResult {
    let destination = {
        let by_destination_path = extract_string(params, "destinationPath");
        if by_destination_path.is_empty() {
            extract_string(params, "toPath")
        } else {
            by_destination_path
        }
    };
    if destination.is_empty() {
        return Err(CapabilityError::runtime(
            "file.write move requires destinationPath or toPath",
        ));
    }

    let source = absolutize(path);
    let source_metadata = std::fs::symlink_metadata(&source)
        .map_err(|_| CapabilityError::runtime("file.write move source does not exist"))?;

    let destination = absolutize(&destination);
    let source_text = source.display().to_string();
    let destination_text = destination.display().to_string();
    if source_text.eq_ignore_ascii_case(&destination_text) {
        return Err(CapabilityError::runtime(
            "file.write move source and destination must be different",
        ));
    }

    let create_dirs =
        parse_optional_bool(params, "createDirs", true).map_err(CapabilityError::runtime)?;
    let overwrite =
        parse_optional_bool(params, "overwrite", false).map_err(CapabilityError::runtime)?;

    if create_dirs {
        if let Some(parent) = destination.parent() {
            if !parent.exists() && std::fs::create_dir_all(parent).is_err() {
                return Err(CapabilityError::runtime(
                    "file.write move failed to create destination parent directories",
                ));
            }
        }
    }

    let destination_existed = destination.exists() || destination.is_symlink();
    if destination_existed {
        if !overwrite {
            return Err(CapabilityError::runtime(
                "file.write move destination already exists",
            ));
        }
        remove_path(&destination).map_err(|e| {
            CapabilityError::runtime(format!(
                "file.write move failed to remove destination: {e}"
            ))
        })?;
    }

    info!(
        from = %source.display(),
        to = %destination.display(),
        overwrite,
        create_dirs,
        "file.write move start"
    );

    let source_is_directory = source_metadata.is_dir();
    let mut moved = std::fs::rename(&source, &destination).is_ok();
    if !moved && source_metadata.is_file() {
        // Rename fails across filesystems; fall back to copy + delete,
        // rolling the copy back when the source cannot be removed.
        if std::fs::copy(&source, &destination).is_ok() {
            if std::fs::remove_file(&source).is_ok() {
                moved = true;
            } else {
                let _ = std::fs::remove_file(&destination);
            }
        }
    }
    if !moved {
        return Err(CapabilityError::runtime("file.write move failed"));
    }

    let target_type = if source_is_directory { "directory" } else { "file" };
    info!(
        from = %source.display(),
        to = %destination.display(),
        target_type,
        overwritten = destination_existed,
        "file.write move done"
    );

    Ok(json!({
        "operation": "move",
        "fromPath": source_text,
        "toPath": destination_text,
        "path": destination_text,
        "targetType": target_type,
        "overwritten": destination_existed,
        "moved": true,
    }))
}

fn remove_path(path: &Path) -> Result<(), String> {
    let metadata = std::fs::symlink_metadata(path).map_err(|_| "target does not exist")?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path).map_err(|e| e.to_string())
    } else {
        std::fs::remove_file(path).map_err(|e| e.to_string())
    }
}

// ─── delete ──────────────────────────────────────────────────────────────────

fn run_delete(path: &str) -> CapabilityResult {
    let absolute = absolutize(path);
    let metadata = std::fs::symlink_metadata(&absolute)
        .map_err(|_| CapabilityError::runtime("file.write delete target does not exist"))?;
    let target_is_directory = metadata.is_dir();

    info!(path = %absolute.display(), mode = "trash", "file.write delete start");

    trash::delete(&absolute).map_err(|e| {
        CapabilityError::runtime(format!(
            "file.write delete failed to move target to trash: {e}"
        ))
    })?;

    let target_type = if target_is_directory { "directory" } else { "file" };
    info!(path = %absolute.display(), target_type, "file.write delete done");

    Ok(json!({
        "operation": "delete",
        "path": absolute.display().to_string(),
        "targetType": target_type,
        "deleted": true,
        "deleteMode": "trash",
    }))
}
