//! file.read capability: read, list, and rg operations.

use super::params::{
    encode_content, encoding_name, normalize_token, parse_bounded_integer, parse_encoding,
    parse_optional_bool,
};
use super::proc::{KILL_WAIT, ProcessBudget, run_with_budget};
use super::{CapabilityError, CapabilityResult, absolutize};
use jqclaw_proto::extract_string;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

const DEFAULT_READ_MAX_BYTES: i64 = 1024 * 1024;
const MAX_READ_MAX_BYTES: i64 = 20 * 1024 * 1024;
const DEFAULT_MAX_ENTRIES: i64 = 200;
const MAX_MAX_ENTRIES: i64 = 5000;
const DEFAULT_RG_MAX_MATCHES: i64 = 200;
const MAX_RG_MAX_MATCHES: i64 = 5000;
const RG_RUN_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOperation {
    Read,
    List,
    Rg,
}

fn parse_operation(params: &Value) -> Result<ReadOperation, String> {
    let value = match params.get("operation") {
        None | Some(Value::Null) => return Ok(ReadOperation::Read),
        Some(value) => value,
    };
    let Some(text) = value.as_str() else {
        return Err("operation must be string".to_string());
    };

    match normalize_token(text).as_str() {
        "" | "read" => Ok(ReadOperation::Read),
        "list" => Ok(ReadOperation::List),
        "rg" => Ok(ReadOperation::Rg),
        _ => Err("operation must be read, list, or rg".to_string()),
    }
}

/// Entry point. `invoke_timeout_ms` caps the rg run budget when set.
pub async fn run(params: &Value, invoke_timeout_ms: Option<u64>) -> CapabilityResult {
    if !params.is_object() {
        return Err(CapabilityError::invalid_params(
            "file.read params must be object",
        ));
    }

    let path = extract_string(params, "path");
    if path.is_empty() {
        return Err(CapabilityError::invalid_params("file.read path is required"));
    }

    let operation = parse_operation(params).map_err(CapabilityError::invalid_params)?;

    let absolute = absolutize(&path);
    let metadata = std::fs::metadata(&absolute)
        .map_err(|_| CapabilityError::runtime("file.read target does not exist"))?;

    match operation {
        ReadOperation::List => run_list(params, &absolute, &metadata),
        ReadOperation::Rg => run_rg(params, &absolute, &metadata, invoke_timeout_ms).await,
        ReadOperation::Read => run_read(params, &absolute, &metadata),
    }
}

// ─── read ────────────────────────────────────────────────────────────────────

fn run_read(params: &Value, absolute: &Path, metadata: &std::fs::Metadata) -> CapabilityResult {
    if !metadata.is_file() {
        return Err(CapabilityError::runtime(
            "file.read read target is not a file",
        ));
    }

    let encoding =
        parse_encoding(params, "encoding").map_err(CapabilityError::invalid_params)?;
    let max_bytes = parse_bounded_integer(
        params,
        "maxBytes",
        DEFAULT_READ_MAX_BYTES,
        1,
        MAX_READ_MAX_BYTES,
    )
    .map_err(CapabilityError::invalid_params)?;

    info!(
        path = %absolute.display(),
        max_bytes,
        encoding = encoding_name(encoding),
        "file.read start"
    );

    let file = std::fs::File::open(absolute)
        .map_err(|e| CapabilityError::runtime(format!("file.read open failed: {e}")))?;
    let mut bytes = Vec::new();
    file.take(max_bytes as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| CapabilityError::runtime(format!("file.read read failed: {e}")))?;

    let truncated = bytes.len() as i64 > max_bytes;
    if truncated {
        bytes.truncate(max_bytes as usize);
    }

    info!(
        path = %absolute.display(),
        size_bytes = metadata.len(),
        read_bytes = bytes.len(),
        truncated,
        "file.read done"
    );

    Ok(json!({
        "path": absolute.display().to_string(),
        "operation": "read",
        "targetType": "file",
        "encoding": encoding_name(encoding),
        "sizeBytes": metadata.len(),
        "readBytes": bytes.len(),
        "truncated": truncated,
        "content": encode_content(&bytes, encoding),
    }))
}

// ─── list ────────────────────────────────────────────────────────────────────

struct ListEntry {
    name: String,
    path: PathBuf,
    entry_type: &'static str,
    is_symlink: bool,
    size_bytes: Option<u64>,
}

fn run_list(params: &Value, absolute: &Path, metadata: &std::fs::Metadata) -> CapabilityResult {
    if !metadata.is_dir() {
        return Err(CapabilityError::runtime(
            "file.read list target is not directory",
        ));
    }

    let include_entries = parse_optional_bool(params, "includeEntries", true)
        .map_err(CapabilityError::invalid_params)?;
    let max_entries = if include_entries {
        parse_bounded_integer(params, "maxEntries", DEFAULT_MAX_ENTRIES, 1, MAX_MAX_ENTRIES)
            .map_err(CapabilityError::invalid_params)?
    } else {
        DEFAULT_MAX_ENTRIES
    };

    let read_dir = std::fs::read_dir(absolute)
        .map_err(|e| CapabilityError::runtime(format!("file.read list failed: {e}")))?;

    let mut collected: Vec<ListEntry> = Vec::new();
    for entry in read_dir.flatten() {
        let entry_path = entry.path();
        let is_symlink = entry
            .file_type()
            .map(|file_type| file_type.is_symlink())
            .unwrap_or(false);
        // Follow symlinks for the entry type, matching what a directory
        // listing reports; a broken link counts as "other".
        let (entry_type, size_bytes) = match std::fs::metadata(&entry_path) {
            Ok(target) if target.is_dir() => ("directory", None),
            Ok(target) if target.is_file() => ("file", Some(target.len())),
            _ => ("other", None),
        };
        collected.push(ListEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry_path,
            entry_type,
            is_symlink,
            size_bytes,
        });
    }

    // Directories first, then case-insensitive name order.
    collected.sort_by(|a, b| {
        let a_key = (a.entry_type != "directory", a.name.to_lowercase());
        let b_key = (b.entry_type != "directory", b.name.to_lowercase());
        a_key.cmp(&b_key)
    });

    let mut directory_count = 0i64;
    let mut file_count = 0i64;
    let mut other_count = 0i64;
    let mut truncated = false;
    let mut entries = Vec::new();

    for entry in &collected {
        match entry.entry_type {
            "directory" => directory_count += 1,
            "file" => file_count += 1,
            _ => other_count += 1,
        }

        if include_entries {
            if entries.len() as i64 >= max_entries {
                truncated = true;
                continue;
            }
            let mut item = Map::new();
            item.insert("name".to_string(), json!(entry.name));
            item.insert(
                "path".to_string(),
                json!(entry.path.display().to_string()),
            );
            item.insert("type".to_string(), json!(entry.entry_type));
            item.insert("isSymLink".to_string(), json!(entry.is_symlink));
            if let Some(size) = entry.size_bytes {
                item.insert("sizeBytes".to_string(), json!(size));
            }
            entries.push(Value::Object(item));
        }
    }

    let mut out = Map::new();
    out.insert("path".to_string(), json!(absolute.display().to_string()));
    out.insert("operation".to_string(), json!("list"));
    out.insert("targetType".to_string(), json!("directory"));
    out.insert("directoryCount".to_string(), json!(directory_count));
    out.insert("fileCount".to_string(), json!(file_count));
    out.insert("otherCount".to_string(), json!(other_count));
    out.insert("totalCount".to_string(), json!(collected.len()));
    out.insert("includeEntries".to_string(), json!(include_entries));
    if include_entries {
        out.insert("maxEntries".to_string(), json!(max_entries));
        out.insert("truncated".to_string(), json!(truncated));
        out.insert("entries".to_string(), Value::Array(entries));
    }
    Ok(Value::Object(out))
}

// ─── rg ──────────────────────────────────────────────────────────────────────

async fn run_rg(
    params: &Value,
    absolute: &Path,
    metadata: &std::fs::Metadata,
    invoke_timeout_ms: Option<u64>,
) -> CapabilityResult {
    let pattern = extract_string(params, "pattern");
    if pattern.is_empty() {
        return Err(CapabilityError::invalid_params(
            "file.read rg pattern is required",
        ));
    }

    let max_matches = parse_bounded_integer(
        params,
        "maxMatches",
        DEFAULT_RG_MAX_MATCHES,
        1,
        MAX_RG_MAX_MATCHES,
    )
    .map_err(CapabilityError::invalid_params)?;
    let case_sensitive = parse_optional_bool(params, "caseSensitive", false)
        .map_err(CapabilityError::invalid_params)?;
    let include_hidden = parse_optional_bool(params, "includeHidden", false)
        .map_err(CapabilityError::invalid_params)?;
    let literal =
        parse_optional_bool(params, "literal", false).map_err(CapabilityError::invalid_params)?;

    let mut command = Command::new("rg");
    command
        .arg("--json")
        .arg("--line-number")
        .arg("--color")
        .arg("never")
        .arg("--max-count")
        .arg(max_matches.to_string());
    if !case_sensitive {
        command.arg("--ignore-case");
    }
    if include_hidden {
        command.arg("--hidden");
    }
    if literal {
        command.arg("--fixed-strings");
    }
    command.arg(&pattern).arg(absolute);

    let mut run_timeout_ms = RG_RUN_TIMEOUT_MS;
    if let Some(invoke_timeout) = invoke_timeout_ms {
        if invoke_timeout > 0 {
            run_timeout_ms = run_timeout_ms.min(invoke_timeout).max(1);
        }
    }

    info!(
        path = %absolute.display(),
        pattern = %pattern,
        max_matches,
        case_sensitive,
        include_hidden,
        literal,
        timeout_ms = run_timeout_ms,
        "file.read rg start"
    );

    let outcome = run_with_budget(
        command,
        None,
        ProcessBudget {
            run: Duration::from_millis(run_timeout_ms),
            kill_wait: KILL_WAIT,
        },
    )
    .await
    .map_err(|e| CapabilityError::runtime(format!("file.read rg failed to start: {e}")))?;

    if outcome.timed_out {
        return Err(CapabilityError::runtime("file.read rg timed out"));
    }
    if outcome.crashed {
        return Err(CapabilityError::runtime("file.read rg crashed"));
    }

    let stderr_text = String::from_utf8_lossy(&outcome.stderr).trim().to_string();
    if outcome.exit_code == 2 {
        let message = if stderr_text.is_empty() {
            "file.read rg failed".to_string()
        } else {
            format!("file.read rg failed: {stderr_text}")
        };
        return Err(CapabilityError::runtime(message));
    }

    let (matches, matched_files, truncated) =
        parse_rg_output(&outcome.stdout, absolute, max_matches);

    info!(
        path = %absolute.display(),
        matches = matches.len(),
        files = matched_files,
        exit_code = outcome.exit_code,
        "file.read rg done"
    );

    let mut out = Map::new();
    out.insert("path".to_string(), json!(absolute.display().to_string()));
    out.insert("operation".to_string(), json!("rg"));
    out.insert(
        "targetType".to_string(),
        json!(if metadata.is_dir() { "directory" } else { "file" }),
    );
    out.insert("pattern".to_string(), json!(pattern));
    out.insert("caseSensitive".to_string(), json!(case_sensitive));
    out.insert("includeHidden".to_string(), json!(include_hidden));
    out.insert("literal".to_string(), json!(literal));
    out.insert("maxMatches".to_string(), json!(max_matches));
    out.insert("matchCount".to_string(), json!(matches.len()));
    out.insert("fileCount".to_string(), json!(matched_files));
    out.insert("truncated".to_string(), json!(truncated));
    out.insert("rgExitCode".to_string(), json!(outcome.exit_code));
    if !stderr_text.is_empty() {
        out.insert("stderr".to_string(), json!(stderr_text));
    }
    out.insert("matches".to_string(), Value::Array(matches));
    Ok(Value::Object(out))
}

/// Parse rg `--json` output: keep `match` envelopes, emit one record per
/// submatch (or a single empty-column record when there are none), cap
/// at `max_matches`.
fn parse_rg_output(
    stdout: &[u8],
    search_path: &Path,
    max_matches: i64,
) -> (Vec<Value>, usize, bool) {
    let mut matches: Vec<Value> = Vec::new();
    let mut matched_files: HashSet<String> = HashSet::new();
    let mut truncated = false;

    for raw_line in stdout.split(|byte| *byte == b'\n') {
        let line = String::from_utf8_lossy(raw_line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(envelope) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if !envelope.is_object()
            || envelope.get("type").and_then(Value::as_str) != Some("match")
        {
            continue;
        }

        let data = &envelope["data"];
        let mut match_path = data["path"]["text"].as_str().unwrap_or("").to_string();
        if match_path.trim().is_empty() {
            match_path = search_path.display().to_string();
        }
        matched_files.insert(match_path.clone());

        let mut line_text = data["lines"]["text"].as_str().unwrap_or("").to_string();
        while line_text.ends_with('\n') || line_text.ends_with('\r') {
            line_text.pop();
        }
        let line_number = data["line_number"].as_i64().unwrap_or(0);
        let submatches = data["submatches"].as_array().cloned().unwrap_or_default();

        if submatches.is_empty() {
            if matches.len() as i64 >= max_matches {
                truncated = true;
                continue;
            }
            matches.push(json!({
                "path": match_path,
                "lineNumber": line_number,
                "columnStart": 1,
                "columnEnd": 1,
                "lineText": line_text,
                "matchText": "",
            }));
            continue;
        }

        for submatch in &submatches {
            if matches.len() as i64 >= max_matches {
                truncated = true;
                break;
            }
            let start = submatch["start"].as_i64().unwrap_or(0);
            let end = submatch["end"].as_i64().unwrap_or(0);
            let match_text = submatch["match"]["text"].as_str().unwrap_or("");
            matches.push(json!({
                "path": match_path,
                "lineNumber": line_number,
                "columnStart": start + 1,
                "columnEnd": end,
                "lineText": line_text,
                "matchText": match_text,
            }));
        }
    }

    (matches, matched_files.len(), truncated)
}
