//! process.exec capability.
//!
//! Runs a program with an explicit argument vector under a bounded
//! budget. The shell-string `command` mode of older clients is rejected
//! outright.

use super::params::parse_optional_bool;
use super::proc::{KILL_WAIT, ProcessBudget, run_with_budget};
use super::{CapabilityError, CapabilityResult};
use jqclaw_proto::extract_string;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const DEFAULT_TIMEOUT_MS: i64 = 30_000;
const MIN_TIMEOUT_MS: i64 = 100;
const MAX_TIMEOUT_MS: i64 = 300_000;

struct ExecuteRequest {
    program: String,
    arguments: Vec<String>,
    working_directory: String,
    stdin_bytes: Option<Vec<u8>>,
    timeout_ms: i64,
    merge_channels: bool,
    inherit_environment: bool,
    environment: Vec<(String, String)>,
}

fn parse_execute_request(params: &Value) -> Result<ExecuteRequest, String> {
    if !params.is_object() {
        return Err("process.exec params must be object".to_string());
    }

    let command = extract_string(params, "command");
    if !command.is_empty() {
        return Err(
            "process.exec command mode is not supported; use program and arguments".to_string(),
        );
    }

    let program = extract_string(params, "program");
    if program.is_empty() {
        return Err("process.exec requires program".to_string());
    }

    let mut arguments = Vec::new();
    match params.get("arguments") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                let Some(text) = item.as_str() else {
                    return Err(format!("process.exec arguments[{index}] must be string"));
                };
                arguments.push(text.to_string());
            }
        }
        Some(_) => return Err("process.exec arguments must be string array".to_string()),
    }

    let working_directory = extract_string(params, "workingDirectory");

    let stdin_bytes = match params.get("stdin") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.as_bytes().to_vec()),
        Some(_) => return Err("process.exec stdin must be string".to_string()),
    };

    let timeout_ms = match params.get("timeoutMs") {
        None | Some(Value::Null) => DEFAULT_TIMEOUT_MS,
        Some(value) => {
            let Some(raw) = value.as_f64() else {
                return Err("process.exec timeoutMs must be number".to_string());
            };
            let parsed = raw as i64;
            if !raw.is_finite() || raw != parsed as f64 {
                return Err("process.exec timeoutMs is invalid".to_string());
            }
            if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&parsed) {
                return Err(format!(
                    "process.exec timeoutMs out of range [{MIN_TIMEOUT_MS}, {MAX_TIMEOUT_MS}]"
                ));
            }
            parsed
        }
    };

    let inherit_environment = parse_optional_bool(params, "inheritEnvironment", true)
        .map_err(|e| format!("process.exec {e}"))?;

    let mut environment = Vec::new();
    match params.get("environment") {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            for (key, value) in entries {
                let key = key.trim();
                if key.is_empty() {
                    return Err("process.exec environment contains empty key".to_string());
                }
                let Some(text) = value.as_str() else {
                    return Err(format!(
                        "process.exec environment key \"{key}\" must be string value"
                    ));
                };
                environment.push((key.to_string(), text.to_string()));
            }
        }
        Some(_) => return Err("process.exec environment must be object".to_string()),
    }

    let merge_channels = parse_optional_bool(params, "mergeChannels", false)
        .map_err(|e| format!("process.exec {e}"))?;

    Ok(ExecuteRequest {
        program,
        arguments,
        working_directory,
        stdin_bytes,
        timeout_ms,
        merge_channels,
        inherit_environment,
        environment,
    })
}

pub async fn run(params: &Value, invoke_timeout_ms: Option<u64>) -> CapabilityResult {
    let request = parse_execute_request(params).map_err(CapabilityError::invalid_params)?;

    let mut timeout_ms = request.timeout_ms;
    if let Some(invoke_timeout) = invoke_timeout_ms {
        if invoke_timeout > 0 {
            timeout_ms = timeout_ms.min(invoke_timeout as i64).max(1);
        }
    }

    info!(
        program = %request.program,
        args = %request.arguments.join(" "),
        timeout_ms,
        working_directory = %request.working_directory,
        "process.exec start"
    );

    let mut command = Command::new(&request.program);
    command.args(&request.arguments);
    if !request.working_directory.is_empty() {
        command.current_dir(&request.working_directory);
    }
    if !request.inherit_environment {
        command.env_clear();
    }
    for (key, value) in &request.environment {
        command.env(key, value);
    }

    let outcome = run_with_budget(
        command,
        request.stdin_bytes.clone(),
        ProcessBudget {
            run: Duration::from_millis(timeout_ms as u64),
            kill_wait: KILL_WAIT,
        },
    )
    .await
    .map_err(|e| {
        warn!(program = %request.program, error = %e, "process.exec failed to start");
        CapabilityError::runtime(format!("process.exec failed to start process: {e}"))
    })?;

    let (mut stdout, mut stderr) = (outcome.stdout, outcome.stderr);
    if request.merge_channels {
        stdout.extend_from_slice(&stderr);
        stderr.clear();
    }

    let exit_status = if outcome.crashed { "crash" } else { "normal" };
    let result_class = if outcome.timed_out {
        "timeout"
    } else if outcome.crashed {
        "crash"
    } else if outcome.exit_code != 0 {
        "non_zero_exit"
    } else {
        "ok"
    };
    let ok = result_class == "ok";

    let mut out = Map::new();
    out.insert("program".to_string(), json!(request.program));
    out.insert("arguments".to_string(), json!(request.arguments));
    out.insert(
        "workingDirectory".to_string(),
        json!(request.working_directory),
    );
    out.insert("timeoutMs".to_string(), json!(timeout_ms));
    out.insert("elapsedMs".to_string(), json!(outcome.elapsed_ms));
    out.insert("timedOut".to_string(), json!(outcome.timed_out));
    out.insert("exitCode".to_string(), json!(outcome.exit_code));
    out.insert("exitStatus".to_string(), json!(exit_status));
    out.insert(
        "stdout".to_string(),
        json!(String::from_utf8_lossy(&stdout).into_owned()),
    );
    out.insert(
        "stderr".to_string(),
        json!(String::from_utf8_lossy(&stderr).into_owned()),
    );
    out.insert("ok".to_string(), json!(ok));
    out.insert("resultClass".to_string(), json!(result_class));
    if outcome.timed_out {
        out.insert("processErrorName".to_string(), json!("timed_out"));
        out.insert("processErrorString".to_string(), json!("process timed out"));
    } else if outcome.crashed {
        out.insert("processErrorName".to_string(), json!("crashed"));
        out.insert("processErrorString".to_string(), json!("process crashed"));
    }

    info!(
        program = %request.program,
        exit_code = outcome.exit_code,
        timed_out = outcome.timed_out,
        elapsed_ms = outcome.elapsed_ms,
        "process.exec done"
    );
    Ok(Value::Object(out))
}
