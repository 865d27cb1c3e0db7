//! Capability entry points.
//!
//! Every capability shares one contract: a JSON params value in, a JSON
//! payload or a [`CapabilityError`] out. Errors never abort the process;
//! they travel back to the gateway inside `node.invoke.result`.

pub mod file_read;
pub mod file_write;
pub mod params;
pub mod proc;
pub mod process_exec;
pub mod screenshot;
pub mod system_info;
pub mod upload;

use std::path::{Path, PathBuf};

pub const CODE_INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const CODE_COMMAND_NOT_SUPPORTED: &str = "COMMAND_NOT_SUPPORTED";
pub const CODE_SYSTEM_INFO_FAILED: &str = "SYSTEM_INFO_FAILED";
pub const CODE_SCREENSHOT_CAPTURE_FAILED: &str = "SCREENSHOT_CAPTURE_FAILED";
pub const CODE_SCREENSHOT_UPLOAD_FAILED: &str = "SCREENSHOT_UPLOAD_FAILED";

/// Structured capability failure. `code` is present for classified
/// failures (bad params, unsupported command, subsystem codes); plain
/// runtime failures carry only a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityError {
    pub code: Option<String>,
    pub message: String,
}

impl CapabilityError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(CODE_INVALID_PARAMS, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

pub type CapabilityResult = Result<serde_json::Value, CapabilityError>;

/// Absolute form of a possibly relative path, without requiring the
/// target to exist.
pub(crate) fn absolutize(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
