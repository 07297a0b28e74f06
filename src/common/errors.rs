//! Client error taxonomy and server result codes.

use std::path::PathBuf;
use thiserror::Error;

/// Result codes the server places in `resultCode`.
pub mod result_code {
    pub const SUCCESS: &str = "0";
    pub const NO_DATA: &str = "UC0000";
    pub const FAIL_PID_SEARCH: &str = "UC0001";
    pub const PROBLEM_NOTIFY_SETUP: &str = "UC4000";
    pub const PROBLEM_ATTACH_FILE_INFO_SAVE: &str = "UC5000";
    pub const PROBLEM_ATTACH_FILE_SAVE: &str = "UC5001";
    pub const PROBLEM_MAIN_COUNT_SEARCH: &str = "UC5002";
    pub const PROBLEM_ATTACH_FILE_DELETE: &str = "UC5003";
    pub const NO_ACCESS_RIGHT: &str = "UC6000";
    pub const LOGIN_OTHER_DEVICE_OLD: &str = "UC6001";
    pub const LOGIN_OTHER_DEVICE: &str = "UC6200";

    pub const WRONG_ID_OR_PW: &str = "LOGIN000";
    pub const PROBLEM_LOGIN: &str = "LOGIN001";
    pub const PROBLEM_LOGOUT: &str = "LOGIN002";
    pub const PROBLEM_CHANGE_PUSHID: &str = "LOGIN003";
    pub const FAIL_CHANGE_PW: &str = "LOGIN004";
    pub const FAIL_CHANGE_COMP: &str = "LOGIN005";
    pub const PROBLEM_CHANGE_PRF_IMG: &str = "LOGIN006";
    pub const PROBLEM_CHANGE_PW: &str = "LOGIN007";
    pub const PROBLEM_CHANGE_BASIC_COMP: &str = "LOGIN008";
    pub const PROBLEM_CHANGE_PUSH_STATUS: &str = "LOGIN009";
    pub const WRONG_APP: &str = "LOGIN999";
}

/// Every failure the transport layer can surface.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Registry miss or unparseable operation name. No request was sent.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("protocol registry is empty; discovery has not completed")]
    NotDiscovered,

    #[error("session has no mobile id")]
    MissingMobileId,

    /// Non-200 status, network failure, timeout or undecodable body.
    #[error("{operation}: transport failure{} (tid {}): {message}", fmt_status(.status), .tid.as_deref().unwrap_or("-"))]
    Transport {
        operation: String,
        tid: Option<String>,
        status: Option<u16>,
        message: String,
    },

    /// HTTP 200 with a non-success `resultCode`.
    #[error("{operation}: server returned {code} (tid {}): {message}", .tid.as_deref().unwrap_or("-"))]
    Application {
        operation: String,
        tid: Option<String>,
        code: String,
        message: String,
    },

    #[error("discovery failed: {0}")]
    Discovery(#[source] Box<ClientError>),

    #[error("failed to extract {}: {message}", .path.display())]
    Extraction { path: PathBuf, message: String },

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The swap failed and the backup could not be moved back. Not retryable.
    #[error(
        "rollback failed: could not restore {} from {}: {source}",
        .primary.display(),
        .backup.display()
    )]
    RollbackFailed {
        primary: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload rejected: {0}")]
    UploadValidation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" status {s}")).unwrap_or_default()
}

impl ClientError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Transport failures may succeed on a later attempt; nothing else will
    /// without changing the input.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Discovery(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Only a failed rollback leaves the filesystem in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::RollbackFailed { .. })
    }

    /// Server result code for application errors.
    pub fn result_code(&self) -> Option<&str> {
        match self {
            ClientError::Application { code, .. } => Some(code),
            ClientError::Discovery(inner) => inner.result_code(),
            _ => None,
        }
    }

    /// HTTP status for transport errors that got as far as a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => *status,
            ClientError::Discovery(inner) => inner.status(),
            _ => None,
        }
    }
}
