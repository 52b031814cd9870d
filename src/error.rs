//! Error types for the proxy-quality-hunter crate.

use crate::acquisition::AttemptResult;
use crate::config::RECOGNIZED_KEYS;

use std::time::Duration;
use thiserror::Error;

/// Missing or unusable configuration. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required keys absent or empty.
    #[error("missing configuration: {} (recognized keys: {})", .missing.join(", "), RECOGNIZED_KEYS.join(", "))]
    Missing { missing: Vec<&'static str> },
    /// A value is present but cannot be used.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The provider endpoint could not be reached.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("timed out reaching the provider, check the network or change the forward proxy")]
    Timeout,
    #[error("forward proxy connection failed, check HTTP_PROXY/HTTPS_PROXY: {0}")]
    Proxy(String),
    #[error("cannot connect to the provider, check the network or set a forward proxy: {0}")]
    Connection(String),
    #[error("provider returned status code {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Other(String),
}

/// The provider refused or never completed an IP replacement.
#[derive(Debug, Error)]
pub enum ReplacementError {
    #[error("no replaced proxy found for plan {plan_id}")]
    NoCurrentProxy { plan_id: String },
    #[error("provider rejected replacement of {ip} with status {status}")]
    Rejected { ip: String, status: u16 },
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("failed to encode replace request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("replacement of {previous_ip} not observed after {polls} polls")]
    ConvergenceTimeout { previous_ip: String, polls: u32 },
    #[error("provider assigned {ip} without a port")]
    MissingPort { ip: String },
}

impl From<reqwest::Error> for ReplacementError {
    fn from(err: reqwest::Error) -> Self {
        ReplacementError::Request(reqwest_middleware::Error::Reqwest(err))
    }
}

/// The reputation-check command could not produce a report.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to start check command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("check command failed while running: {0}")]
    Io(#[source] std::io::Error),
    #[error("check command exceeded {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Why a single attempt failed. Every variant is recoverable by retrying.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("connectivity check failed: {0}")]
    Connectivity(#[from] ConnectivityError),
    #[error("IP replacement failed: {0}")]
    Replacement(#[from] ReplacementError),
    #[error("quality check failed: {0}")]
    CheckExecution(#[from] CheckError),
}

impl AttemptError {
    /// Name of the step that failed, as reported by single-attempt mode.
    pub fn step(&self) -> &'static str {
        match self {
            AttemptError::Connectivity(_) => "connectivity_check",
            AttemptError::Replacement(_) => "ip_replacement",
            AttemptError::CheckExecution(_) => "quality_check",
        }
    }
}

/// Terminal failure of an acquisition run.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("no acceptable IP found after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        last: Option<Box<AttemptResult>>,
    },
    #[error("failed to write acceptance artifact: {0}")]
    Storage(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
