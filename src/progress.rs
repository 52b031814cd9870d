//! Progress checkpoints of an acquisition and the observers that consume them.
//!
//! The loop never prints on its own. It emits [`Progress`] events at fixed
//! checkpoints and whoever drives it decides where they go: the console, a
//! callback of a tool-style caller, or nowhere at all.

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io::Write;

/// Number of numbered steps in one attempt.
pub const TOTAL_STEPS: u32 = 4;

/// A checkpoint reached while acquiring an IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Progress {
    AttemptStarted { attempt: u32, max_attempts: u32 },
    CheckingConnectivity,
    ReplacingIp { asn: u32 },
    Settling { delay_ms: u64 },
    Polling { poll: u32, of: u32 },
    Replaced { previous_ip: String, new_ip: String, port: u16 },
    CheckingQuality { ip: String },
    ReportSaved { ip: String, path: String },
    Scored { ip: String, low_risk: usize, commercial: usize, acceptable: bool },
    AttemptFailed { attempt: u32, step: String, reason: String },
    Accepted { attempt: u32, ip: String },
    Exhausted { attempts: u32 },
}

impl Progress {
    /// Numbered step (1..=[`TOTAL_STEPS`]) this event opens, if any.
    pub fn step(&self) -> Option<u32> {
        match self {
            Progress::CheckingConnectivity => Some(1),
            Progress::ReplacingIp { .. } => Some(2),
            Progress::CheckingQuality { .. } => Some(3),
            Progress::Scored { .. } => Some(4),
            _ => None,
        }
    }
}

impl Progress {
    /// JSON form of the event: its tagged fields plus a human readable
    /// `message`, and `step`/`total` for numbered steps.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("message".into(), Value::String(self.to_string()));
            if let Some(step) = self.step() {
                map.insert("step".into(), step.into());
                map.insert("total".into(), TOTAL_STEPS.into());
            }
        }
        Ok(value)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::AttemptStarted { attempt, max_attempts } => {
                write!(f, "[Attempt {attempt}/{max_attempts}] Replacing IP and checking quality...")
            }
            Progress::CheckingConnectivity => f.write_str("Checking provider connectivity..."),
            Progress::ReplacingIp { asn } => write!(f, "Replacing IP (ASN: {asn})..."),
            Progress::Settling { delay_ms } => write!(f, "Waiting {delay_ms} ms for the provider to provision"),
            Progress::Polling { poll, of } => write!(f, "Polling for the new IP ({poll}/{of})"),
            Progress::Replaced { previous_ip, new_ip, port } => {
                write!(f, "IP replaced: {previous_ip} -> {new_ip}:{port}")
            }
            Progress::CheckingQuality { ip } => write!(f, "Running IP quality check ({ip})..."),
            Progress::ReportSaved { path, .. } => write!(f, "Report saved to {path}"),
            Progress::Scored {
                ip,
                low_risk,
                commercial,
                acceptable,
            } => write!(
                f,
                "IP: {ip} counts -> low risk: {low_risk}, commercial: {commercial} ({})",
                if *acceptable { "accepted" } else { "criteria not met" }
            ),
            Progress::AttemptFailed { attempt, step, reason } => {
                write!(f, "Attempt {attempt} failed at {step}: {reason}")
            }
            Progress::Accepted { attempt, ip } => write!(f, "SUCCESS! High quality IP found on attempt {attempt}: {ip}"),
            Progress::Exhausted { attempts } => {
                write!(f, "Finished {attempts} attempts without finding a suitable IP")
            }
        }
    }
}

/// Receives progress checkpoints.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &Progress);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _event: &Progress) {}
}

/// Sends every event to the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, event: &Progress) {
        info!("{}", event);
    }
}

/// Writes every event as one JSON object per line.
pub struct JsonProgress<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ProgressObserver for JsonProgress<W> {
    fn on_progress(&self, event: &Progress) {
        let line = match event.to_json() {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!("Failed to encode progress event: {}", e);
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write progress event: {}", e);
        }
    }
}

/// Forwards numbered steps to a callback as `(step, total, event)`, the shape
/// tool-style callers report progress in. Every event is also kept in order.
pub struct ProgressReporter<F>
where
    F: Fn(u32, u32, &Progress) + Send + Sync,
{
    callback: F,
    history: Mutex<Vec<Progress>>,
}

impl<F> ProgressReporter<F>
where
    F: Fn(u32, u32, &Progress) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Events received so far, oldest first.
    pub fn history(&self) -> Vec<Progress> {
        self.history.lock().clone()
    }
}

impl<F> ProgressObserver for ProgressReporter<F>
where
    F: Fn(u32, u32, &Progress) + Send + Sync,
{
    fn on_progress(&self, event: &Progress) {
        self.history.lock().push(event.clone());
        if let Some(step) = event.step() {
            (self.callback)(step, TOTAL_STEPS, event);
        }
    }
}

/// Records every event without forwarding it anywhere.
#[derive(Default)]
pub struct ProgressRecorder {
    events: Mutex<Vec<Progress>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Progress> {
        self.events.lock().clone()
    }
}

impl ProgressObserver for ProgressRecorder {
    fn on_progress(&self, event: &Progress) {
        self.events.lock().push(event.clone());
    }
}
