//! Invocation of the external reputation-check command.

use crate::config::AcquisitionConfig;
use crate::error::CheckError;
use crate::utils;

use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

/// Produces a raw quality report for a proxy.
#[async_trait]
pub trait QualityChecker: Send + Sync {
    /// Run the check through `socks_url` and return its report verbatim.
    async fn check(&self, socks_url: &str) -> Result<String, CheckError>;
}

/// Runs a shell command template with the proxy URL substituted in.
///
/// Only stdout is kept. The exit status is ignored: the tool reports through
/// its output, and a partial report is still evidence worth scoring.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    shell: String,
    template: String,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            template: config.check_command.clone(),
            timeout: config.check_timeout,
        }
    }

    /// The command line run for `socks_url`.
    pub fn command_for(&self, socks_url: &str) -> String {
        utils::render_command(&self.template, socks_url)
    }
}

#[async_trait]
impl QualityChecker for CommandChecker {
    async fn check(&self, socks_url: &str) -> Result<String, CheckError> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(self.command_for(socks_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CheckError::Spawn)?;

        // dropping the wait future on timeout drops the child, which kills it
        let output = match time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(CheckError::Io)?,
            Err(_) => return Err(CheckError::Timeout(self.timeout)),
        };

        debug!("Check command exited with {}", output.status);
        if !output.stderr.is_empty() {
            debug!("Check command stderr: {}", String::from_utf8_lossy(&output.stderr).trim_end());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
