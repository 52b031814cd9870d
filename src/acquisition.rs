//! The replace-and-verify loop.
//!
//! One attempt walks `Idle -> ConnectivityChecked -> Replaced -> Checked ->
//! Scored` and ends accepted, rejected or failed. Attempts run strictly one
//! after another: each one mutates the plan's single "current proxy" at the
//! provider, and a second attempt in flight would race the first one's
//! convergence polling.

use crate::checker::{CommandChecker, QualityChecker};
use crate::config::{AcquisitionConfig, Settings};
use crate::connectivity::{ConnectivityProbe, HttpConnectivityProbe};
use crate::error::{AcquisitionError, AttemptError};
use crate::progress::{Progress, ProgressObserver};
use crate::provider::{ProxyReplacer, WebshareClient};
use crate::proxy::{ProxyCredential, SocksEndpoint};
use crate::scorer::{self, QualityScore};
use crate::store::{FsReportStore, ReportStore};

use log::{info, warn};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::PathBuf;

/// Furthest point an attempt reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttemptStage {
    #[default]
    Idle,
    ConnectivityChecked,
    Replaced,
    Checked,
    Scored,
}

/// How an attempt ended.
#[derive(Debug)]
pub enum AttemptStatus {
    /// The report met the acceptance policy.
    Accepted(QualityScore),
    /// The report was valid but did not meet the policy.
    Rejected(QualityScore),
    /// A step failed before a report could be scored.
    Failed(AttemptError),
}

/// Record of one loop iteration.
#[derive(Debug)]
pub struct AttemptResult {
    pub attempt: u32,
    pub stage: AttemptStage,
    pub status: AttemptStatus,
    pub ip: Option<String>,
    pub socks_url: Option<String>,
    pub report: Option<String>,
    /// Where the report was persisted, if writing it succeeded.
    pub report_path: Option<PathBuf>,
}

impl AttemptResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, AttemptStatus::Accepted(_))
    }

    /// The acceptance artifact, for accepted attempts.
    pub fn outcome(&self) -> Option<AcceptanceOutcome> {
        match (&self.status, &self.ip, &self.socks_url, &self.report) {
            (AttemptStatus::Accepted(_), Some(ip), Some(socks_url), Some(report)) => Some(AcceptanceOutcome {
                ip: ip.clone(),
                socks_url: socks_url.clone(),
                report: report.clone(),
            }),
            _ => None,
        }
    }
}

/// What an attempt collected before it ended.
#[derive(Debug, Default)]
struct Trace {
    stage: AttemptStage,
    ip: Option<String>,
    socks_url: Option<String>,
    report: Option<String>,
    report_path: Option<PathBuf>,
}

impl Trace {
    fn finish(self, attempt: u32, status: AttemptStatus) -> AttemptResult {
        AttemptResult {
            attempt,
            stage: self.stage,
            status,
            ip: self.ip,
            socks_url: self.socks_url,
            report: self.report,
            report_path: self.report_path,
        }
    }
}

/// An accepted proxy. Serialized as `{status, ip, socks_url, report}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceOutcome {
    pub ip: String,
    pub socks_url: String,
    pub report: String,
}

impl Serialize for AcceptanceOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AcceptanceOutcome", 4)?;
        state.serialize_field("status", "success")?;
        state.serialize_field("ip", &self.ip)?;
        state.serialize_field("socks_url", &self.socks_url)?;
        state.serialize_field("report", &self.report)?;
        state.end()
    }
}

/// Result of [`Acquisition::attempt_once`], shaped for tool callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SingleAttempt {
    Success {
        ip: String,
        socks_url: String,
        report: String,
    },
    Failed {
        step: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
        message: String,
    },
}

/// Drives attempts against a provider, a checker and a report store.
pub struct Acquisition {
    credential: ProxyCredential,
    probe: Box<dyn ConnectivityProbe>,
    replacer: Box<dyn ProxyReplacer>,
    checker: Box<dyn QualityChecker>,
    store: Box<dyn ReportStore>,
}

impl Acquisition {
    /// Assemble a loop from its collaborators.
    pub fn new(
        credential: ProxyCredential,
        probe: impl ConnectivityProbe + 'static,
        replacer: impl ProxyReplacer + 'static,
        checker: impl QualityChecker + 'static,
        store: impl ReportStore + 'static,
    ) -> Self {
        Self {
            credential,
            probe: Box::new(probe),
            replacer: Box::new(replacer),
            checker: Box::new(checker),
            store: Box::new(store),
        }
    }

    /// Wire the HTTP probe, the Webshare client, the command checker and a
    /// file store from validated settings.
    pub fn from_settings(settings: &Settings, config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        Ok(Self::new(
            settings.credential.clone(),
            HttpConnectivityProbe::new(settings, config)?,
            WebshareClient::new(settings, config)?,
            CommandChecker::new(config),
            FsReportStore::new(config.output_dir.clone()),
        ))
    }

    /// Attempt up to `max_attempts` replacements until one passes the quality
    /// policy. The accepted outcome is persisted before returning.
    pub async fn run(
        &self,
        max_attempts: u32,
        asn: u32,
        progress: &dyn ProgressObserver,
    ) -> Result<AcceptanceOutcome, AcquisitionError> {
        info!("Starting search for high quality IP. ASN: {}, Max Tries: {}", asn, max_attempts);

        let mut last = None;
        for attempt in 1..=max_attempts {
            progress.on_progress(&Progress::AttemptStarted { attempt, max_attempts });

            let result = self.attempt(attempt, asn, progress).await;
            if let Some(outcome) = result.outcome() {
                let path = self.store.save_outcome(&outcome)?;
                info!("Accepted {} on attempt {}, saved to {}", outcome.ip, attempt, path.display());
                progress.on_progress(&Progress::Accepted {
                    attempt,
                    ip: outcome.ip.clone(),
                });
                return Ok(outcome);
            }
            last = Some(Box::new(result));
        }

        info!("Finished {} attempts without finding a suitable IP", max_attempts);
        progress.on_progress(&Progress::Exhausted { attempts: max_attempts });
        Err(AcquisitionError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }

    /// Run one full attempt: probe, replace, check, persist and score.
    ///
    /// Failures are folded into the returned record, never propagated.
    pub async fn attempt(&self, attempt: u32, asn: u32, progress: &dyn ProgressObserver) -> AttemptResult {
        let mut trace = Trace::default();

        let report = match self.obtain_report(asn, progress, &mut trace).await {
            Ok(report) => report,
            Err(err) => {
                info!("Attempt {} failed: {}", attempt, err);
                progress.on_progress(&Progress::AttemptFailed {
                    attempt,
                    step: err.step().to_string(),
                    reason: err.to_string(),
                });
                return trace.finish(attempt, AttemptStatus::Failed(err));
            }
        };

        let score = scorer::score(&report);
        trace.stage = AttemptStage::Scored;
        let ip = trace.ip.clone().unwrap_or_default();
        info!(
            "IP: {} counts -> low risk: {}, commercial: {}",
            ip, score.risk_count, score.commercial_count
        );
        progress.on_progress(&Progress::Scored {
            ip,
            low_risk: score.risk_count,
            commercial: score.commercial_count,
            acceptable: score.is_acceptable,
        });

        let status = if score.is_acceptable {
            AttemptStatus::Accepted(score)
        } else {
            AttemptStatus::Rejected(score)
        };
        trace.finish(attempt, status)
    }

    /// Run one attempt without scoring it, as the tool-callable entry point
    /// does. The report is persisted; no acceptance artifact is written.
    pub async fn attempt_once(&self, asn: u32, progress: &dyn ProgressObserver) -> SingleAttempt {
        let mut trace = Trace::default();

        match self.obtain_report(asn, progress, &mut trace).await {
            Ok(report) => SingleAttempt::Success {
                ip: trace.ip.unwrap_or_default(),
                socks_url: trace.socks_url.unwrap_or_default(),
                report,
            },
            Err(err) => SingleAttempt::Failed {
                step: err.step(),
                ip: trace.ip,
                message: err.to_string(),
            },
        }
    }

    async fn obtain_report(
        &self,
        asn: u32,
        progress: &dyn ProgressObserver,
        trace: &mut Trace,
    ) -> Result<String, AttemptError> {
        progress.on_progress(&Progress::CheckingConnectivity);
        self.probe.probe().await?;
        trace.stage = AttemptStage::ConnectivityChecked;

        progress.on_progress(&Progress::ReplacingIp { asn });
        let record = self.replacer.replace(asn, progress).await?;
        let endpoint = SocksEndpoint::from_record(&self.credential, &record);
        trace.stage = AttemptStage::Replaced;
        trace.ip = Some(record.new_ip.clone());
        trace.socks_url = Some(endpoint.url());
        progress.on_progress(&Progress::Replaced {
            previous_ip: record.previous_ip.clone(),
            new_ip: record.new_ip.clone(),
            port: record.new_port,
        });

        progress.on_progress(&Progress::CheckingQuality {
            ip: record.new_ip.clone(),
        });
        info!("Checking quality of {}", endpoint.redacted_url());
        let report = self.checker.check(&endpoint.url()).await?;
        trace.stage = AttemptStage::Checked;
        trace.report = Some(report.clone());

        match self.store.save_report(&record.new_ip, &report) {
            Ok(path) => {
                info!("Report saved to {}", path.display());
                progress.on_progress(&Progress::ReportSaved {
                    ip: record.new_ip.clone(),
                    path: path.display().to_string(),
                });
                trace.report_path = Some(path);
            }
            Err(e) => warn!("Failed to save report for {}: {}", record.new_ip, e),
        }

        Ok(report)
    }
}
