//! # proxy-quality-hunter
//!
//! Rotates a leased SOCKS5 proxy IP through the Webshare API until an external
//! reputation check rates the new IP as clean.
//!
//! Each attempt checks that the provider is reachable, replaces the plan's
//! current IP with one from a chosen ASN, waits for the provider to report the
//! new IP, runs the reputation tool through the new proxy and scores its report.
//! Attempts repeat until one is accepted or the attempt budget runs out.

pub mod acquisition;
pub mod checker;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod middleware;
pub mod progress;
pub mod provider;
pub mod proxy;
pub mod scorer;
pub mod store;
mod utils;

pub use acquisition::{AcceptanceOutcome, Acquisition, AttemptResult, AttemptStage, AttemptStatus, SingleAttempt};
pub use checker::{CommandChecker, QualityChecker};
pub use config::{AcquisitionConfig, AcquisitionConfigBuilder, Settings};
pub use connectivity::{ConnectivityProbe, HttpConnectivityProbe};
pub use error::{AcquisitionError, AttemptError, CheckError, ConfigError, ConnectivityError, ReplacementError};
pub use middleware::ProviderLogMiddleware;
pub use progress::{JsonProgress, LogProgress, NoProgress, Progress, ProgressObserver, ProgressRecorder, ProgressReporter};
pub use provider::{ProxyReplacer, WebshareClient};
pub use proxy::{ProxyCredential, ReplacementRecord, SocksEndpoint};
pub use scorer::{score, strip_ansi, QualityScore};
pub use store::{FsReportStore, ReportStore};
