//! Durable outputs: one report file per checked IP and the acceptance artifact.

use crate::acquisition::AcceptanceOutcome;

use std::fs;
use std::io;
use std::path::PathBuf;

/// File name of the acceptance artifact.
pub const OUTCOME_FILE: &str = "found_ip.json";

/// Where reports and the acceptance artifact end up.
pub trait ReportStore: Send + Sync {
    /// Persist the raw report checked for `ip`, replacing any earlier one.
    fn save_report(&self, ip: &str, report: &str) -> io::Result<PathBuf>;
    /// Persist the accepted outcome.
    fn save_outcome(&self, outcome: &AcceptanceOutcome) -> io::Result<PathBuf>;
}

/// Writes into a directory: `<ip>-report.log` per IP and [`OUTCOME_FILE`].
#[derive(Debug, Clone)]
pub struct FsReportStore {
    dir: PathBuf,
}

impl FsReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the report file for `ip`.
    pub fn report_path(&self, ip: &str) -> PathBuf {
        // IPv6 colons are not portable in file names
        self.dir.join(format!("{}-report.log", ip.replace(':', "_")))
    }

    pub fn outcome_path(&self) -> PathBuf {
        self.dir.join(OUTCOME_FILE)
    }
}

impl ReportStore for FsReportStore {
    fn save_report(&self, ip: &str, report: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.report_path(ip);
        fs::write(&path, report)?;
        Ok(path)
    }

    fn save_outcome(&self, outcome: &AcceptanceOutcome) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.outcome_path();
        let json = serde_json::to_string_pretty(outcome)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn report_is_named_after_ip_and_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = FsReportStore::new(tmp.path());

        let path = store.save_report("2.2.2.2", "first").unwrap();
        assert_eq!(path, tmp.path().join("2.2.2.2-report.log"));
        store.save_report("2.2.2.2", "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let store = FsReportStore::new(tmp.path().join("nested/out"));
        let path = store.save_report("2001:db8::1", "r").unwrap();
        assert!(path.ends_with("2001_db8__1-report.log"));
    }

    #[test]
    fn outcome_is_pretty_json_with_raw_text() {
        let tmp = TempDir::new().unwrap();
        let store = FsReportStore::new(tmp.path());
        let outcome = AcceptanceOutcome {
            ip: "2.2.2.2".into(),
            socks_url: "socks5://u:p@2.2.2.2:6000".into(),
            report: "低风险".into(),
        };

        let path = store.save_outcome(&outcome).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("低风险"), "non-ASCII kept as is: {text}");

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["ip"], "2.2.2.2");
        assert_eq!(value["socks_url"], "socks5://u:p@2.2.2.2:6000");
    }
}
