//! Scoring of reputation reports.
//!
//! The acceptance rule is a fixed policy, not derived from anything: an IP
//! passes when at least [`MIN_LOW_RISK`] signal sources rate it low risk and at
//! most [`MAX_COMMERCIAL`] classify it as commercial. Both numbers were picked
//! by hand against real reports.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Marker the reputation tool prints for a low-risk rating.
pub const LOW_RISK_MARKER: &str = "低风险";
/// Marker the reputation tool prints for a commercial/datacenter rating.
pub const COMMERCIAL_MARKER: &str = "商业";
/// Minimum number of low-risk ratings for acceptance.
pub const MIN_LOW_RISK: usize = 6;
/// Maximum number of commercial ratings for acceptance.
pub const MAX_COMMERCIAL: usize = 2;

/// Classification of one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityScore {
    pub is_acceptable: bool,
    pub risk_count: usize,
    pub commercial_count: usize,
}

static ANSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ANSI pattern is valid"));

/// Remove terminal escape sequences (colors, cursor movement) from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

/// Score a raw report. Escape sequences are stripped before counting.
pub fn score(report: &str) -> QualityScore {
    let clean = strip_ansi(report);
    let risk_count = clean.matches(LOW_RISK_MARKER).count();
    let commercial_count = clean.matches(COMMERCIAL_MARKER).count();

    QualityScore {
        is_acceptable: risk_count >= MIN_LOW_RISK && commercial_count <= MAX_COMMERCIAL,
        risk_count,
        commercial_count,
    }
}
