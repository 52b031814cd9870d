//! Configuration for an acquisition run.
//!
//! Two layers: [`Settings`] holds the credentials and forward proxies read from
//! the environment, [`AcquisitionConfig`] holds the tunable policy values of
//! the replace-and-verify loop. Every default in the latter was tuned by hand
//! against the provider and the reputation tool; none is structurally required.

use crate::error::ConfigError;
use crate::proxy::ProxyCredential;

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Provider API token.
pub const ENV_TOKEN: &str = "WEBSHARE_TOKEN";
/// Plan whose current proxy gets replaced.
pub const ENV_PLAN_ID: &str = "WEBSHARE_PLAN_ID";
/// SOCKS5 username of the leased proxies.
pub const ENV_SOCKS_USERNAME: &str = "WEBSHARE_SOCKS_USERNAME";
/// SOCKS5 password of the leased proxies.
pub const ENV_SOCKS_PASSWORD: &str = "WEBSHARE_SOCKS_PASSWORD";
/// Optional forward proxy for plain HTTP traffic to the provider.
pub const ENV_HTTP_PROXY: &str = "HTTP_PROXY";
/// Optional forward proxy for HTTPS traffic to the provider.
pub const ENV_HTTPS_PROXY: &str = "HTTPS_PROXY";

/// Keys that must be present and non-empty.
pub const REQUIRED_KEYS: [&str; 4] = [ENV_TOKEN, ENV_PLAN_ID, ENV_SOCKS_USERNAME, ENV_SOCKS_PASSWORD];

/// Every key the crate reads, reported on validation failure.
pub const RECOGNIZED_KEYS: [&str; 6] = [
    ENV_TOKEN,
    ENV_PLAN_ID,
    ENV_SOCKS_USERNAME,
    ENV_SOCKS_PASSWORD,
    ENV_HTTP_PROXY,
    ENV_HTTPS_PROXY,
];

/// Default ASN replacement IPs are drawn from.
pub const DEFAULT_ASN: u32 = 6079;
/// Default attempt budget of the acquisition loop.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
/// Timeout of the provider reachability check.
pub const DEFAULT_CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout of each list/replace call against the provider API.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait between the replace request and the first poll.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);
/// Number of polls before giving up on convergence.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
/// Wait between two convergence polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound for one run of the reputation-check command.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(300);
/// Provider API root.
pub const DEFAULT_API_BASE: &str = "https://proxy.webshare.io/api/v2/";
/// Public page probed before spending replacement quota.
pub const DEFAULT_CONNECTIVITY_URL: &str = "https://dashboard.webshare.io";
/// Reputation-check command; `{socks_url}` is substituted before running it.
pub const DEFAULT_CHECK_COMMAND: &str = "bash <(curl -Ls IP.Check.Place) -x {socks_url}";
/// Shell that runs the check command. Process substitution needs bash.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Credentials and network settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Provider API token, sent as header and session cookie.
    pub token: String,
    /// Provider plan id.
    pub plan_id: String,
    /// SOCKS5 credentials embedded in the proxy URL under test.
    pub credential: ProxyCredential,
    /// Forward proxy for `http://` provider traffic.
    pub http_proxy: Option<String>,
    /// Forward proxy for `https://` provider traffic.
    pub https_proxy: Option<String>,
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present;
    /// variables already set in the environment win.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    ///
    /// Empty values count as missing. All missing required keys are reported
    /// together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing { missing });
        }

        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing { missing: vec![key] });

        Ok(Self {
            token: required(ENV_TOKEN)?,
            plan_id: required(ENV_PLAN_ID)?,
            credential: ProxyCredential::new(required(ENV_SOCKS_USERNAME)?, required(ENV_SOCKS_PASSWORD)?),
            http_proxy: forward_proxy(ENV_HTTP_PROXY, get(ENV_HTTP_PROXY))?,
            https_proxy: forward_proxy(ENV_HTTPS_PROXY, get(ENV_HTTPS_PROXY))?,
        })
    }

    /// Whether any forward proxy is configured.
    pub fn has_forward_proxy(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some()
    }
}

fn forward_proxy(key: &'static str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        Some(raw) => match Url::parse(&raw) {
            Ok(_) => Ok(Some(raw)),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        },
        None => Ok(None),
    }
}

/// Policy values of the replace-and-verify loop.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// ASN replacement IPs are drawn from.
    pub asn: u32,
    /// Attempt budget of [`crate::Acquisition::run`].
    pub max_attempts: u32,
    /// Timeout of the reachability check.
    pub connectivity_timeout: Duration,
    /// Timeout of each provider API call.
    pub request_timeout: Duration,
    /// Wait after the replace request before polling.
    pub settle_delay: Duration,
    /// Convergence poll budget.
    pub poll_attempts: u32,
    /// Wait between convergence polls.
    pub poll_interval: Duration,
    /// Upper bound for the reputation-check command.
    pub check_timeout: Duration,
    /// Provider API root, with trailing slash.
    pub api_base: String,
    /// Page probed by the connectivity check.
    pub connectivity_url: String,
    /// Reputation-check command template.
    pub check_command: String,
    /// Shell used to run the check command.
    pub shell: String,
    /// Directory receiving reports and the acceptance artifact.
    pub output_dir: PathBuf,
}

impl AcquisitionConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AcquisitionConfigBuilder {
        AcquisitionConfigBuilder::new()
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfigBuilder::new().build()
    }
}

/// Builder for `AcquisitionConfig`.
pub struct AcquisitionConfigBuilder {
    asn: Option<u32>,
    max_attempts: Option<u32>,
    connectivity_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    settle_delay: Option<Duration>,
    poll_attempts: Option<u32>,
    poll_interval: Option<Duration>,
    check_timeout: Option<Duration>,
    api_base: Option<String>,
    connectivity_url: Option<String>,
    check_command: Option<String>,
    shell: Option<String>,
    output_dir: Option<PathBuf>,
}

impl AcquisitionConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            asn: None,
            max_attempts: None,
            connectivity_timeout: None,
            request_timeout: None,
            settle_delay: None,
            poll_attempts: None,
            poll_interval: None,
            check_timeout: None,
            api_base: None,
            connectivity_url: None,
            check_command: None,
            shell: None,
            output_dir: None,
        }
    }

    /// Set the ASN replacement IPs are drawn from.
    pub fn asn(mut self, asn: u32) -> Self {
        self.asn = Some(asn);
        self
    }

    /// Set the attempt budget.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the timeout of the reachability check.
    pub fn connectivity_timeout(mut self, timeout: Duration) -> Self {
        self.connectivity_timeout = Some(timeout);
        self
    }

    /// Set the timeout of each provider API call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the wait between the replace request and the first poll.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    /// Set the number of convergence polls.
    pub fn poll_attempts(mut self, polls: u32) -> Self {
        self.poll_attempts = Some(polls);
        self
    }

    /// Set the wait between convergence polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the upper bound of the reputation-check command.
    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    /// Set the provider API root.
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Set the page probed by the connectivity check.
    pub fn connectivity_url(mut self, url: impl Into<String>) -> Self {
        self.connectivity_url = Some(url.into());
        self
    }

    /// Set the reputation-check command template.
    pub fn check_command(mut self, command: impl Into<String>) -> Self {
        self.check_command = Some(command.into());
        self
    }

    /// Set the shell that runs the check command.
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Set the directory receiving reports and the acceptance artifact.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> AcquisitionConfig {
        let mut api_base = self.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.ends_with('/') {
            api_base.push('/');
        }

        AcquisitionConfig {
            asn: self.asn.unwrap_or(DEFAULT_ASN),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            connectivity_timeout: self.connectivity_timeout.unwrap_or(DEFAULT_CONNECTIVITY_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            settle_delay: self.settle_delay.unwrap_or(DEFAULT_SETTLE_DELAY),
            poll_attempts: self.poll_attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            check_timeout: self.check_timeout.unwrap_or(DEFAULT_CHECK_TIMEOUT),
            api_base,
            connectivity_url: self.connectivity_url.unwrap_or_else(|| DEFAULT_CONNECTIVITY_URL.to_string()),
            check_command: self.check_command.unwrap_or_else(|| DEFAULT_CHECK_COMMAND.to_string()),
            shell: self.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl Default for AcquisitionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_all_keys() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_TOKEN, "tok"),
            (ENV_PLAN_ID, "42"),
            (ENV_SOCKS_USERNAME, "user"),
            (ENV_SOCKS_PASSWORD, "pass"),
            (ENV_HTTPS_PROXY, "http://127.0.0.1:7890"),
        ]))
        .unwrap();

        assert_eq!(settings.token, "tok");
        assert_eq!(settings.plan_id, "42");
        assert_eq!(settings.credential.username(), "user");
        assert_eq!(settings.credential.password(), "pass");
        assert_eq!(settings.http_proxy, None);
        assert_eq!(settings.https_proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert!(settings.has_forward_proxy());
    }

    #[test]
    fn reports_every_missing_key() {
        let err = Settings::from_lookup(lookup(&[(ENV_TOKEN, "tok"), (ENV_SOCKS_PASSWORD, "  ")])).unwrap_err();

        match &err {
            ConfigError::Missing { missing } => {
                assert_eq!(missing, &vec![ENV_PLAN_ID, ENV_SOCKS_USERNAME, ENV_SOCKS_PASSWORD]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains(ENV_PLAN_ID));
        assert!(message.contains(ENV_HTTPS_PROXY), "recognized keys listed: {message}");
    }

    #[test]
    fn rejects_malformed_forward_proxy() {
        let err = Settings::from_lookup(lookup(&[
            (ENV_TOKEN, "tok"),
            (ENV_PLAN_ID, "42"),
            (ENV_SOCKS_USERNAME, "user"),
            (ENV_SOCKS_PASSWORD, "pass"),
            (ENV_HTTP_PROXY, "not a url"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { key: ENV_HTTP_PROXY, .. }));
    }

    #[test]
    fn builder_defaults() {
        let config = AcquisitionConfig::builder().build();
        assert_eq!(config.asn, 6079);
        assert_eq!(config.max_attempts, 50);
        assert_eq!(config.connectivity_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.settle_delay, Duration::from_secs(5));
        assert_eq!(config.poll_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.check_timeout, Duration::from_secs(300));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.output_dir, PathBuf::from("."));
    }

    #[test]
    fn api_base_gets_trailing_slash() {
        let config = AcquisitionConfig::builder().api_base("http://127.0.0.1:9000/api/v2").build();
        assert_eq!(config.api_base, "http://127.0.0.1:9000/api/v2/");
    }
}
