//! Client for the proxy provider's replacement API.
//!
//! A replacement is three steps against live provider state: read the plan's
//! most recently replaced proxy, ask the provider to swap that IP for any IP of
//! an ASN, then poll the same listing until it reports a different IP. Nothing
//! here retries beyond the poll budget; the acquisition loop owns retries.

use crate::config::{AcquisitionConfig, Settings};
use crate::error::{AcquisitionError, ConfigError, ReplacementError};
use crate::progress::{Progress, ProgressObserver};
use crate::proxy::ReplacementRecord;
use crate::utils;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use url::Url;

/// Swaps the plan's current IP for a fresh one.
#[async_trait]
pub trait ProxyReplacer: Send + Sync {
    /// Replace the current IP with one from `asn` and wait for the provider to
    /// report it. Each call works against the provider's state as it is now.
    async fn replace(&self, asn: u32, progress: &dyn ProgressObserver) -> Result<ReplacementRecord, ReplacementError>;
}

/// Entry of the "replaced proxies" listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplacedProxy {
    #[serde(default)]
    pub replaced_with: Option<String>,
    #[serde(default)]
    pub replaced_with_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ReplacedPage {
    #[serde(default)]
    results: Vec<ReplacedProxy>,
}

#[derive(Debug, Serialize)]
struct ReplaceRequest<'a> {
    to_replace: ToReplace<'a>,
    replace_with: [ReplaceWith; 1],
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct ToReplace<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    ip_addresses: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct ReplaceWith {
    #[serde(rename = "type")]
    kind: &'static str,
    asn_numbers: [u32; 1],
}

impl<'a> ReplaceRequest<'a> {
    fn by_asn(ip: &'a str, asn: u32) -> Self {
        Self {
            to_replace: ToReplace {
                kind: "ip_address",
                ip_addresses: [ip],
            },
            replace_with: [ReplaceWith {
                kind: "asn",
                asn_numbers: [asn],
            }],
            dry_run: false,
        }
    }
}

/// Webshare API client bound to one plan.
pub struct WebshareClient {
    client: ClientWithMiddleware,
    token: String,
    plan_id: String,
    list_url: Url,
    replace_url: Url,
    settle_delay: Duration,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl WebshareClient {
    /// Create a client for the plan in `settings`, using the endpoints and
    /// timings from `config`.
    pub fn new(settings: &Settings, config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        let base = Url::parse(&config.api_base).map_err(|e| invalid_base(e.to_string()))?;

        let mut list_url = base
            .join("proxy/list/replaced/")
            .map_err(|e| invalid_base(e.to_string()))?;
        list_url
            .query_pairs_mut()
            .append_pair("page", "1")
            .append_pair("page_size", "1")
            .append_pair("plan_id", &settings.plan_id);

        let mut replace_url = base.join("proxy/replace/").map_err(|e| invalid_base(e.to_string()))?;
        replace_url.query_pairs_mut().append_pair("plan_id", &settings.plan_id);

        Ok(Self {
            client: utils::provider_client(settings, config.request_timeout)?,
            token: settings.token.clone(),
            plan_id: settings.plan_id.clone(),
            list_url,
            replace_url,
            settle_delay: config.settle_delay,
            poll_attempts: config.poll_attempts,
            poll_interval: config.poll_interval,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, "Mozilla/5.0")
            .header(COOKIE, format!("ssotoken={}", self.token))
    }

    /// Fetch the plan's most recently replaced proxy, if the provider lists one.
    pub async fn latest_replaced(&self) -> Result<Option<ReplacedProxy>, ReplacementError> {
        let response = self
            .authorized(self.client.get(self.list_url.clone()))
            .send()
            .await?
            .error_for_status()?;
        let page: ReplacedPage = response.json().await?;

        Ok(page.results.into_iter().next())
    }

    /// Ask the provider to replace `ip` with any proxy of `asn`.
    pub async fn request_replacement(&self, ip: &str, asn: u32) -> Result<(), ReplacementError> {
        let body = serde_json::to_vec(&ReplaceRequest::by_asn(ip, asn))?;
        let response = self
            .authorized(self.client.post(self.replace_url.clone()))
            .body(body)
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 => Ok(()),
            status => Err(ReplacementError::Rejected {
                ip: ip.to_string(),
                status,
            }),
        }
    }

    /// Poll the listing until it reports an IP other than `previous_ip`.
    ///
    /// Failed or empty polls, and entries with a blank IP, count as "not yet"; they use up budget like any
    /// other poll.
    async fn await_convergence(
        &self,
        previous_ip: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<ReplacementRecord, ReplacementError> {
        for poll in 1..=self.poll_attempts {
            progress.on_progress(&Progress::Polling {
                poll,
                of: self.poll_attempts,
            });

            match self.latest_replaced().await {
                Ok(Some(entry)) => match entry.replaced_with.filter(|ip| !ip.is_empty()) {
                    Some(ip) if ip != previous_ip => {
                        let port = entry
                            .replaced_with_port
                            .ok_or_else(|| ReplacementError::MissingPort { ip: ip.clone() })?;
                        return Ok(ReplacementRecord {
                            previous_ip: previous_ip.to_string(),
                            new_ip: ip,
                            new_port: port,
                        });
                    }
                    _ => debug!("Poll {}/{}: provider still reports {}", poll, self.poll_attempts, previous_ip),
                },
                Ok(None) => debug!("Poll {}/{}: no replaced proxy listed", poll, self.poll_attempts),
                Err(e) => debug!("Poll {}/{} failed: {}", poll, self.poll_attempts, e),
            }

            if poll < self.poll_attempts {
                time::sleep(self.poll_interval).await;
            }
        }

        Err(ReplacementError::ConvergenceTimeout {
            previous_ip: previous_ip.to_string(),
            polls: self.poll_attempts,
        })
    }
}

fn invalid_base(reason: String) -> AcquisitionError {
    AcquisitionError::Configuration(ConfigError::Invalid { key: "api_base", reason })
}

#[async_trait]
impl ProxyReplacer for WebshareClient {
    async fn replace(&self, asn: u32, progress: &dyn ProgressObserver) -> Result<ReplacementRecord, ReplacementError> {
        let current_ip = self
            .latest_replaced()
            .await?
            .and_then(|entry| entry.replaced_with)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| ReplacementError::NoCurrentProxy {
                plan_id: self.plan_id.clone(),
            })?;
        info!("Replacing current IP {} with one from ASN {}", current_ip, asn);

        self.request_replacement(&current_ip, asn).await?;

        progress.on_progress(&Progress::Settling {
            delay_ms: self.settle_delay.as_millis() as u64,
        });
        time::sleep(self.settle_delay).await;

        let record = self.await_convergence(&current_ip, progress).await?;
        info!("Provider switched {} -> {}:{}", record.previous_ip, record.new_ip, record.new_port);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoProgress, ProgressRecorder};
    use crate::proxy::ProxyCredential;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(ip: &str, port: u16) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "results": [{ "replaced_with": ip, "replaced_with_port": port }]
        }))
    }

    fn client_for(server: &MockServer, polls: u32) -> WebshareClient {
        client_with_timings(server, Duration::ZERO, Duration::from_millis(1), polls)
    }

    fn client_with_timings(server: &MockServer, settle: Duration, interval: Duration, polls: u32) -> WebshareClient {
        let settings = Settings {
            token: "tok".into(),
            plan_id: "77".into(),
            credential: ProxyCredential::new("u", "p"),
            http_proxy: None,
            https_proxy: None,
        };
        let config = AcquisitionConfig::builder()
            .api_base(format!("{}/api/v2", server.uri()))
            .settle_delay(settle)
            .poll_interval(interval)
            .poll_attempts(polls)
            .build();
        WebshareClient::new(&settings, &config).unwrap()
    }

    async fn mount_replace(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/api/v2/proxy/replace/"))
            .and(query_param("plan_id", "77"))
            .and(body_json(json!({
                "to_replace": { "type": "ip_address", "ip_addresses": ["1.1.1.1"] },
                "replace_with": [{ "type": "asn", "asn_numbers": [6079] }],
                "dry_run": false
            })))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn lists_latest_replaced_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/proxy/list/replaced/"))
            .and(query_param("page", "1"))
            .and(query_param("page_size", "1"))
            .and(query_param("plan_id", "77"))
            .and(header("authorization", "Token tok"))
            .and(header("cookie", "ssotoken=tok"))
            .respond_with(listing("1.1.1.1", 6000))
            .mount(&server)
            .await;

        let entry = client_for(&server, 5).latest_replaced().await.unwrap().unwrap();
        assert_eq!(entry.replaced_with.as_deref(), Some("1.1.1.1"));
        assert_eq!(entry.replaced_with_port, Some(6000));
    }

    #[tokio::test]
    async fn replaces_once_ip_changes() {
        let server = MockServer::start().await;
        // first listing is the pre-replacement read, second is the first poll
        Mock::given(method("GET"))
            .and(path("/api/v2/proxy/list/replaced/"))
            .respond_with(listing("1.1.1.1", 6000))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/proxy/list/replaced/"))
            .respond_with(listing("2.2.2.2", 6100))
            .mount(&server)
            .await;
        mount_replace(&server, 201).await;

        let recorder = ProgressRecorder::new();
        let record = client_for(&server, 5).replace(6079, &recorder).await.unwrap();

        assert_eq!(
            record,
            ReplacementRecord {
                previous_ip: "1.1.1.1".into(),
                new_ip: "2.2.2.2".into(),
                new_port: 6100,
            }
        );
        let polls = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Progress::Polling { .. }))
            .count();
        assert_eq!(polls, 2);
    }

    #[tokio::test]
    async fn fails_without_current_proxy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/proxy/list/replaced/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server, 5).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(err, ReplacementError::NoCurrentProxy { ref plan_id } if plan_id == "77"));
    }

    #[tokio::test]
    async fn fails_when_replacement_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .expect(1)
            .mount(&server)
            .await;
        mount_replace(&server, 400).await;

        let err = client_for(&server, 5).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(err, ReplacementError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn times_out_when_ip_never_changes() {
        let server = MockServer::start().await;
        // one initial read plus exactly five polls
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .expect(6)
            .mount(&server)
            .await;
        mount_replace(&server, 200).await;

        let err = client_for(&server, 5).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(
            err,
            ReplacementError::ConvergenceTimeout { ref previous_ip, polls: 5 } if previous_ip == "1.1.1.1"
        ));
    }

    #[tokio::test]
    async fn waits_to_settle_and_between_polls_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .expect(4)
            .mount(&server)
            .await;
        mount_replace(&server, 200).await;

        let client = client_with_timings(&server, Duration::from_millis(200), Duration::from_millis(100), 3);
        let started = std::time::Instant::now();
        let err = client.replace(6079, &NoProgress).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ReplacementError::ConvergenceTimeout { polls: 3, .. }));
        // settle (200 ms) plus two gaps (2 x 100 ms), no sleep after the last poll
        assert!(elapsed >= Duration::from_millis(400), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "slept after the last poll: {elapsed:?}");
    }

    #[tokio::test]
    async fn blank_current_ip_is_not_a_proxy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("", 6000))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server, 5).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(err, ReplacementError::NoCurrentProxy { .. }));
    }

    #[tokio::test]
    async fn blank_polled_ip_does_not_converge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(listing("", 6100))
            .expect(2)
            .mount(&server)
            .await;
        mount_replace(&server, 200).await;

        let err = client_for(&server, 2).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(
            err,
            ReplacementError::ConvergenceTimeout { ref previous_ip, polls: 2 } if previous_ip == "1.1.1.1"
        ));
    }

    #[tokio::test]
    async fn failed_polls_use_up_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(listing("3.3.3.3", 7000))
            .mount(&server)
            .await;
        mount_replace(&server, 200).await;

        let record = client_for(&server, 3).replace(6079, &NoProgress).await.unwrap();
        assert_eq!(record.new_ip, "3.3.3.3");

        let err = {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(listing("1.1.1.1", 6000))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(502))
                .mount(&server)
                .await;
            mount_replace(&server, 200).await;
            client_for(&server, 2).replace(6079, &NoProgress).await.unwrap_err()
        };
        assert!(matches!(err, ReplacementError::ConvergenceTimeout { polls: 2, .. }));
    }

    #[tokio::test]
    async fn converged_entry_needs_a_port() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(listing("1.1.1.1", 6000))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "replaced_with": "2.2.2.2", "replaced_with_port": null }]
            })))
            .mount(&server)
            .await;
        mount_replace(&server, 200).await;

        let err = client_for(&server, 5).replace(6079, &NoProgress).await.unwrap_err();
        assert!(matches!(err, ReplacementError::MissingPort { ref ip } if ip == "2.2.2.2"));
    }

    #[test]
    fn rejects_unparsable_api_base() {
        let settings = Settings {
            token: "tok".into(),
            plan_id: "77".into(),
            credential: ProxyCredential::new("u", "p"),
            http_proxy: None,
            https_proxy: None,
        };
        let config = AcquisitionConfig::builder().api_base("not a url").build();
        assert!(matches!(
            WebshareClient::new(&settings, &config),
            Err(AcquisitionError::Configuration(ConfigError::Invalid { key: "api_base", .. }))
        ));
    }
}
