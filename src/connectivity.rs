//! Reachability gate run before any replacement quota is spent.

use crate::config::{AcquisitionConfig, Settings};
use crate::error::ConnectivityError;
use crate::utils;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};

/// Checks that the provider can be reached at all.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// `Ok(())` when reachable; the error's message is the diagnostic detail.
    async fn probe(&self) -> Result<(), ConnectivityError>;
}

/// Probes the provider's public page through the configured forward proxy.
pub struct HttpConnectivityProbe {
    client: Client,
    url: String,
    via_proxy: bool,
}

impl HttpConnectivityProbe {
    /// Create a probe with the connectivity URL and timeout from `config`.
    pub fn new(settings: &Settings, config: &AcquisitionConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: utils::forward_proxy_client(settings, config.connectivity_timeout)?,
            url: config.connectivity_url.clone(),
            via_proxy: settings.has_forward_proxy(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> ConnectivityError {
        if err.is_timeout() {
            ConnectivityError::Timeout
        } else if err.is_connect() && self.via_proxy {
            ConnectivityError::Proxy(err.to_string())
        } else if err.is_connect() {
            ConnectivityError::Connection(err.to_string())
        } else {
            ConnectivityError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn probe(&self) -> Result<(), ConnectivityError> {
        debug!("Probing provider connectivity at {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| self.classify(e))?;
        // only a plain 200 counts; redirects have already been followed
        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(ConnectivityError::Status(status.as_u16()))
        }
    }
}
