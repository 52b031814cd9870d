//! Utility functions shared by the network components.

use crate::config::Settings;
use crate::middleware::ProviderLogMiddleware;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::time::Duration;

/// Build a client that reaches the provider through the configured forward
/// proxies, if any. Proxy variables are only honored through `Settings`.
pub(crate) fn forward_proxy_client(settings: &Settings, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().timeout(timeout).no_proxy();

    if let Some(url) = &settings.http_proxy {
        builder = builder.proxy(reqwest::Proxy::http(url)?);
    }
    if let Some(url) = &settings.https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(url)?);
    }

    builder.build()
}

/// Same as [`forward_proxy_client`], with provider request logging.
pub(crate) fn provider_client(settings: &Settings, timeout: Duration) -> Result<ClientWithMiddleware, reqwest::Error> {
    let client = forward_proxy_client(settings, timeout)?;
    Ok(ClientBuilder::new(client).with(ProviderLogMiddleware).build())
}

/// Substitute `{socks_url}` in a command template.
pub(crate) fn render_command(template: &str, socks_url: &str) -> String {
    template.replace("{socks_url}", socks_url)
}
