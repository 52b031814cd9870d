//! Request logging middleware for provider API calls.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest_middleware::{Middleware, Next, Result};
use std::time::Instant;

/// Logs method, path, status and latency of every provider request.
///
/// Query strings are left out of the log line since they carry the plan id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderLogMiddleware;

#[async_trait]
impl Middleware for ProviderLogMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let start = Instant::now();

        let result = next.run(req, extensions).await;
        let elapsed = start.elapsed().as_millis();

        match &result {
            Ok(response) => {
                debug!("{} {} -> {} ({} ms)", method, path, response.status(), elapsed);
            }
            Err(err) => {
                warn!("{} {} failed after {} ms: {}", method, path, elapsed, err);
            }
        }

        result
    }
}
