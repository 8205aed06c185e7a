use anyhow::{Context, Result};
use http::Extensions;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("orgbot/", env!("CARGO_PKG_VERSION"));

/// Logs every outgoing request with its status and latency.
///
/// Only the method and URL path are logged. Query strings and headers may
/// carry tokens.
pub struct TimingMiddleware {
    service: &'static str,
}

impl TimingMiddleware {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl Middleware for TimingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let started = Instant::now();

        let response = next.run(req, extensions).await;

        let elapsed_ms = started.elapsed().as_millis();
        match &response {
            Ok(resp) => debug!(
                "{} {} {} -> {} in {}ms",
                self.service,
                method,
                path,
                resp.status(),
                elapsed_ms
            ),
            Err(e) => warn!(
                "{} {} {} failed after {}ms: {}",
                self.service, method, path, elapsed_ms, e
            ),
        }

        response
    }
}

/// HTTP client used for all outbound calls. Every request carries `timeout`.
pub fn create_http_client(service: &'static str, timeout: Duration) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client)
        .with(TimingMiddleware::new(service))
        .build())
}
