//! Request logging middleware for the portal HTTP client.

use crate::utils::{fmt_duration, log_if_slow};
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// Logs method, path, status and latency of every request.
///
/// Query strings are left out: some endpoints key on the username.
pub struct RequestLogger;

#[async_trait::async_trait]
impl Middleware for RequestLogger {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().clone();
        let endpoint = format!(
            "{}{}",
            req.url().host_str().unwrap_or_default(),
            req.url().path()
        );
        let start = Instant::now();

        let result = next.run(req, extensions).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => trace!(
                method = %method,
                endpoint,
                status = response.status().as_u16(),
                duration = fmt_duration(duration),
                "request completed"
            ),
            Err(e) => debug!(
                method = %method,
                endpoint,
                duration = fmt_duration(duration),
                error = %e,
                "request failed"
            ),
        }
        log_if_slow(start, SLOW_REQUEST_THRESHOLD, &endpoint);

        result
    }
}
