mod error;
mod retry;

pub use error::{FetchErrorKind, HttpError};
pub use retry::{backoff_delay, run_with_retry, RetryPolicy, RetryTerminal};

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;

/// The reviews endpoint refuses requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; steam-review-ingest)";

/// Process-local limiter shared by every outbound source request in a run.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn global_rate_limiter(requests_per_second: NonZeroU32) -> GlobalRateLimiter {
    Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second)))
}

/// Outbound HTTP client for the third-party sources.
///
/// Every call waits on the shared limiter before it is sent, and failures come back as a
/// classified `HttpError` so callers decide between retry and abandon without string matching.
#[derive(Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    limiter: GlobalRateLimiter,
}

impl SourceClient {
    pub fn new(timeout: Duration, limiter: GlobalRateLimiter) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, limiter })
    }

    /// GETs `url` with `query` and decodes the body as JSON.
    ///
    /// `resource` names the thing being fetched in errors and logs.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest(resource, err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| HttpError::from_reqwest(resource, err))?;
        if !status.is_success() {
            return Err(HttpError::unexpected_status(resource, status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|source| HttpError::Decode {
            resource: resource.to_string(),
            source,
        })
    }

    /// Connectivity check run once at startup. Any 2xx/3xx answer counts as reachable.
    pub async fn probe(&self, url: &str) -> Result<(), HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest("connectivity probe", err))?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(HttpError::unexpected_status(
                "connectivity probe",
                status.as_u16(),
                "",
            ));
        }
        Ok(())
    }
}
