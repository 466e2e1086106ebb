//! HTTP client with rate limiting and mandatory timeouts.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting for catalog calls
//! * Connect and read timeouts on every request
//! * Consistent headers and user agent
//!
//! # Rate Limiting
//!
//! Catalog calls go through [`Client::execute`], which allows bursts of up
//! to `rate_limit_calls` and delays anything beyond that. Media byte fetches
//! use [`Client::unlimited`] directly: throttling them would stall playback.
//!
//! # Example
//!
//! ```rust
//! use relayer::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT},
    Method, Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Request client without rate limiting.
    ///
    /// Shares timeouts and headers with the rate-limited path.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead for subsequent requests.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the rate limit is zero
    /// * HTTP client creation fails
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()?;

        // Rate limit own requests as to not DoS the catalog.
        let calls = NonZeroU32::new(config.rate_limit_calls)
            .ok_or_else(|| Error::invalid_argument("calls per interval is zero"))?;
        let quota = Quota::with_period(config.rate_limit_interval / calls.get())
            .ok_or_else(|| Error::invalid_argument("quota time interval is zero"))?
            .allow_burst(calls);

        Ok(Self {
            unlimited: http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method and URL.
    #[must_use]
    pub fn request(&self, method: Method, url: Url) -> reqwest::Request {
        reqwest::Request::new(method, url)
    }

    /// Builds a GET request.
    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        self.request(Method::GET, url)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails to complete. The status code is
    /// not checked.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Executes a request without rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails to complete.
    pub async fn execute_unlimited(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.unlimited.execute(request).await.map_err(Into::into)
    }
}
