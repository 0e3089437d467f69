// Blocking HTTP plumbing shared by the translation collaborators

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

use crate::core::errors::TranslationError;

const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 5000;

/// Exponential backoff: the delay doubles after each retry up to `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(INITIAL_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }

    /// Delay slept before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send the request built by `build`, retrying transport errors, 429 and 5xx.
///
/// Other non-success statuses fail immediately with `TranslationError::Api`.
pub fn send_with_retry<F>(
    service: &str,
    policy: &RetryPolicy,
    mut build: F,
) -> Result<Response, TranslationError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                "{}: Retry attempt {} after {}ms delay",
                service,
                attempt,
                delay.as_millis()
            );
            thread::sleep(delay);
        }

        let response = match build().send() {
            Ok(response) => response,
            Err(e) => {
                let retryable = !e.is_builder();
                error!(
                    "{}: Request failed (attempt {}): {} (retryable: {})",
                    service,
                    attempt + 1,
                    e,
                    retryable
                );
                if retryable && attempt < policy.max_retries {
                    attempt += 1;
                    continue;
                }
                return Err(TranslationError::Request(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        if is_retryable_status(status) && attempt < policy.max_retries {
            error!(
                "{}: Server error {} (attempt {}): {}",
                service,
                status,
                attempt + 1,
                body
            );
            attempt += 1;
            continue;
        }

        return Err(TranslationError::Api {
            status: status.as_u16(),
            body,
        });
    }
}
