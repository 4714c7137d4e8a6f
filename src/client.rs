//! Rate-limited, retrying JSON-RPC access.
//!
//! Every call is paced by a shared [`RateLimiter`], bounded by a per-attempt
//! timeout, and retried in place on transient failure. Some endpoints
//! rate-limit by hanging instead of returning an error, so the timeout is
//! the only reliable failure signal; no special-casing of HTTP status codes
//! is attempted.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use alloy::rpc::{
    client::RpcClient,
    json_rpc::{RpcRecv, RpcSend},
};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep, timeout},
};
use tracing::{debug, warn};

use crate::{
    error::{FeedError, RpcFailure},
    types::RetryPolicy,
};

const WINDOW: Duration = Duration::from_secs(1);

/// Admits at most a fixed number of requests in any rolling one-second
/// window. Callers past the budget suspend until a slot frees up rather
/// than failing.
///
/// Shared explicitly between all fetch tasks of a run; admissions are
/// serialized on one lock so no two tasks can take the same slot.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        let max_per_second = max_per_second.max(1) as usize;
        Self {
            max_per_second,
            window: Mutex::new(VecDeque::with_capacity(max_per_second)),
        }
    }

    /// Suspends until a request slot is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    window.pop_front();
                }
                if window.len() < self.max_per_second {
                    window.push_back(now);
                    None
                } else {
                    // The slot frees when the oldest admission leaves the
                    // window.
                    Some(WINDOW - now.duration_since(window[0]))
                }
            };
            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }
}

/// JSON-RPC client that paces, times out, and retries every call.
///
/// A logical call does not complete until it succeeds or the attempt budget
/// is exhausted; exhaustion surfaces as [`FeedError::RpcExhausted`] and
/// aborts the caller's run.
#[derive(Clone)]
pub struct RateLimitedClient {
    inner: RpcClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RateLimitedClient {
    /// Wraps `inner` with a fresh limiter sized from the policy.
    pub fn new(inner: RpcClient, policy: RetryPolicy) -> Self {
        let limiter = Arc::new(RateLimiter::new(policy.max_requests_per_second));
        Self::with_limiter(inner, limiter, policy)
    }

    /// Wraps `inner` sharing an existing limiter, for callers running more
    /// than one client against the same endpoint budget.
    pub fn with_limiter(inner: RpcClient, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        let mut policy = policy;
        policy.max_attempts = policy.max_attempts.max(1);
        Self {
            inner,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn call<Params, Resp>(
        &self,
        method: &'static str,
        params: Params,
    ) -> Result<Resp, FeedError>
    where
        Params: RpcSend,
        Resp: RpcRecv,
    {
        self.call_with(method, || {
            let params = params.clone();
            async move {
                self.inner
                    .request(method, params)
                    .await
                    .map_err(RpcFailure::from)
            }
        })
        .await
    }

    /// Like [`Self::call`], for methods that take no parameters.
    pub async fn call_noparams<Resp>(&self, method: &'static str) -> Result<Resp, FeedError>
    where
        Resp: RpcRecv,
    {
        self.call_with(method, || async {
            self.inner
                .request_noparams(method)
                .await
                .map_err(RpcFailure::from)
        })
        .await
    }

    /// Retry core with the request injected, so tests can drive timing and
    /// failure modes directly.
    async fn call_with<F, Fut, T>(&self, method: &'static str, mut attempt: F) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcFailure>>,
    {
        let mut last_error = None;
        for n in 1..=self.policy.max_attempts {
            if n > 1 {
                sleep(self.policy.backoff).await;
            }
            // A retry is another outbound request, so it takes its own slot.
            self.limiter.acquire().await;
            let failure = match timeout(self.policy.timeout, attempt()).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(failure)) => failure,
                Err(_) => RpcFailure::Timeout,
            };
            debug!(
                method,
                attempt = n,
                max_attempts = self.policy.max_attempts,
                %failure,
                "rpc attempt failed"
            );
            last_error = Some(failure);
        }

        let last_error = last_error.unwrap_or(RpcFailure::Timeout);
        warn!(method, attempts = self.policy.max_attempts, %last_error, "rpc budget exhausted");
        Err(FeedError::RpcExhausted {
            method,
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}
