//! Request throttling and retries for any [`LanguageModel`].
//!
//! A [`ThrottledModel`] admits at most `requests_per_minute` completion calls
//! in any sliding 60 second window, waiting for a slot instead of failing, and
//! retries backend errors with exponential backoff.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::llm::{CompletionError, CompletionParams, LanguageModel, Prompt};

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

const WINDOW: Duration = Duration::from_secs(60);
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Sliding-window limiter: remembers when each admitted request started.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: usize,
    started: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `0` disables the limit.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute as usize,
            started: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request may start, then record it.
    pub async fn acquire(&self) {
        if self.requests_per_minute == 0 {
            return;
        }
        loop {
            let wait = {
                let mut started = self.started.lock().await;
                let now = Instant::now();
                while started.front().is_some_and(|&t| now.duration_since(t) >= WINDOW) {
                    started.pop_front();
                }
                if started.len() < self.requests_per_minute {
                    started.push_back(now);
                    return;
                }
                match started.front() {
                    Some(&oldest) => WINDOW.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Wraps a model with a [`RateLimiter`] and bounded retries on
/// [`CompletionError::Backend`]. Empty responses are returned as is.
pub struct ThrottledModel<M> {
    inner: M,
    limiter: RateLimiter,
    max_retries: u32,
    backoff: Duration,
}

impl<M: LanguageModel> ThrottledModel<M> {
    pub fn new(inner: M, requests_per_minute: u32, max_retries: u32) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(requests_per_minute),
            max_retries,
            backoff: BASE_BACKOFF,
        }
    }

    pub fn from_config(inner: M, config: &Config) -> Self {
        Self::new(inner, config.llm_requests_per_minute, config.llm_max_retries)
    }

    /// Delay before the first retry; doubles per attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1 << attempt.min(5))
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for ThrottledModel<M> {
    async fn complete(&self, prompt: &Prompt, params: &CompletionParams) -> Result<String, CompletionError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            match self.inner.complete(prompt, params).await {
                Err(CompletionError::Backend(e)) if attempt < self.max_retries => {
                    let delay = self.retry_backoff(attempt);
                    attempt += 1;
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "completion failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Fails the first `failures` calls, then answers. Counts every call.
    struct FlakyModel {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyModel {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for FlakyModel {
        async fn complete(&self, _prompt: &Prompt, _params: &CompletionParams) -> Result<String, CompletionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CompletionError::Backend(format!("attempt {n} failed")))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct EmptyModel(AtomicU32);

    #[async_trait]
    impl LanguageModel for EmptyModel {
        async fn complete(&self, _prompt: &Prompt, _params: &CompletionParams) -> Result<String, CompletionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CompletionError::EmptyResponse)
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".to_string(),
            user: "hi".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_backend_errors_until_success() {
        let model = ThrottledModel::new(FlakyModel::new(2), 0, 2);
        let out = model.complete(&prompt(), &CompletionParams::default()).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(model.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let model = ThrottledModel::new(FlakyModel::new(10), 0, 2);
        let err = model.complete(&prompt(), &CompletionParams::default()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Backend(_)));
        assert_eq!(model.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_is_not_retried() {
        let model = ThrottledModel::new(EmptyModel(AtomicU32::new(0)), 0, 5);
        let err = model.complete(&prompt(), &CompletionParams::default()).await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
        assert_eq!(model.inner.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn limit_delays_requests_past_the_window() {
        let model = ThrottledModel::new(FlakyModel::new(0), 2, 0);
        let start = Instant::now();
        for _ in 0..2 {
            model.complete(&prompt(), &CompletionParams::default()).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        model.complete(&prompt(), &CompletionParams::default()).await.unwrap();
        assert!(start.elapsed() >= WINDOW);
        assert_eq!(model.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let model = ThrottledModel::new(FlakyModel::new(0), 0, 0).with_backoff(Duration::from_millis(10));
        assert_eq!(model.retry_backoff(0), Duration::from_millis(10));
        assert_eq!(model.retry_backoff(2), Duration::from_millis(40));
        assert_eq!(model.retry_backoff(9), Duration::from_millis(320));
    }
}
