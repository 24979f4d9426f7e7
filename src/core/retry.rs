//! 指数退避重试
//!
//! retry(policy, op) 最多执行 max_attempts 次；第 n 次失败（n 从 0 计）后等待
//! `min(max_delay, initial_delay × backoff_multiplier^n × jitter)`，jitter ∈ [1.0, 1.1]。
//! is_retryable 返回 false 时立即停止；次数耗尽后返回最后一个错误。
//! 非幂等操作由调用方把 max_attempts 设为 1（或确认有幂等键后再放开）。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// 抖动上限（乘性）
const JITTER_MAX: f64 = 1.1;

/// 错误分类谓词：true 表示值得再试
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// 重试策略：构造后不可变，每个调用点各自构造
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    is_retryable: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            is_retryable: Arc::clone(&self.is_retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// 默认：3 次、200ms 起步、上限 5s、倍数 2.0
    pub fn new(is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            is_retryable: Arc::new(is_retryable),
        }
    }

    /// 只执行一次，不重试
    pub fn no_retry() -> Self {
        Self::new(|_| false).with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn is_retryable(&self, err: &E) -> bool {
        (self.is_retryable)(err)
    }

    /// 第 n 次失败后的等待时长（含抖动，封顶 max_delay）
    pub fn delay_for(&self, n: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(1.0..=JITTER_MAX);
        self.scaled_delay(n, jitter)
    }

    fn scaled_delay(&self, n: u32, jitter: f64) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = (base * jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// 按策略重试异步操作；成功即返回，否则返回最后一次的错误
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !policy.is_retryable(&err) {
                    tracing::debug!(attempt, error = %err, "non-retryable error, giving up");
                    return Err(err);
                }
                if attempt >= max_attempts {
                    tracing::warn!(attempt, error = %err, "retry attempts exhausted");
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum FakeError {
        Transient(u32),
        Fatal,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn policy() -> RetryPolicy<FakeError> {
        RetryPolicy::new(|e: &FakeError| matches!(e, FakeError::Transient(_)))
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FakeError> = retry(&policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(FakeError::Transient(n))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(FakeError::Transient(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_after_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FakeError> = retry(&policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Fatal)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(FakeError::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry(&policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err(FakeError::Transient(n))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), FakeError> =
            retry(&policy(), || async { Err(FakeError::Transient(0)) }).await;
        // 100ms + 200ms，各自最多再乘 1.1
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(335), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let p = policy();
        assert_eq!(p.scaled_delay(0, 1.0), Duration::from_millis(100));
        assert_eq!(p.scaled_delay(2, 1.0), Duration::from_millis(400));
        assert_eq!(p.scaled_delay(20, 1.1), Duration::from_secs(1));
        let d = p.delay_for(1);
        assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(220));
    }

    #[test]
    fn test_no_retry_policy() {
        let p: RetryPolicy<FakeError> = RetryPolicy::no_retry();
        assert_eq!(p.max_attempts, 1);
        assert!(!p.is_retryable(&FakeError::Transient(1)));
    }
}
