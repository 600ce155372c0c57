//! Exponential-backoff retry engine for agent-side operations.
//!
//! Wraps an async operation, classifies failures through [`RetryableError`],
//! and keeps the user informed through patches: before each retry the target
//! message is rolled back to its pre-attempt state, and notice messages
//! describe what happened. Non-retryable failures propagate immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use message_bus::{Patch, PatchSink, Role};

/// Classification hook: errors decide for themselves whether another attempt
/// can help. Transport-level failures (network, timeout, I/O) say yes;
/// logical failures say no.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `min(base · 2^attempt, max)` with `attempt` counted from zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub total_delay_secs: f64,
}

pub struct RetryEngine {
    policy: RetryPolicy,
    stats: Mutex<RetryStats>,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn stats(&self) -> RetryStats {
        self.stats.lock().await.clone()
    }

    /// Run `op`, retrying retryable failures up to the configured ceiling.
    ///
    /// Before each retry, when `rollback_message_id` is given, a rollback
    /// patch erases everything published after that message and resets it to
    /// an empty generating state, so the next attempt streams into a clean
    /// message. Each retry also publishes a finished notice message; on
    /// exhaustion or a non-retryable error a final notice is published and
    /// the error returned.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        sink: &dyn PatchSink,
        rollback_message_id: Option<&str>,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        for attempt in 0..=self.policy.max_retries {
            self.stats.lock().await.total_attempts += 1;
            log::info!(
                "[retry] attempt {}/{}",
                attempt + 1,
                self.policy.max_retries + 1
            );

            match op().await {
                Ok(value) => {
                    self.stats.lock().await.successful_attempts += 1;
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    log::warn!("[retry] attempt {} failed (retryable): {error}", attempt + 1);

                    if let Some(message_id) = rollback_message_id {
                        self.publish_rollback(sink, message_id).await;
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    self.stats.lock().await.total_delay_secs += delay.as_secs_f64();
                    self.publish_notice(
                        sink,
                        format!("重试通知 ({}/{})", attempt + 1, self.policy.max_retries),
                        format!(
                            "检测到可重试错误：{error}\n正在{:.1}秒后重试...\n",
                            delay.as_secs_f64()
                        ),
                    )
                    .await;
                    tokio::time::sleep(delay).await;
                }
                Err(error) if error.is_retryable() => {
                    self.stats.lock().await.failed_attempts += 1;
                    log::error!(
                        "[retry] giving up after {} retries: {error}",
                        self.policy.max_retries
                    );
                    self.publish_notice(
                        sink,
                        "重试失败通知".to_string(),
                        format!("重试{}次后仍然失败：{error}\n", self.policy.max_retries),
                    )
                    .await;
                    return Err(error);
                }
                Err(error) => {
                    self.stats.lock().await.failed_attempts += 1;
                    log::error!("[retry] non-retryable error: {error}");
                    self.publish_notice(
                        sink,
                        "错误通知".to_string(),
                        format!("发生不可重试错误：{error}\n"),
                    )
                    .await;
                    return Err(error);
                }
            }
        }
        unreachable!("the retry loop always returns")
    }

    async fn publish_rollback(&self, sink: &dyn PatchSink, message_id: &str) {
        let patch = Patch {
            message_id: Some(message_id.to_string()),
            rollback: true,
            ..Default::default()
        };
        if let Err(error) = sink.publish(patch).await {
            log::error!("[retry] failed to publish rollback patch: {error}");
        }
    }

    async fn publish_notice(&self, sink: &dyn PatchSink, title: String, content: String) {
        let patch = Patch {
            role: Some(Role::Assistant),
            title: Some(title),
            content_delta: content,
            finished: true,
            ..Default::default()
        };
        // Notices are best effort; a failed notice never masks the outcome.
        if let Err(error) = sink.publish(patch).await {
            log::warn!("[retry] failed to publish notice: {error}");
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
