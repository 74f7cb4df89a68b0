//! Bounded retry around a model call, shared by batch queries and synthesis.
//!
//! Only rate-limit errors are retried. Each wait is exponential
//! (`base_delay * 2^attempt`) unless the server suggested a delay, in which
//! case that delay plus a two second margin is used. Waits are cancellable
//! and emit heartbeats so a client connection stays alive.

use regex::Regex;
use report_flow::Context;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::{Instant, interval_at, sleep_until};
use tracing::{debug, error, warn};

use crate::llm::{GenerationError, GenerationRequest, TextGenerator};

/// Added to a server-suggested retry delay.
pub const RETRY_HINT_MARGIN: Duration = Duration::from_secs(2);

const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

static RETRY_DELAY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"retry_delay\s*\{\s*seconds:\s*(\d+)").expect("valid retry_delay pattern")
});

static RETRY_DELAY_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+)(?:\.\d+)?s""#).expect("valid retryDelay pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
}

impl RetryPolicy {
    /// Default wait before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Whether an error message describes upstream throttling.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("quota")
        || lower.contains("resource_exhausted")
}

/// Server-suggested delay plus [`RETRY_HINT_MARGIN`], or `default` when the
/// message carries no hint.
pub fn extract_retry_delay(message: &str, default: Duration) -> Duration {
    RETRY_DELAY_BLOCK
        .captures(message)
        .or_else(|| RETRY_DELAY_JSON.captures(message))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs) + RETRY_HINT_MARGIN)
        .unwrap_or(default)
}

/// Terminal state of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded(String),
    /// Still rate limited after every allowed attempt.
    RateLimited { attempts: u32 },
    Blocked(String),
    Failed(String),
    Cancelled,
}

/// Call `generator` until it succeeds, fails for a reason other than rate
/// limiting, runs out of attempts, or the context is cancelled.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    context: &Context,
    label: &str,
) -> RetryOutcome {
    let cancellation = context.cancellation().clone();

    for attempt in 0..=policy.max_retries {
        if cancellation.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        debug!(
            "{}: attempt {}/{} with {}",
            label,
            attempt + 1,
            policy.max_attempts(),
            generator.name()
        );

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return RetryOutcome::Cancelled,
            result = generator.generate(request) => result,
        };

        let error = match result {
            Ok(text) if !text.trim().is_empty() => return RetryOutcome::Succeeded(text),
            Ok(_) => {
                error!("{}: model returned an empty response", label);
                return RetryOutcome::Failed("Empty response from model".to_string());
            }
            Err(error) => error,
        };

        if !error.is_rate_limit() {
            return match error {
                GenerationError::Blocked(reason) => {
                    warn!("{}: content blocked: {}", label, reason);
                    RetryOutcome::Blocked(reason)
                }
                other => {
                    error!("{}: {}", label, other);
                    RetryOutcome::Failed(other.to_string())
                }
            };
        }

        if attempt == policy.max_retries {
            error!(
                "{}: rate limit exceeded after {} attempts",
                label,
                policy.max_attempts()
            );
            return RetryOutcome::RateLimited {
                attempts: policy.max_attempts(),
            };
        }

        let delay = extract_retry_delay(&error.to_string(), policy.backoff(attempt));
        warn!(
            "{}: rate limited, retrying in {:?} ({}/{})",
            label,
            delay,
            attempt + 1,
            policy.max_retries
        );
        if !wait_with_heartbeat(delay, policy.heartbeat_interval, context, label).await {
            return RetryOutcome::Cancelled;
        }
    }

    // Unreachable with the loop bounds above; max_retries + 1 attempts always end the loop.
    RetryOutcome::RateLimited {
        attempts: policy.max_attempts(),
    }
}

/// Sleep for `delay`, sending heartbeats every `every`. Returns false when cancelled.
async fn wait_with_heartbeat(delay: Duration, every: Duration, context: &Context, label: &str) -> bool {
    let every = every.max(MIN_HEARTBEAT);
    let start = Instant::now();
    let deadline = start + delay;
    let mut ticker = interval_at(start + every, every);
    let cancellation = context.cancellation().clone();

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return false,
            _ = sleep_until(deadline) => return true,
            _ = ticker.tick() => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let status = format!(
                    "{}: waiting {}s for rate limit to clear ({})",
                    label,
                    remaining.as_secs(),
                    chrono::Utc::now().to_rfc3339()
                );
                context.heartbeat(&status).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationOptions, scripted::ScriptedGenerator};
    use report_flow::{CancellationToken, RecordingProgress};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(5),
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(5),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec!["doc".into(), "prompt".into()], GenerationOptions::default())
    }

    #[test]
    fn classifies_rate_limit_messages() {
        assert!(is_rate_limit_message("HTTP 429 Too Many Requests"));
        assert!(is_rate_limit_message("Rate limit reached for model"));
        assert!(is_rate_limit_message("You exceeded your current quota"));
        assert!(is_rate_limit_message("status: RESOURCE_EXHAUSTED"));
        assert!(!is_rate_limit_message("500 internal error"));
    }

    #[test]
    fn retry_delay_hint_adds_margin() {
        let default = Duration::from_secs(5);
        assert_eq!(
            extract_retry_delay("429 quota exceeded retry_delay { seconds: 17 }", default),
            Duration::from_secs(19)
        );
        assert_eq!(
            extract_retry_delay(r#"{"@type": "RetryInfo", "retryDelay": "31s"}"#, default),
            Duration::from_secs(33)
        );
        assert_eq!(extract_retry_delay("429 no hint", default), default);
    }

    #[test]
    fn backoff_doubles() {
        let policy = policy();
        let delays: Vec<u64> = (0..4).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_retries_plus_one_attempts() {
        let generator = ScriptedGenerator::always(Err(GenerationError::RateLimited(
            "429 Too Many Requests".into(),
        )));
        let progress = Arc::new(RecordingProgress::new());
        let context = Context::new().with_progress(progress.clone());
        let started = Instant::now();

        let outcome = generate_with_retry(&generator, &request(), &policy(), &context, "batch 1").await;

        assert_eq!(outcome, RetryOutcome::RateLimited { attempts: 4 });
        assert_eq!(generator.calls(), 4);
        // 5 + 10 + 20, no wait after the last attempt
        assert_eq!(started.elapsed(), Duration::from_secs(35));
        assert!(progress.heartbeats() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_rate_limit() {
        let generator = ScriptedGenerator::sequence(vec![
            Err(GenerationError::Other(
                "quota exceeded retry_delay { seconds: 1 }".into(),
            )),
            Ok("analysis".into()),
        ]);
        let started = Instant::now();

        let outcome =
            generate_with_retry(&generator, &request(), &policy(), &Context::new(), "batch 1").await;

        assert_eq!(outcome, RetryOutcome::Succeeded("analysis".into()));
        assert_eq!(generator.calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let generator =
            ScriptedGenerator::always(Err(GenerationError::Other("invalid argument".into())));
        let outcome =
            generate_with_retry(&generator, &request(), &policy(), &Context::new(), "batch").await;
        assert_eq!(outcome, RetryOutcome::Failed("invalid argument".into()));
        assert_eq!(generator.calls(), 1);

        let generator = ScriptedGenerator::always(Err(GenerationError::Blocked("SAFETY".into())));
        let outcome =
            generate_with_retry(&generator, &request(), &policy(), &Context::new(), "batch").await;
        assert_eq!(outcome, RetryOutcome::Blocked("SAFETY".into()));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_a_failure() {
        let generator = ScriptedGenerator::always(Ok("  \n".into()));
        let outcome =
            generate_with_retry(&generator, &request(), &policy(), &Context::new(), "batch").await;
        assert!(matches!(outcome, RetryOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff_wait() {
        let generator = ScriptedGenerator::always(Err(GenerationError::RateLimited("429".into())));
        let token = CancellationToken::new();
        let context = Context::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        });

        let outcome = generate_with_retry(&generator, &request(), &policy(), &context, "batch").await;
        canceller.await.unwrap();

        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_the_in_flight_call() {
        let generator = ScriptedGenerator::always(Ok("late".into()))
            .with_latency(Duration::from_secs(60));
        let token = CancellationToken::new();
        let context = Context::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let outcome = generate_with_retry(&generator, &request(), &policy(), &context, "batch").await;
        canceller.await.unwrap();
        assert_eq!(outcome, RetryOutcome::Cancelled);
    }
}
