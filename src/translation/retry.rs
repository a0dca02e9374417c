/*!
 * Retry and usage-gate decoration over a provider.
 *
 * Transient errors are retried with exponential backoff plus jitter as
 * configured by the retry settings; the usage gate is consulted before every
 * request and a payment-required rejection raises the global provider pause.
 */

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::providers::gate::UsageGate;
use crate::providers::{BatchItem, Provider};

/// Backoff configuration from the retry settings
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// First backoff delay
    pub initial_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let base = self.initial_delay.mul_f64(factor);
        let jitter = Duration::from_millis(rand::rng().random_range(0..500));
        base + jitter
    }
}

/// Provider wrapper adding gate checks and transient-error retries
pub struct GatedProvider {
    inner: Arc<dyn Provider>,
    gate: UsageGate,
    policy: RetryPolicy,
    model: String,
}

impl GatedProvider {
    /// Wrap a provider
    pub fn new(inner: Arc<dyn Provider>, gate: UsageGate, policy: RetryPolicy, model: String) -> Self {
        Self {
            inner,
            gate,
            policy,
            model,
        }
    }

    /// Run one gated, retried call
    async fn run<T, F, Fut>(&self, token: &CancellationToken, call: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            self.gate.ensure_request_allowed(&self.model).await?;

            match call().await {
                Ok(result) => {
                    if let Err(e) = self.gate.record_request().await {
                        warn!("Failed to persist usage counter: {}", e);
                    }
                    return Ok(result);
                }
                Err(ProviderError::PaymentRequired(message)) => {
                    if let Err(e) = self.gate.notify_payment_required(None).await {
                        warn!("Failed to raise provider pause: {}", e);
                    }
                    return Err(ProviderError::PaymentRequired(message));
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        "Transient provider failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.policy.max_retries, delay, e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            return Err(ProviderError::Transient("cancelled during backoff".into()));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Provider for GatedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn translate_single(
        &self,
        line: &str,
        source_language: &str,
        target_language: &str,
        token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        self.run(token, || {
            self.inner
                .translate_single(line, source_language, target_language, token)
        })
        .await
    }

    async fn translate_batch(
        &self,
        items: &[BatchItem],
        source_language: &str,
        target_language: &str,
        pre_context: &[String],
        post_context: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<usize, String>, ProviderError> {
        self.run(token, || {
            self.inner.translate_batch(
                items,
                source_language,
                target_language,
                pre_context,
                post_context,
                token,
            )
        })
        .await
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn list_languages(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_languages().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Repository;
    use crate::providers::mock::MockProvider;
    use crate::settings::{keys, SettingsStore};

    async fn gate() -> UsageGate {
        let repo = Repository::new_in_memory().unwrap();
        let settings = SettingsStore::new(repo.clone());
        settings.seed_defaults().await.unwrap();
        UsageGate::load(repo, settings, "mock".into()).await.unwrap()
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mock = Arc::new(MockProvider::scripted(|call, items| {
            if call < 2 {
                Err(ProviderError::Transient("flaky".into()))
            } else {
                Ok(items
                    .iter()
                    .map(|i| (i.position, "ok".to_string()))
                    .collect())
            }
        }));
        let provider = GatedProvider::new(mock.clone(), gate().await, fast_policy(3), "m".into());
        let token = CancellationToken::new();

        let result = provider
            .translate_batch(&[BatchItem::new(0, "x")], "en", "ro", &[], &[], &token)
            .await
            .unwrap();

        assert_eq!(result[&0], "ok");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_the_last_error() {
        let mock = Arc::new(MockProvider::failing());
        let provider = GatedProvider::new(mock.clone(), gate().await, fast_policy(2), "m".into());
        let token = CancellationToken::new();

        let err = provider
            .translate_batch(&[BatchItem::new(0, "x")], "en", "ro", &[], &[], &token)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Transient(_)));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_payment_required_raises_pause_and_stops() {
        let mock = Arc::new(MockProvider::new(
            crate::providers::mock::MockBehavior::PaymentRequired,
        ));
        let shared_gate = gate().await;
        let provider = GatedProvider::new(
            mock.clone(),
            shared_gate.clone(),
            fast_policy(5),
            "m".into(),
        );
        let token = CancellationToken::new();

        let err = provider
            .translate_batch(&[BatchItem::new(0, "x")], "en", "ro", &[], &[], &token)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::PaymentRequired(_)));
        // No retries for payment rejections
        assert_eq!(mock.call_count(), 1);
        // The pause is now active for subsequent calls
        let err = shared_gate.ensure_request_allowed("m").await.unwrap_err();
        assert!(matches!(err, ProviderError::PaymentRequired(_)));
    }

    #[tokio::test]
    async fn test_daily_limit_blocks_before_the_call() {
        let repo = Repository::new_in_memory().unwrap();
        let settings = SettingsStore::new(repo.clone());
        settings.seed_defaults().await.unwrap();
        settings
            .set(keys::PROVIDER_PLAN_REQUESTS_PER_DAY, "1")
            .await
            .unwrap();
        let gate = UsageGate::load(repo, settings, "mock".into()).await.unwrap();

        let mock = Arc::new(MockProvider::working());
        let provider = GatedProvider::new(mock.clone(), gate, fast_policy(0), "m".into());
        let token = CancellationToken::new();

        provider
            .translate_batch(&[BatchItem::new(0, "x")], "en", "ro", &[], &[], &token)
            .await
            .unwrap();

        let err = provider
            .translate_batch(&[BatchItem::new(1, "y")], "en", "ro", &[], &[], &token)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::DailyLimitReached { .. }));
        assert_eq!(mock.call_count(), 1);
    }
}
