/*!
 * Mock provider implementations for testing.
 *
 * The mock can simulate the interesting provider behaviors: full answers,
 * persistently missing positions, transient failures, payment-required
 * rejections, hallucinated drawing output and scripted per-call responses.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use super::{BatchItem, Provider};

/// Scripted responder: receives the zero-based call index and the batch
pub type BatchResponder = Arc<
    dyn Fn(usize, &[BatchItem]) -> Result<HashMap<usize, String>, ProviderError> + Send + Sync,
>;

/// Behavior mode for the mock provider
#[derive(Clone)]
pub enum MockBehavior {
    /// Translate every position as `[target] line`
    Working,
    /// Translate everything except the given positions, on every call
    SkipPositions(HashSet<usize>),
    /// Always fail with a transient error
    FailingTransient,
    /// Always fail with payment required
    PaymentRequired,
    /// Return ASS drawing commands instead of translations
    DrawingOutput,
    /// Delay each call (for timeout and cancellation tests)
    Slow { delay_ms: u64 },
    /// Delegate to a scripted responder
    Scripted(BatchResponder),
}

/// Mock provider recording every batch call it receives
pub struct MockProvider {
    behavior: MockBehavior,
    request_count: AtomicUsize,
    batch_calls: Mutex<Vec<Vec<usize>>>,
}

impl MockProvider {
    /// Create a mock with the given behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: AtomicUsize::new(0),
            batch_calls: Mutex::new(Vec::new()),
        }
    }

    /// Mock that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Mock that never answers the given positions
    pub fn skipping(positions: impl IntoIterator<Item = usize>) -> Self {
        Self::new(MockBehavior::SkipPositions(positions.into_iter().collect()))
    }

    /// Mock that always fails with a transient error
    pub fn failing() -> Self {
        Self::new(MockBehavior::FailingTransient)
    }

    /// Mock with a scripted per-call response
    pub fn scripted<F>(responder: F) -> Self
    where
        F: Fn(usize, &[BatchItem]) -> Result<HashMap<usize, String>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(MockBehavior::Scripted(Arc::new(responder)))
    }

    /// Total number of single+batch calls made
    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Positions of every batch call, in call order
    pub fn batch_calls(&self) -> Vec<Vec<usize>> {
        self.batch_calls.lock().clone()
    }

    /// The canonical translation the Working behavior produces
    pub fn translation_of(line: &str, target_language: &str) -> String {
        format!("[{}] {}", target_language, line)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate_single(
        &self,
        line: &str,
        _source_language: &str,
        target_language: &str,
        _token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Working | MockBehavior::SkipPositions(_) => {
                Ok(Self::translation_of(line, target_language))
            }
            MockBehavior::FailingTransient => {
                Err(ProviderError::Transient("mock transient failure".into()))
            }
            MockBehavior::PaymentRequired => {
                Err(ProviderError::PaymentRequired("mock payment required".into()))
            }
            MockBehavior::DrawingOutput => Ok("m 0 0 l 100 0 100 100 0 100".into()),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                Ok(Self::translation_of(line, target_language))
            }
            MockBehavior::Scripted(responder) => {
                let call = self.request_count.load(Ordering::SeqCst) - 1;
                let items = vec![BatchItem::new(0, line)];
                let mut result = responder(call, &items)?;
                result.remove(&0).ok_or_else(|| {
                    ProviderError::InvalidResponse("scripted mock returned nothing".into())
                })
            }
        }
    }

    async fn translate_batch(
        &self,
        items: &[BatchItem],
        _source_language: &str,
        target_language: &str,
        _pre_context: &[String],
        _post_context: &[String],
        _token: &CancellationToken,
    ) -> Result<HashMap<usize, String>, ProviderError> {
        let call = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.batch_calls
            .lock()
            .push(items.iter().map(|i| i.position).collect());

        match &self.behavior {
            MockBehavior::Working => Ok(items
                .iter()
                .map(|i| (i.position, Self::translation_of(&i.line, target_language)))
                .collect()),
            MockBehavior::SkipPositions(skipped) => Ok(items
                .iter()
                .filter(|i| !skipped.contains(&i.position))
                .map(|i| (i.position, Self::translation_of(&i.line, target_language)))
                .collect()),
            MockBehavior::FailingTransient => {
                Err(ProviderError::Transient("mock transient failure".into()))
            }
            MockBehavior::PaymentRequired => {
                Err(ProviderError::PaymentRequired("mock payment required".into()))
            }
            MockBehavior::DrawingOutput => Ok(items
                .iter()
                .map(|i| (i.position, "m 0 0 l 100 0 100 100 0 100".to_string()))
                .collect()),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                Ok(items
                    .iter()
                    .map(|i| (i.position, Self::translation_of(&i.line, target_language)))
                    .collect())
            }
            MockBehavior::Scripted(responder) => responder(call, items),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["mock-model".to_string()])
    }

    async fn list_languages(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["en".to_string(), "ro".to_string(), "fr".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(positions: &[usize]) -> Vec<BatchItem> {
        positions
            .iter()
            .map(|&p| BatchItem::new(p, format!("line {}", p)))
            .collect()
    }

    #[tokio::test]
    async fn test_working_mock_answers_all_positions() {
        let mock = MockProvider::working();
        let token = CancellationToken::new();

        let result = mock
            .translate_batch(&items(&[0, 1, 2]), "en", "ro", &[], &[], &token)
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[&1], "[ro] line 1");
    }

    #[tokio::test]
    async fn test_skipping_mock_never_answers_skipped_positions() {
        let mock = MockProvider::skipping([1]);
        let token = CancellationToken::new();

        for _ in 0..2 {
            let result = mock
                .translate_batch(&items(&[0, 1, 2]), "en", "ro", &[], &[], &token)
                .await
                .unwrap();
            assert!(!result.contains_key(&1));
            assert_eq!(result.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_mock_records_batch_calls() {
        let mock = MockProvider::working();
        let token = CancellationToken::new();

        mock.translate_batch(&items(&[0, 1]), "en", "ro", &[], &[], &token)
            .await
            .unwrap();
        mock.translate_batch(&items(&[2]), "en", "ro", &[], &[], &token)
            .await
            .unwrap();

        assert_eq!(mock.batch_calls(), vec![vec![0, 1], vec![2]]);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_mock_varies_by_call_index() {
        let mock = MockProvider::scripted(|call, items| {
            if call == 0 {
                Ok(HashMap::new())
            } else {
                Ok(items
                    .iter()
                    .map(|i| (i.position, format!("retry {}", i.position)))
                    .collect())
            }
        });
        let token = CancellationToken::new();

        let first = mock
            .translate_batch(&items(&[0]), "en", "ro", &[], &[], &token)
            .await
            .unwrap();
        assert!(first.is_empty());

        let second = mock
            .translate_batch(&items(&[0]), "en", "ro", &[], &[], &token)
            .await
            .unwrap();
        assert_eq!(second[&0], "retry 0");
    }
}
