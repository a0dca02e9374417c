/*!
 * Batch fallback engine.
 *
 * When a provider answers a batch only partially, the missing positions are
 * retried with graduated chunk splitting: the first attempt retries the
 * full missing set, the second splits it into halves, the third into
 * thirds. The engine either ends with full coverage or reports the
 * positions that stayed untranslated.
 */

use log::{debug, warn};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::errors::{ProviderError, TranslationError};
use crate::providers::{BatchItem, Provider};
use crate::subtitles::formatting;
use super::batching::Batch;

/// Fallback tuning
#[derive(Debug, Clone, Copy)]
pub struct FallbackConfig {
    /// Whether split retries run at all
    pub enabled: bool,
    /// Number of graduated split attempts
    pub max_split_attempts: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_split_attempts: 3,
        }
    }
}

/// A translated line is usable when it still has content after markup
/// removal
fn is_usable(translation: &str) -> bool {
    !formatting::remove_markup(translation).is_empty()
}

/// Positions of `items` that have no usable result yet
fn missing_items(items: &[BatchItem], results: &HashMap<usize, String>) -> Vec<BatchItem> {
    items
        .iter()
        .filter(|item| !results.get(&item.position).map(|t| is_usable(t)).unwrap_or(false))
        .cloned()
        .collect()
}

/// Split items into `parts` roughly equal chunks
fn split_chunks(items: &[BatchItem], parts: usize) -> Vec<Vec<BatchItem>> {
    let parts = parts.clamp(1, items.len().max(1));
    let chunk_size = items.len().div_ceil(parts);
    items.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Merge new results; the first usable answer per position wins
fn merge_results(into: &mut HashMap<usize, String>, from: HashMap<usize, String>) {
    for (position, translation) in from {
        if !is_usable(&translation) {
            continue;
        }
        into.entry(position).or_insert(translation);
    }
}

/// One provider call that treats an invalid response as an empty answer,
/// leaving recovery to the splitting loop
async fn call_provider(
    provider: &dyn Provider,
    items: &[BatchItem],
    source_language: &str,
    target_language: &str,
    pre_context: &[String],
    post_context: &[String],
    token: &CancellationToken,
) -> Result<HashMap<usize, String>, ProviderError> {
    match provider
        .translate_batch(items, source_language, target_language, pre_context, post_context, token)
        .await
    {
        Ok(results) => Ok(results),
        Err(ProviderError::InvalidResponse(reason)) => {
            debug!("Treating invalid response as empty batch: {}", reason);
            Ok(HashMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Best-effort translation of one batch: full call first, then graduated
/// splits over whatever is still missing. Returns the collected results and
/// the positions that stayed missing.
pub async fn translate_batch_best_effort(
    provider: &dyn Provider,
    batch: &Batch,
    source_language: &str,
    target_language: &str,
    config: &FallbackConfig,
    token: &CancellationToken,
) -> Result<(HashMap<usize, String>, Vec<usize>), TranslationError> {
    let mut results: HashMap<usize, String> = HashMap::new();

    let first = call_provider(
        provider,
        &batch.items,
        source_language,
        target_language,
        &batch.pre_context,
        &batch.post_context,
        token,
    )
    .await
    .map_err(TranslationError::from)?;
    merge_results(&mut results, first);

    let mut missing = missing_items(&batch.items, &results);

    if !missing.is_empty() && config.enabled {
        for attempt in 1..=config.max_split_attempts {
            if missing.is_empty() {
                break;
            }
            if token.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            debug!(
                "Batch {}: split attempt {} over {} missing positions",
                batch.index,
                attempt,
                missing.len()
            );

            for chunk in split_chunks(&missing, attempt) {
                let chunk_results = call_provider(
                    provider,
                    &chunk,
                    source_language,
                    target_language,
                    &batch.pre_context,
                    &batch.post_context,
                    token,
                )
                .await
                .map_err(TranslationError::from)?;
                merge_results(&mut results, chunk_results);
            }

            missing = missing_items(&batch.items, &results);
        }
    }

    let missing_positions: Vec<usize> = missing.iter().map(|i| i.position).collect();
    if !missing_positions.is_empty() {
        warn!(
            "Batch {}: {} of {} positions stayed untranslated",
            batch.index,
            missing_positions.len(),
            batch.items.len()
        );
    }

    Ok((results, missing_positions))
}

/// Strict translation of one batch: either the result covers exactly the
/// batch positions, or the call fails
pub async fn translate_with_fallback(
    provider: &dyn Provider,
    batch: &Batch,
    source_language: &str,
    target_language: &str,
    config: &FallbackConfig,
    token: &CancellationToken,
) -> Result<HashMap<usize, String>, TranslationError> {
    let (results, missing) = translate_batch_best_effort(
        provider,
        batch,
        source_language,
        target_language,
        config,
        token,
    )
    .await?;

    if !missing.is_empty() {
        return Err(TranslationError::UntranslatedPositions(missing));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::collections::HashMap;

    fn batch(positions: &[usize]) -> Batch {
        Batch {
            index: 0,
            items: positions
                .iter()
                .map(|&p| BatchItem::new(p, format!("line {}", p)))
                .collect(),
            pre_context: Vec::new(),
            post_context: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_full_answer_needs_no_fallback() {
        let provider = MockProvider::working();
        let token = CancellationToken::new();

        let results = translate_with_fallback(
            &provider,
            &batch(&[0, 1, 2]),
            "en",
            "ro",
            &FallbackConfig::default(),
            &token,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_positions_are_retried_with_graduated_splits() {
        // Answers everything except 8 and 9 on the first call, then recovers
        // them in the splits
        let provider = MockProvider::scripted(|call, items| {
            let skip_first_call = [8usize, 9];
            Ok(items
                .iter()
                .filter(|i| call > 0 || !skip_first_call.contains(&i.position))
                .map(|i| (i.position, format!("t{}", i.position)))
                .collect())
        });
        let token = CancellationToken::new();

        let results = translate_with_fallback(
            &provider,
            &batch(&(0..10).collect::<Vec<_>>()),
            "en",
            "ro",
            &FallbackConfig::default(),
            &token,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 10);
        // First call is the full batch, second the full missing set
        let calls = provider.batch_calls();
        assert_eq!(calls[0].len(), 10);
        assert_eq!(calls[1], vec![8, 9]);
    }

    #[tokio::test]
    async fn test_graduated_splits_divide_the_missing_set() {
        // Never answers 0..6 so every attempt runs; observe chunk shapes
        let provider = MockProvider::skipping(0..6);
        let token = CancellationToken::new();

        let (results, missing) = translate_batch_best_effort(
            &provider,
            &batch(&(0..8).collect::<Vec<_>>()),
            "en",
            "ro",
            &FallbackConfig {
                enabled: true,
                max_split_attempts: 3,
            },
            &token,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(missing, vec![0, 1, 2, 3, 4, 5]);

        let calls = provider.batch_calls();
        // full batch, full retry, halves, thirds
        assert_eq!(calls[0].len(), 8);
        assert_eq!(calls[1], vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(calls[2], vec![0, 1, 2]);
        assert_eq!(calls[3], vec![3, 4, 5]);
        assert_eq!(calls[4], vec![0, 1]);
        assert_eq!(calls[5], vec![2, 3]);
        assert_eq!(calls[6], vec![4, 5]);
    }

    #[tokio::test]
    async fn test_strict_mode_raises_on_exhausted_attempts() {
        let provider = MockProvider::skipping([1]);
        let token = CancellationToken::new();

        let err = translate_with_fallback(
            &provider,
            &batch(&[0, 1, 2]),
            "en",
            "ro",
            &FallbackConfig::default(),
            &token,
        )
        .await
        .unwrap_err();

        match err {
            TranslationError::UntranslatedPositions(missing) => assert_eq!(missing, vec![1]),
            other => panic!("expected UntranslatedPositions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_fallback_does_not_split() {
        let provider = MockProvider::skipping([1]);
        let token = CancellationToken::new();

        let (_, missing) = translate_batch_best_effort(
            &provider,
            &batch(&[0, 1, 2]),
            "en",
            "ro",
            &FallbackConfig {
                enabled: false,
                max_split_attempts: 3,
            },
            &token,
        )
        .await
        .unwrap();

        assert_eq!(missing, vec![1]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_propagates() {
        let provider = MockProvider::failing();
        let token = CancellationToken::new();

        let err = translate_with_fallback(
            &provider,
            &batch(&[0]),
            "en",
            "ro",
            &FallbackConfig::default(),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            TranslationError::Provider(ProviderError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_translations_count_as_missing() {
        let provider = MockProvider::scripted(|_, items| {
            Ok(items
                .iter()
                .map(|i| {
                    let text = if i.position == 0 {
                        "{\\i1}{\\i0}".to_string()
                    } else {
                        format!("t{}", i.position)
                    };
                    (i.position, text)
                })
                .collect::<HashMap<_, _>>())
        });
        let token = CancellationToken::new();

        let (_, missing) = translate_batch_best_effort(
            &provider,
            &batch(&[0, 1]),
            "en",
            "ro",
            &FallbackConfig {
                enabled: false,
                max_split_attempts: 1,
            },
            &token,
        )
        .await
        .unwrap();

        assert_eq!(missing, vec![0]);
    }
}
