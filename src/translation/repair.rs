/*!
 * Deferred repair engine.
 *
 * In deferred mode the pipeline collects every position that stayed
 * untranslated during the main pass and repairs them in one contextualized
 * batch at the end of the file: each failed position is surrounded by its
 * neighbor cues, overlapping ranges are merged, and only the failed
 * positions are requested back.
 */

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::errors::TranslationError;
use crate::providers::{BatchItem, Provider};
use crate::subtitles::cue::Cue;
use crate::subtitles::formatting;
use super::batching::Batch;
use super::fallback::{self, FallbackConfig};

/// A position that stayed untranslated during the main pass
#[derive(Debug, Clone)]
pub struct FailedPosition {
    /// Cue position in the file
    pub position: usize,
    /// Original source line
    pub line: String,
    /// Index of the batch it came from
    pub batch_index: usize,
}

/// A repair batch: contextualized items plus the subset that actually needs
/// translating
#[derive(Debug, Clone)]
pub struct RepairBatch {
    /// Every cue inside the merged context ranges, in position order
    pub items: Vec<BatchItem>,
    /// Positions whose translations are kept; everything else is context
    pub failed_positions: HashSet<usize>,
}

/// Build one repair batch from the failed positions.
///
/// Ranges `[position - radius, position + radius]` are merged when they
/// overlap or touch; every cue inside a merged range is included. With
/// `use_plaintext` the context lines are markup-stripped.
pub fn build_contextual_repair_batch(
    failed: &[FailedPosition],
    all_cues: &[Cue],
    radius: usize,
    use_plaintext: bool,
) -> RepairBatch {
    let failed_positions: HashSet<usize> = failed.iter().map(|f| f.position).collect();

    let mut ranges: Vec<(usize, usize)> = failed
        .iter()
        .map(|f| {
            (
                f.position.saturating_sub(radius),
                (f.position + radius).min(all_cues.len().saturating_sub(1)),
            )
        })
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let mut items = Vec::new();
    for (start, end) in merged {
        for position in start..=end {
            let Some(cue) = all_cues.get(position) else {
                continue;
            };
            let line = if use_plaintext && !failed_positions.contains(&position) {
                formatting::remove_markup(&cue.text)
            } else {
                cue.text.clone()
            };
            items.push(BatchItem::new(position, line));
        }
    }

    RepairBatch {
        items,
        failed_positions,
    }
}

/// Run the repair batch through the provider in chunks of at most
/// `batch_size`, re-attempting chunks that still miss failed positions up to
/// `max_retries` extra times. Returns translations for originally failed
/// positions only; context translations are discarded. The mapping may be a
/// subset when the provider keeps failing.
pub async fn execute_repair(
    repair: &RepairBatch,
    provider: &dyn Provider,
    fallback_config: &FallbackConfig,
    source_language: &str,
    target_language: &str,
    batch_size: usize,
    max_retries: usize,
    token: &CancellationToken,
) -> Result<HashMap<usize, String>, TranslationError> {
    let mut recovered: HashMap<usize, String> = HashMap::new();

    for round in 0..=max_retries {
        if token.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }

        let outstanding: Vec<BatchItem> = repair
            .items
            .iter()
            .filter(|item| {
                // A chunk is re-attempted only while it still contains
                // unrecovered failed positions; pure-context items ride along
                repair.failed_positions.contains(&item.position)
                    && !recovered.contains_key(&item.position)
                    || !repair.failed_positions.contains(&item.position)
            })
            .cloned()
            .collect();

        let unrecovered: Vec<usize> = repair
            .failed_positions
            .iter()
            .filter(|p| !recovered.contains_key(p))
            .copied()
            .collect();
        if unrecovered.is_empty() {
            break;
        }

        debug!(
            "Repair round {}: {} failed positions outstanding",
            round,
            unrecovered.len()
        );

        for (chunk_index, chunk) in outstanding.chunks(batch_size.max(1)).enumerate() {
            let needs_translation = chunk
                .iter()
                .any(|item| {
                    repair.failed_positions.contains(&item.position)
                        && !recovered.contains_key(&item.position)
                });
            if !needs_translation {
                continue;
            }

            let batch = Batch {
                index: chunk_index,
                items: chunk.to_vec(),
                pre_context: Vec::new(),
                post_context: Vec::new(),
            };

            let (results, _missing) = fallback::translate_batch_best_effort(
                provider,
                &batch,
                source_language,
                target_language,
                fallback_config,
                token,
            )
            .await?;

            for (position, translation) in results {
                // Context translations are discarded
                if repair.failed_positions.contains(&position) {
                    recovered.entry(position).or_insert(translation);
                }
            }
        }
    }

    info!(
        "Repair recovered {}/{} positions",
        recovered.len(),
        repair.failed_positions.len()
    );
    Ok(recovered)
}
