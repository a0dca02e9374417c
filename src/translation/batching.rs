/*!
 * Batch construction.
 *
 * Translatable cues are grouped into batches of bounded size, keeping their
 * original file positions. Each batch optionally carries wrapper context:
 * the cues immediately before and after the batch, passed to the provider
 * as advisory text that is never requested back.
 */

use crate::providers::BatchItem;
use crate::subtitles::cue::Cue;
use crate::subtitles::formatting;

/// One unit of provider work
#[derive(Debug, Clone)]
pub struct Batch {
    /// Batch index within the file
    pub index: usize,
    /// Lines to translate, tagged with their cue positions
    pub items: Vec<BatchItem>,
    /// Advisory context preceding the batch
    pub pre_context: Vec<String>,
    /// Advisory context following the batch
    pub post_context: Vec<String>,
}

/// Context window configuration
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    /// Whether wrapper context is attached at all
    pub enabled: bool,
    /// Cues of context before each batch
    pub before: usize,
    /// Cues of context after each batch
    pub after: usize,
}

impl ContextWindow {
    /// No wrapper context
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            before: 0,
            after: 0,
        }
    }
}

/// Build batches of at most `max_batch_size` items from the translatable
/// positions, preserving original cue positions. Context is drawn from the
/// full cue list regardless of translatability, with markup removed.
pub fn build_batches(
    all_cues: &[Cue],
    translatable_positions: &[usize],
    max_batch_size: usize,
    context: ContextWindow,
) -> Vec<Batch> {
    let max_batch_size = max_batch_size.max(1);

    translatable_positions
        .chunks(max_batch_size)
        .enumerate()
        .map(|(index, chunk)| {
            let items = chunk
                .iter()
                .filter_map(|&position| {
                    all_cues
                        .get(position)
                        .map(|cue| BatchItem::new(position, cue.text.clone()))
                })
                .collect::<Vec<_>>();

            let (pre_context, post_context) = if context.enabled && !chunk.is_empty() {
                let first = chunk[0];
                let last = chunk[chunk.len() - 1];

                let pre_start = first.saturating_sub(context.before);
                let pre = all_cues[pre_start..first]
                    .iter()
                    .map(|c| formatting::remove_markup(&c.text))
                    .filter(|t| !t.is_empty())
                    .collect();

                let post_end = (last + 1 + context.after).min(all_cues.len());
                let post = all_cues[last + 1..post_end]
                    .iter()
                    .map(|c| formatting::remove_markup(&c.text))
                    .filter(|t| !t.is_empty())
                    .collect();

                (pre, post)
            } else {
                (Vec::new(), Vec::new())
            };

            Batch {
                index,
                items,
                pre_context,
                post_context,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues(n: usize) -> Vec<Cue> {
        (0..n)
            .map(|i| Cue::new(i, (i as u64) * 1000, (i as u64) * 1000 + 900, format!("line {}", i)))
            .collect()
    }

    #[test]
    fn test_batches_respect_max_size_and_keep_positions() {
        let cues = cues(10);
        let positions: Vec<usize> = (0..10).collect();

        let batches = build_batches(&cues, &positions, 4, ContextWindow::disabled());

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].items.len(), 4);
        assert_eq!(batches[2].items.len(), 2);
        assert_eq!(batches[1].items[0].position, 4);
        assert_eq!(batches[1].items[0].line, "line 4");
        assert_eq!(batches[2].index, 2);
    }

    #[test]
    fn test_skipped_positions_stay_out_of_batches() {
        let cues = cues(6);
        // Position 2 was filtered out (drawing or meaningless)
        let positions = vec![0, 1, 3, 4, 5];

        let batches = build_batches(&cues, &positions, 10, ContextWindow::disabled());

        let all: Vec<usize> = batches[0].items.iter().map(|i| i.position).collect();
        assert_eq!(all, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn test_context_window_wraps_each_batch() {
        let cues = cues(10);
        let positions: Vec<usize> = (0..10).collect();
        let context = ContextWindow {
            enabled: true,
            before: 2,
            after: 1,
        };

        let batches = build_batches(&cues, &positions, 5, context);

        // First batch has nothing before it
        assert!(batches[0].pre_context.is_empty());
        assert_eq!(batches[0].post_context, vec!["line 5"]);

        // Second batch sees the two preceding cues
        assert_eq!(batches[1].pre_context, vec!["line 3", "line 4"]);
        assert!(batches[1].post_context.is_empty());
    }

    #[test]
    fn test_context_is_markup_free() {
        let mut cues = cues(3);
        cues[0].text = "{\\i1}styled{\\i0}".into();
        let positions = vec![1, 2];
        let context = ContextWindow {
            enabled: true,
            before: 1,
            after: 0,
        };

        let batches = build_batches(&cues, &positions, 10, context);
        assert_eq!(batches[0].pre_context, vec!["styled"]);
    }

    #[test]
    fn test_empty_positions_yield_no_batches() {
        let cues = cues(3);
        let batches = build_batches(&cues, &[], 10, ContextWindow::disabled());
        assert!(batches.is_empty());
    }
}
