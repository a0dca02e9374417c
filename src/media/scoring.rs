/*!
 * Embedded track scoring.
 *
 * Candidate tracks are scored against the priority-ordered list of
 * configured source languages; the best-scoring track is picked as the
 * extraction source. A track whose language matches no configured language
 * is never returned.
 */

use crate::database::EmbeddedSubtitleRecord;
use crate::language_utils;

/// Minimum score before the language-priority bonus applies
const QUALITY_THRESHOLD: i64 = 30;

/// Bonus per step of language priority
const PRIORITY_BONUS_STEP: i64 = 80;

/// Title fragments suggesting the track carries the full dialogue
const FULL_DIALOGUE_HINTS: &[&str] = &["full", "dialogue", "dialog", "complete"];

/// Title fragments suggesting sparse content (signs, songs, forced-only)
const SPARSE_HINTS: &[&str] = &["signs", "songs", "s&s", "signs/songs", "forced", "commentary"];

/// Title fragments marking hearing-impaired tracks
const SDH_HINTS: &[&str] = &["sdh", "hearing impaired", "hearing-impaired", "cc"];

fn title_contains(track: &EmbeddedSubtitleRecord, hints: &[&str]) -> bool {
    track
        .title
        .as_deref()
        .map(|t| {
            let lower = t.to_lowercase();
            hints.iter().any(|h| lower.contains(h))
        })
        .unwrap_or(false)
}

/// Score a single track given its language's rank in the configured list
pub fn score_track(track: &EmbeddedSubtitleRecord, rank: usize, language_count: usize) -> i64 {
    let mut score: i64 = 50;

    if title_contains(track, FULL_DIALOGUE_HINTS) {
        score += 25;
    }
    if title_contains(track, SPARSE_HINTS) {
        score -= 40;
    }
    if title_contains(track, SDH_HINTS) {
        score -= 10;
    }
    if track.is_forced {
        score -= 10;
    } else {
        score += 5;
    }
    if track.is_default {
        score += 5;
    }

    if score >= QUALITY_THRESHOLD {
        score += PRIORITY_BONUS_STEP * (language_count as i64 - rank as i64);
    }

    score
}

/// Pick the best track among the candidates.
///
/// Returns the configured language the winner matched (in its configured
/// spelling) and the track itself, or None when no candidate matches a
/// configured language. Ties break toward the lower stream index. When
/// `ignore_captions` is set, SDH-marked tracks are not considered.
pub fn select_best_track<'a>(
    tracks: &'a [EmbeddedSubtitleRecord],
    configured_languages: &[String],
    ignore_captions: bool,
) -> Option<(String, &'a EmbeddedSubtitleRecord)> {
    let language_count = configured_languages.len();
    let mut best: Option<(i64, String, &EmbeddedSubtitleRecord)> = None;

    for track in tracks {
        let Some(track_language) = track.language.as_deref() else {
            continue;
        };
        let Some(rank) = configured_languages
            .iter()
            .position(|c| language_utils::language_codes_match(c, track_language))
        else {
            continue;
        };
        if ignore_captions && title_contains(track, SDH_HINTS) {
            continue;
        }

        let score = score_track(track, rank, language_count);
        let better = match &best {
            None => true,
            Some((best_score, _, best_track)) => {
                score > *best_score
                    || (score == *best_score && track.stream_index < best_track.stream_index)
            }
        };
        if better {
            best = Some((score, configured_languages[rank].clone(), track));
        }
    }

    best.map(|(_, language, track)| (language, track))
}
