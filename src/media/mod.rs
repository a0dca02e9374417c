/*!
 * Media-side services: embedded stream probing and extraction, source
 * track scoring, per-media translation state and the indexer seam.
 */

pub mod indexer;
pub mod probe;
pub mod scoring;
pub mod state;

pub use indexer::{MediaIndexer, NoopIndexer};
pub use probe::SubtitleProber;
pub use state::MediaStateEngine;
