/*!
 * Translation engine: batching, provider fallback and repair, integrity
 * validation and the end-to-end pipeline.
 */

pub mod batching;
pub mod fallback;
pub mod integrity;
pub mod pipeline;
pub mod repair;
pub mod retry;

pub use batching::{Batch, ContextWindow};
pub use fallback::FallbackConfig;
pub use integrity::IntegrityConfig;
pub use pipeline::{PipelineOutcome, ProviderFactory, RequestReporter, SubtitlePipeline};
pub use repair::{FailedPosition, RepairBatch};
pub use retry::{GatedProvider, RetryPolicy};
