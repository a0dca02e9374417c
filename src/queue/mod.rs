/*!
 * Persistent translation queue: request lifecycle service and the
 * in-process event channel.
 */

pub mod events;
pub mod service;

pub use events::{EventBus, RequestEvent};
pub use service::{ReenqueueOutcome, TranslationRequestService};
