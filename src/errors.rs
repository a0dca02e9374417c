/*!
 * Error types for the translarr application.
 *
 * This module contains custom error types for different parts of the
 * application, using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

/// Errors that can occur when talking to a translation provider
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transient failure: network problem, timeout, 5xx, rate limit.
    /// These are retried with exponential backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider rejected the request with a payment-required condition.
    /// The usage gate pauses the provider globally until the reported reset.
    #[error("provider requires payment: {0}")]
    PaymentRequired(String),

    /// The configured per-day request allowance is exhausted
    #[error("daily request limit reached for {model}: {used}/{allowed}")]
    DailyLimitReached {
        /// Model the request was gated for
        model: String,
        /// Requests already used today
        used: u64,
        /// Allowed requests per day (after buffer)
        allowed: u64,
    },

    /// The provider answered, but the payload could not be interpreted
    /// (missing positions, invented positions, unparseable body)
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Authentication or authorization failure; never retried
    #[error("provider authentication failed: {0}")]
    Authentication(String),
}

impl ProviderError {
    /// Whether the pipeline should retry this error with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Whether this error pauses the provider instead of failing the request.
    /// Paused requests stay Pending and are rescheduled.
    pub fn pauses_provider(&self) -> bool {
        matches!(
            self,
            ProviderError::PaymentRequired(_) | ProviderError::DailyLimitReached { .. }
        )
    }
}

/// Failure kinds of one translation request run.
///
/// Each variant maps to one row in the request log before the request status
/// transition is applied.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the provider, after local recovery was exhausted
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The source subtitle could not be parsed
    #[error("malformed subtitle: {0}")]
    MalformedSubtitle(String),

    /// Stream enumeration of the container file failed
    #[error("subtitle stream probe failed: {0}")]
    ProbeFailed(String),

    /// Extracting an embedded stream to a sidecar failed
    #[error("subtitle extraction failed: {0}")]
    ExtractionFailed(String),

    /// No sidecar and no scorable embedded track for the source language
    #[error("no suitable source subtitle: {0}")]
    NoSuitableSource(String),

    /// The translated output failed integrity validation; the target file
    /// has already been deleted when this is raised
    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    /// Positions left untranslated after fallback and repair
    #[error("{} positions left untranslated after all attempts", .0.len())]
    UntranslatedPositions(Vec<usize>),

    /// The request was cancelled by the operator
    #[error("translation cancelled")]
    Cancelled,

    /// The per-request wall-clock budget expired
    #[error("translation timed out after {0} minutes")]
    TimedOut(u64),

    /// A file operation failed
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl TranslationError {
    /// Short machine-readable kind tag used in request log entries
    pub fn kind(&self) -> &'static str {
        match self {
            TranslationError::Provider(ProviderError::Transient(_)) => "TransientProviderError",
            TranslationError::Provider(ProviderError::PaymentRequired(_)) => "PaymentRequired",
            TranslationError::Provider(ProviderError::DailyLimitReached { .. }) => {
                "DailyLimitReached"
            }
            TranslationError::Provider(ProviderError::InvalidResponse(_)) => {
                "InvalidProviderResponse"
            }
            TranslationError::Provider(ProviderError::Authentication(_)) => "AuthenticationFailed",
            TranslationError::MalformedSubtitle(_) => "MalformedSubtitle",
            TranslationError::ProbeFailed(_) => "ProbeFailed",
            TranslationError::ExtractionFailed(_) => "ExtractionFailed",
            TranslationError::NoSuitableSource(_) => "NoSuitableSubtitles",
            TranslationError::IntegrityFailed(_) => "IntegrityFailed",
            TranslationError::UntranslatedPositions(_) => "InvalidProviderResponse",
            TranslationError::Cancelled => "Cancelled",
            TranslationError::TimedOut(_) => "TimedOut",
            TranslationError::Io(_) => "IoError",
        }
    }

    /// Whether the request should stay Pending instead of turning Failed.
    /// True for usage-gate pauses, which are rescheduled transparently.
    pub fn keeps_request_pending(&self) -> bool {
        matches!(self, TranslationError::Provider(e) if e.pauses_provider())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable_only_for_transient() {
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(!ProviderError::InvalidResponse("bad json".into()).is_retryable());
        assert!(!ProviderError::PaymentRequired("402".into()).is_retryable());
    }

    #[test]
    fn test_pause_errors_keep_request_pending() {
        let err = TranslationError::from(ProviderError::PaymentRequired("402".into()));
        assert!(err.keeps_request_pending());

        let err = TranslationError::from(ProviderError::DailyLimitReached {
            model: "m".into(),
            used: 10,
            allowed: 10,
        });
        assert!(err.keeps_request_pending());

        assert!(!TranslationError::Cancelled.keeps_request_pending());
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(TranslationError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            TranslationError::IntegrityFailed("drawings".into()).kind(),
            "IntegrityFailed"
        );
        assert_eq!(
            TranslationError::UntranslatedPositions(vec![3, 4]).kind(),
            "InvalidProviderResponse"
        );
    }
}
