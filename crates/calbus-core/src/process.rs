//! Outcome of one attempt to process a change event.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of a single processing attempt. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessResult {
    /// The event was handled.
    Processed,
    /// The event is not relevant to this handler.
    Ignored,
    /// No handler applies to the event.
    NoAction,
    /// Optimistic-concurrency conflict; retry from scratch.
    StaleState,
    /// Unclassified failure; retry up to the limit.
    Failed,
    /// Known permanent reason not to process.
    FailedNoRetry,
}

impl ProcessResult {
    /// Whether the consumer should make another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ProcessResult::StaleState | ProcessResult::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessResult::Processed => "PROCESSED",
            ProcessResult::Ignored => "IGNORED",
            ProcessResult::NoAction => "NO_ACTION",
            ProcessResult::StaleState => "STALE_STATE",
            ProcessResult::Failed => "FAILED",
            ProcessResult::FailedNoRetry => "FAILED_NO_RETRY",
        }
    }
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_results() {
        assert!(ProcessResult::StaleState.is_retryable());
        assert!(ProcessResult::Failed.is_retryable());
        assert!(!ProcessResult::Processed.is_retryable());
        assert!(!ProcessResult::Ignored.is_retryable());
        assert!(!ProcessResult::NoAction.is_retryable());
        assert!(!ProcessResult::FailedNoRetry.is_retryable());
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&ProcessResult::FailedNoRetry).unwrap();
        assert_eq!(json, "\"FAILED_NO_RETRY\"");
        assert_eq!(ProcessResult::FailedNoRetry.to_string(), "FAILED_NO_RETRY");
    }
}
