//! Error types for usage tracking.
//!
//! Counting itself never fails: increments, rolls and reads are plain atomic
//! arithmetic. Errors only come from setting things up wrongly.

use thiserror::Error;

/// Errors returned while configuring or starting a tracker group.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// A roll interval of zero was requested.
    #[error("{roll} roll interval must be greater than zero")]
    ZeroInterval {
        /// Which roll ("second", "minute" or "hour") was misconfigured.
        roll: &'static str,
    },

    /// The roll scheduler was started outside of a tokio runtime.
    #[error("roll scheduler requires a running tokio runtime")]
    NoRuntime,

    /// A bucket name did not match any built-in bucket.
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UsageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = UsageError::ZeroInterval { roll: "minute" };
        assert_eq!(err.to_string(), "minute roll interval must be greater than zero");

        let err = UsageError::UnknownBucket("last_week".to_string());
        assert_eq!(err.to_string(), "unknown bucket: last_week");
    }
}
