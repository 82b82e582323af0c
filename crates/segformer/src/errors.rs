//! # Construction Errors
//!
//! Configuration errors are reported as [`SegFormerError`] values by
//! `validate()` / `try_init()`; shape errors at call time are panics.

use thiserror::Error;

/// Errors raised while validating or constructing SegFormer components.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegFormerError {
    /// The variant name is not one of the known `B0`..`B5` names.
    #[error("unknown SegFormer variant: {0:?}")]
    UnknownVariant(String),

    /// The number of output classes must be positive.
    #[error("num_classes must be positive: {0}")]
    InvalidNumClasses(usize),

    /// The input shape must be `[height, width, channels]`, all non-zero.
    #[error("input shape must be [height, width, channels] with non-zero entries: {0:?}")]
    InvalidInputShape(Vec<usize>),

    /// The per-stage hyper-parameter table is malformed.
    #[error("invalid stage table: {0}")]
    InvalidStageTable(String),

    /// The head count is zero, or does not divide the channel count.
    #[error("num_heads ({num_heads}) must be positive and divide channels ({channels})")]
    HeadsDoNotDivideChannels {
        /// The channel count.
        channels: usize,

        /// The head count.
        num_heads: usize,
    },

    /// The spatial-reduction ratio must be positive.
    #[error("sr_ratio must be positive: {0}")]
    InvalidSrRatio(usize),

    /// A dropout / drop-path probability outside of `[0.0, 1.0]`.
    #[error("probability must be in [0.0, 1.0]: {0:?}")]
    InvalidProbability(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            SegFormerError::UnknownVariant("mit_b9".to_string()).to_string(),
            "unknown SegFormer variant: \"mit_b9\""
        );
        assert_eq!(
            SegFormerError::HeadsDoNotDivideChannels {
                channels: 10,
                num_heads: 3
            }
            .to_string(),
            "num_heads (3) must be positive and divide channels (10)"
        );
        assert_eq!(
            SegFormerError::InvalidInputShape(vec![512, 512]).to_string(),
            "input shape must be [height, width, channels] with non-zero entries: [512, 512]"
        );
        assert_eq!(
            SegFormerError::InvalidProbability(1.5).to_string(),
            "probability must be in [0.0, 1.0]: 1.5"
        );
    }
}
