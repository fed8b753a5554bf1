use thiserror::Error;

/// Failure taxonomy recognised by the ANC core.
///
/// `ShapeMismatch` is never returned to a caller — it is constructed only to carry a
/// message into a `panic!`, since a length mismatch between reference and error chunks
/// is a programmer error, not a recoverable runtime condition. `NumericAnomaly` is
/// constructed and logged (never returned either) at the safety net in
/// `AdaptiveFilter::process_chunk` that resets filter state on a non-finite value.
#[derive(Debug, Error)]
pub enum AncError {
    #[error("PCM payload of {len} bytes is not a multiple of {bytes_per_sample} bytes per sample")]
    Format { len: usize, bytes_per_sample: usize },

    #[error("broker transport failure: {0}")]
    Transport(String),

    #[error("chunk length mismatch: reference has {reference_len} samples, error has {error_len}")]
    ShapeMismatch {
        reference_len: usize,
        error_len: usize,
    },

    #[error("non-finite value detected in filter state: {where_}")]
    NumericAnomaly { where_: &'static str },
}
