//! Encoder error types.

use thiserror::Error;

/// Errors surfaced while encoding an LZMA stream.
///
/// Producer contract violations (a zero distance, a length outside the
/// encodable range, a distance reaching past the written history) are
/// programming errors in the driving front end and panic instead of
/// returning a variant; see [`crate::LzmaEncoder::emit_dl_code`].
#[derive(Debug, Error)]
pub enum LzmaError {
    /// The compressed-byte sink failed. The encoder gives up immediately;
    /// all owned buffers are released on the way out.
    #[error("output sink aborted: {0}")]
    Io(#[from] std::io::Error),

    /// Literal/position properties outside the encodable domain.
    #[error("invalid properties: lc={lc} lp={lp} pb={pb} (need lc <= 8, lp <= 4, pb <= 4)")]
    InvalidProperties {
        /// Literal context bits.
        lc: u32,
        /// Literal position bits.
        lp: u32,
        /// Position state bits.
        pb: u32,
    },
}

/// Result type for encoder operations.
pub type Result<T> = std::result::Result<T, LzmaError>;
