//! # rawlzma
//!
//! Raw LZMA bitstream encoder.
//!
//! This crate implements the LZMA encoding machine: the adaptive range
//! coder, the literal/match/rep-match state machine, the length and
//! distance coders, and a variant optimizer that scores alternative
//! encodings of each token by simulated probability before committing.
//! Output is a bare `.lzma` stream (property byte, dictionary size,
//! optional uncompressed size, range-coded tokens, optional end marker)
//! that any stock LZMA decoder accepts.
//!
//! ## Usage
//!
//! ```
//! use rawlzma::{compress, EncoderConfig, Level};
//!
//! let data = b"compress me, compress me again";
//! let stream = compress(data, &EncoderConfig::default().level(Level::BEST)).unwrap();
//! assert_eq!(stream[0], 0x5D); // lc=3 lp=0 pb=2
//! ```
//!
//! ## Architecture
//!
//! An LZ77 front end produces literal and (distance, length) events and
//! feeds them to the [`LzmaEncoder`] through the [`TokenSink`] trait. The
//! built-in producer is a greedy hash-chain [`MatchFinder`]; any other
//! producer honoring the contract works. At levels 2 and 3 the encoder
//! routes every event through a variant optimizer that compares candidate
//! encodings (literal vs short rep, strict match vs peeled or expanded
//! forms) on a side-effect-free probability simulation, then commits the
//! winner.
//!
//! Decoding is out of scope; the test suite carries a reference decoder to
//! verify round-trips.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod encoder;
mod error;
mod history;
mod lz77;
mod model;
mod range_coder;
mod sim;
mod variant;

pub use encoder::{LzmaEncoder, TokenStats};
pub use error::{LzmaError, Result};
pub use lz77::{MatchFinder, TokenSink};
pub use model::Properties;

use std::io::Write;

/// Compression level, 0 to 3.
///
/// The level picks the default dictionary size and the match-finder
/// effort, and switches the variant optimizer on from [`Level::NORMAL`]
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level(u8);

impl Level {
    /// Level 0: literals only, smallest dictionary.
    pub const FAST: Self = Self(0);
    /// Level 1: greedy matching, no variant optimization.
    pub const QUICK: Self = Self(1);
    /// Level 2: variant optimization on.
    pub const NORMAL: Self = Self(2);
    /// Level 3: variant optimization with a deep match search.
    pub const BEST: Self = Self(3);

    /// Create a level, clamping to the valid range.
    pub fn new(level: u8) -> Self {
        Self(level.min(3))
    }

    /// The numeric level.
    pub fn index(self) -> u8 {
        self.0
    }

    pub(crate) fn uses_variants(self) -> bool {
        self.0 >= 2
    }

    pub(crate) fn default_dict_size(self) -> u32 {
        match self.0 {
            0 => 1 << 12,
            1 => 1 << 15,
            2 => 1 << 20,
            _ => 1 << 22,
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Encoder parameters.
///
/// The defaults mirror the common LZMA settings: `lc=3 lp=0 pb=2`, the
/// dictionary size implied by the level, an end-of-stream marker, and no
/// size field in the header.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Compression level.
    pub level: Level,
    /// Literal context bits (0..=8).
    pub lc: u32,
    /// Literal position bits (0..=4).
    pub lp: u32,
    /// Position state bits (0..=4).
    pub pb: u32,
    /// Dictionary size; `None` takes the level default. Clamped to
    /// `[2^12, 2^25]`, and rounded up to a power of two at level 3.
    pub dict_size: Option<u32>,
    /// Emit the end-of-stream marker.
    pub end_marker: bool,
    /// Emit the eight-byte uncompressed-size field in the header.
    pub header_has_size: bool,
    /// Longest match the variant optimizer takes apart. The default, 79,
    /// is part of the reference output; change it only for experiments.
    pub short_len_threshold: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            level: Level::default(),
            lc: 3,
            lp: 0,
            pb: 2,
            dict_size: None,
            end_marker: true,
            header_has_size: false,
            short_len_threshold: variant::SHORT_LEN_THRESHOLD,
        }
    }
}

impl EncoderConfig {
    /// Set the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the literal/position properties.
    pub fn properties(mut self, lc: u32, lp: u32, pb: u32) -> Self {
        self.lc = lc;
        self.lp = lp;
        self.pb = pb;
        self
    }

    /// Set an explicit dictionary size.
    pub fn dict_size(mut self, dict_size: u32) -> Self {
        self.dict_size = Some(dict_size);
        self
    }

    /// Enable or disable the end-of-stream marker.
    pub fn end_marker(mut self, end_marker: bool) -> Self {
        self.end_marker = end_marker;
        self
    }

    /// Enable or disable the uncompressed-size header field.
    pub fn header_has_size(mut self, header_has_size: bool) -> Self {
        self.header_has_size = header_has_size;
        self
    }

    /// Override the variant optimizer's match-length cutoff.
    pub fn short_len_threshold(mut self, threshold: u32) -> Self {
        self.short_len_threshold = threshold;
        self
    }
}

/// Compress `data` into a fresh buffer.
pub fn compress(data: &[u8], config: &EncoderConfig) -> Result<Vec<u8>> {
    compress_to(data, Vec::new(), config)
}

/// Compress `data` into `sink` and hand the sink back.
///
/// Writes the header, drives the built-in [`MatchFinder`] over the input,
/// then finishes the stream. Sink errors abort the encode.
pub fn compress_to<W: Write>(data: &[u8], sink: W, config: &EncoderConfig) -> Result<W> {
    let mut encoder = LzmaEncoder::new(sink, config)?;
    encoder.write_header(Some(data.len() as u64))?;
    let mut finder = MatchFinder::new(config.level, encoder.dict_size());
    finder.run(data, &mut encoder)?;
    encoder.finish()
}
