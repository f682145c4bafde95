//! Variant selection for levels 2 and up.
//!
//! For each incoming token the optimizer scores alternative encodings on
//! the simulator and commits whichever the current probabilities favor:
//!
//! - a literal may become a short rep match when the byte repeats the one
//!   behind rep0;
//! - a short DL code may be peeled from the front (literal first, then a
//!   shorter match), peeled from the back (shorter match, then a literal),
//!   expanded entirely into single-byte tokens, or kept strict;
//! - a strict DL code whose distance is on the recent stack is committed
//!   in rep form unless the simple form scores much better, because rep
//!   matches keep adapting and stay cheap over a run.
//!
//! The thresholds and malus constants below are empirical and part of the
//! observable output; do not retune them casually.

use crate::encoder::LzmaEncoder;
use crate::error::Result;
use crate::model::MIN_MATCH_LEN;
use std::io::Write;

/// Longest match the optimizer will consider taking apart. Longer matches
/// commit strictly; the peeling loop is bounded by this.
pub(crate) const SHORT_LEN_THRESHOLD: u32 = 79;

/// A head literal at least this probable is peeled off without scoring the
/// alternatives.
const LIT_THEN_DL_FAST_PATH: f64 = 0.875;

/// Flat factor applied to the match-then-literal candidate.
const DL_THEN_LIT_FACTOR: f64 = 0.995;

/// Rep form wins against the simple form at this fraction of its score.
const SIMPLE_VS_REP_BIAS: f64 = 0.55;

/// Penalty for peeling a head literal off a match, fading with distance
/// and length.
fn malus_lit_then_dl(dist: u32, len: u32) -> f64 {
    (0.064 - f64::from(dist) * 1e-9 - f64::from(len) * 3e-5).max(0.0)
}

/// Penalty for peeling the tail byte off a match.
fn malus_dl_then_lit(dist: u32, len: u32) -> f64 {
    (0.135 - f64::from(dist) * 1e-8 - f64::from(len) * 1e-4).max(0.0)
}

impl<W: Write> LzmaEncoder<W> {
    /// Literal entry point at optimizing levels: commit the byte as a short
    /// rep match when that form is more probable than the literal form.
    pub(crate) fn emit_literal_opt(&mut self, byte: u8) -> Result<()> {
        if self.simulator().short_rep_viable(byte) {
            let p_lit = self.simulator().strict_literal(byte);
            let p_rep = self.simulator().short_rep();
            if p_rep > p_lit {
                return self.commit_short_rep();
            }
        }
        self.commit_literal(byte)
    }

    /// DL entry point at optimizing levels. Iterative form of a recursion
    /// on `(dist, len - 1)`: peeled head literals commit immediately,
    /// peeled tail literals wait on a LIFO until the match core has been
    /// committed.
    pub(crate) fn emit_dl_opt(&mut self, dist_code: u32, mut len: u32) -> Result<()> {
        let mut pending_tail: Vec<u8> = Vec::new();

        loop {
            if len > self.short_len_threshold || len <= MIN_MATCH_LEN {
                self.commit_dl_biased(dist_code, len)?;
                break;
            }

            let dist = dist_code + 1;
            let head = self.history.get(self.ms.total_pos);
            let tail = self.history.get(self.ms.total_pos + u64::from(len) - 1);

            // Cheap head literal: peel it without scoring anything else.
            let mut after_head = self.simulator();
            let p_head = after_head.any_literal(head);
            if p_head >= LIT_THEN_DL_FAST_PATH {
                self.emit_literal_opt(head)?;
                len -= 1;
                continue;
            }

            let p_strict = self.simulator().strict_dl(dist_code, len, SIMPLE_VS_REP_BIAS);
            let p_expand = self.simulator().expanded_dl(len, p_strict);
            let p_dl_best = p_strict.max(p_expand);

            // Head literal, then the shorter match, scored in the
            // post-literal state.
            let p_after = after_head.strict_dl(dist_code, len - 1, SIMPLE_VS_REP_BIAS);
            if p_head * p_after * malus_lit_then_dl(dist, len) > p_dl_best {
                self.emit_literal_opt(head)?;
                len -= 1;
                continue;
            }

            // Shorter match, then the tail byte as a literal.
            let mut before_tail = self.simulator();
            let mut p_tail = before_tail.strict_dl(dist_code, len - 1, SIMPLE_VS_REP_BIAS);
            p_tail *= before_tail.any_literal(tail);
            if DL_THEN_LIT_FACTOR * p_tail * malus_dl_then_lit(dist, len) > p_dl_best {
                pending_tail.push(tail);
                len -= 1;
                continue;
            }

            // Full expansion into single-byte tokens.
            if p_expand > p_strict {
                for _ in 0..len {
                    let byte = self.history.get(self.ms.total_pos);
                    self.emit_literal_opt(byte)?;
                }
                break;
            }

            self.commit_dl_biased(dist_code, len)?;
            break;
        }

        while let Some(byte) = pending_tail.pop() {
            self.emit_literal_opt(byte)?;
        }
        Ok(())
    }

    /// Strict DL commit with the rep bias: a distance on the recent stack
    /// commits in rep form unless the simple form is better by a wide
    /// margin.
    fn commit_dl_biased(&mut self, dist_code: u32, len: u32) -> Result<()> {
        if let Some(index) = self.ms.rep_index(dist_code) {
            let p_rep = self.simulator().rep_match(index, len);
            let p_simple = self.simulator().simple_match(dist_code, len);
            if p_rep >= p_simple * SIMPLE_VS_REP_BIAS {
                return self.commit_rep(index, len);
            }
        }
        self.commit_match(dist_code, len)
    }
}
