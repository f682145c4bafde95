//! The committed LZMA encoder machine.
//!
//! This is the authoritative encoder: it owns the probability model, the
//! history buffer, the range coder and the machine state, and it is the
//! only place probabilities are ever updated. An LZ77 front end drives it
//! through [`LzmaEncoder::emit_literal`] and [`LzmaEncoder::emit_dl_code`];
//! at levels 2 and up those calls detour through the variant optimizer,
//! which scores alternative encodings on a simulated copy of the state
//! before committing the best one here.

use crate::error::{LzmaError, Result};
use crate::history::HistoryBuffer;
use crate::model::{
    dist_len_state, dist_slot, LenProbs, ProbModel, Properties, State, ALIGN_BITS, ALIGN_SIZE,
    DIST_SLOT_BITS, END_DIST_MODEL, EOS_DIST_CODE, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_MID_BITS,
    MAX_MATCH_LEN, MIN_MATCH_LEN, START_DIST_MODEL,
};
use crate::range_coder::RangeEncoder;
use crate::sim::Simulator;
use crate::EncoderConfig;
use std::io::Write;

/// Smallest accepted dictionary size.
pub(crate) const DICT_SIZE_MIN: u32 = 1 << 12;
/// Largest accepted dictionary size.
pub(crate) const DICT_SIZE_MAX: u32 = 1 << 25;

/// Value-typed mirror of the encoder state: FSM state, stream position and
/// the recent-distance stack. The live encoder owns one; the simulator
/// walks disposable copies of it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MachineState {
    pub state: State,
    pub total_pos: u64,
    /// Recent distance codes (`distance - 1`), most recent first.
    pub reps: [u32; 4],
}

impl MachineState {
    fn new() -> Self {
        Self {
            state: State::new(),
            total_pos: 0,
            reps: [0; 4],
        }
    }

    pub fn pos_state(&self, pb_mask: u64) -> usize {
        (self.total_pos & pb_mask) as usize
    }

    pub fn apply_literal(&mut self) {
        self.state.on_literal();
        self.total_pos += 1;
    }

    pub fn apply_short_rep(&mut self) {
        self.state.on_short_rep();
        self.total_pos += 1;
    }

    pub fn apply_rep(&mut self, index: usize, len: u32) {
        let dist = self.reps[index];
        for i in (1..=index).rev() {
            self.reps[i] = self.reps[i - 1];
        }
        self.reps[0] = dist;
        self.state.on_rep();
        self.total_pos += u64::from(len);
    }

    pub fn apply_match(&mut self, dist_code: u32, len: u32) {
        self.reps[3] = self.reps[2];
        self.reps[2] = self.reps[1];
        self.reps[1] = self.reps[0];
        self.reps[0] = dist_code;
        self.state.on_match();
        self.total_pos += u64::from(len);
    }

    /// Index of `dist_code` in the recent-distance stack, if present.
    pub fn rep_index(&self, dist_code: u32) -> Option<usize> {
        self.reps.iter().position(|&r| r == dist_code)
    }
}

/// Committed-token counters, one per token class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStats {
    /// Literal bytes committed.
    pub literals: u64,
    /// Matches with an explicitly coded distance.
    pub simple_matches: u64,
    /// Matches reusing a recent distance.
    pub rep_matches: u64,
    /// Single-byte rep0 matches.
    pub short_reps: u64,
}

impl TokenStats {
    /// Total committed tokens.
    pub fn total(&self) -> u64 {
        self.literals + self.simple_matches + self.rep_matches + self.short_reps
    }
}

/// Raw LZMA stream encoder.
///
/// Produces the bare bitstream: property byte, dictionary size, optional
/// uncompressed size, then range-coded tokens and (optionally) the
/// end-of-stream marker. Feed it tokens through [`emit_literal`] and
/// [`emit_dl_code`], then call [`finish`].
///
/// [`emit_literal`]: LzmaEncoder::emit_literal
/// [`emit_dl_code`]: LzmaEncoder::emit_dl_code
/// [`finish`]: LzmaEncoder::finish
pub struct LzmaEncoder<W: Write> {
    pub(crate) rc: RangeEncoder<W>,
    pub(crate) model: ProbModel,
    pub(crate) history: HistoryBuffer,
    pub(crate) ms: MachineState,
    pub(crate) props: Properties,
    pub(crate) pb_mask: u64,
    pub(crate) variants: bool,
    pub(crate) short_len_threshold: u32,
    dict_size: u32,
    end_marker: bool,
    header_has_size: bool,
    stats: TokenStats,
}

impl<W: Write> LzmaEncoder<W> {
    /// Create an encoder writing to `sink`.
    ///
    /// The configured dictionary size is clamped to
    /// `[DICT_SIZE_MIN, DICT_SIZE_MAX]`; at level 3 it is additionally
    /// rounded up to a power of two. The history buffer is always allocated
    /// at the next power of two so wrap arithmetic stays a mask.
    pub fn new(sink: W, config: &EncoderConfig) -> Result<Self> {
        let props = Properties::new(config.lc, config.lp, config.pb);
        if !props.is_valid() {
            return Err(LzmaError::InvalidProperties {
                lc: config.lc,
                lp: config.lp,
                pb: config.pb,
            });
        }

        let requested = config
            .dict_size
            .unwrap_or_else(|| config.level.default_dict_size());
        let mut dict_size = requested.clamp(DICT_SIZE_MIN, DICT_SIZE_MAX);
        if config.level.index() == 3 {
            dict_size = dict_size.next_power_of_two();
        }

        Ok(Self {
            rc: RangeEncoder::new(sink),
            model: ProbModel::new(props),
            history: HistoryBuffer::new(dict_size.next_power_of_two() as usize),
            ms: MachineState::new(),
            props,
            pb_mask: (1 << config.pb) - 1,
            variants: config.level.uses_variants(),
            short_len_threshold: config.short_len_threshold,
            dict_size,
            end_marker: config.end_marker,
            header_has_size: config.header_has_size,
            stats: TokenStats::default(),
        })
    }

    /// The dictionary size that goes into the header.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    /// Committed-token counters so far.
    pub fn stats(&self) -> TokenStats {
        self.stats
    }

    /// Write the stream header: the packed property byte, four
    /// little-endian dictionary-size bytes, and (if configured) eight bytes
    /// of uncompressed size, all `0xFF` when the size is unknown.
    pub fn write_header(&mut self, uncompressed_size: Option<u64>) -> Result<()> {
        let props = self.props.pack();
        let dict = self.dict_size.to_le_bytes();
        let sink = self.rc.sink_mut();
        sink.write_all(&[props])?;
        sink.write_all(&dict)?;
        if self.header_has_size {
            let size = uncompressed_size.map_or([0xFF; 8], u64::to_le_bytes);
            sink.write_all(&size)?;
        }
        Ok(())
    }

    /// Emit one literal byte.
    pub fn emit_literal(&mut self, byte: u8) -> Result<()> {
        if self.variants {
            self.emit_literal_opt(byte)
        } else {
            self.commit_literal(byte)
        }
    }

    /// Emit a (distance, length) match.
    ///
    /// `dist` is the actual distance (at least 1); the history at that
    /// distance must hold `len` valid bytes, which is the case whenever
    /// `dist <= total_pos` and `dist` fits the dictionary. The match bytes
    /// are copied into the history up front so every later probe, both
    /// simulated and committed, reads settled text.
    ///
    /// # Panics
    ///
    /// Panics when the producer contract is violated: `dist == 0`, `len`
    /// outside `[2, 273]`, or a distance reaching past the written history.
    pub fn emit_dl_code(&mut self, dist: u32, len: u32) -> Result<()> {
        assert!(dist >= 1, "match distance must be at least 1");
        assert!(
            (MIN_MATCH_LEN..=MAX_MATCH_LEN).contains(&len),
            "match length {len} outside [{MIN_MATCH_LEN}, {MAX_MATCH_LEN}]"
        );
        assert!(
            u64::from(dist) <= self.ms.total_pos,
            "match distance {dist} reaches past the written history"
        );
        assert!(
            dist as usize <= self.history.capacity(),
            "match distance {dist} exceeds the dictionary"
        );

        let dist_code = dist - 1;
        self.history.stage_match(self.ms.total_pos, dist_code, len);

        if self.variants {
            self.emit_dl_opt(dist_code, len)
        } else {
            self.commit_dl_plain(dist_code, len)
        }
    }

    /// Finish the stream: emit the end-of-stream marker if configured,
    /// flush the range coder, and hand the sink back.
    pub fn finish(mut self) -> Result<W> {
        if self.end_marker {
            self.encode_match_token(EOS_DIST_CODE, MIN_MATCH_LEN)?;
        }
        self.rc.flush()?;
        Ok(self.rc.into_inner())
    }

    pub(crate) fn simulator(&self) -> Simulator<'_> {
        Simulator::new(&self.model, &self.history, self.pb_mask, self.ms)
    }

    /// Last committed byte, or 0 at stream start.
    fn prev_byte(&self) -> u8 {
        if self.ms.total_pos == 0 {
            0
        } else {
            self.history.get(self.ms.total_pos - 1)
        }
    }

    /// Straight commit of a DL code: the rep form whenever the distance is
    /// on the recent stack, the simple form otherwise.
    pub(crate) fn commit_dl_plain(&mut self, dist_code: u32, len: u32) -> Result<()> {
        match self.ms.rep_index(dist_code) {
            Some(index) => self.commit_rep(index, len),
            None => self.commit_match(dist_code, len),
        }
    }

    pub(crate) fn commit_literal(&mut self, byte: u8) -> Result<()> {
        let pos_state = self.ms.pos_state(self.pb_mask);
        let st = self.ms.state.index();
        self.rc
            .encode_bit(&mut self.model.switch.is_match[st][pos_state], 0)?;

        let cluster = self.model.lit.cluster_index(self.ms.total_pos, self.prev_byte());
        if self.ms.state.is_literal() {
            self.encode_literal_plain(cluster, byte)?;
        } else {
            let match_byte = self.history.back(self.ms.total_pos, self.ms.reps[0]);
            self.encode_literal_matched(cluster, byte, match_byte)?;
        }

        self.history.put(self.ms.total_pos, byte);
        self.ms.apply_literal();
        self.stats.literals += 1;
        Ok(())
    }

    fn encode_literal_plain(&mut self, cluster: usize, byte: u8) -> Result<()> {
        let mut symbol = usize::from(byte) | 0x100;
        let mut node = 1usize;
        loop {
            let bit = (symbol >> 7) & 1;
            symbol <<= 1;
            self.rc
                .encode_bit(&mut self.model.lit.cluster_mut(cluster)[node], bit as u32)?;
            node = (node << 1) | bit;
            if node >= 0x100 {
                return Ok(());
            }
        }
    }

    /// Matched-mode literal: each coded bit is additionally conditioned on
    /// the corresponding bit of the byte behind rep0, until the symbol
    /// diverges from it, after which coding collapses to plain mode.
    fn encode_literal_matched(&mut self, cluster: usize, byte: u8, match_byte: u8) -> Result<()> {
        let mut symbol = usize::from(byte) | 0x100;
        let mut matched = usize::from(match_byte) << 1;
        let mut node = 1usize;
        loop {
            let match_bit = (matched >> 8) & 1;
            matched <<= 1;
            let bit = (symbol >> 7) & 1;
            symbol <<= 1;

            let index = 0x100 + (match_bit << 8) + node;
            self.rc
                .encode_bit(&mut self.model.lit.cluster_mut(cluster)[index], bit as u32)?;
            node = (node << 1) | bit;
            if node >= 0x100 {
                return Ok(());
            }

            if bit != match_bit {
                while node < 0x100 {
                    let bit = (symbol >> 7) & 1;
                    symbol <<= 1;
                    self.rc
                        .encode_bit(&mut self.model.lit.cluster_mut(cluster)[node], bit as u32)?;
                    node = (node << 1) | bit;
                }
                return Ok(());
            }
        }
    }

    pub(crate) fn commit_short_rep(&mut self) -> Result<()> {
        let pos_state = self.ms.pos_state(self.pb_mask);
        let st = self.ms.state.index();
        self.rc
            .encode_bit(&mut self.model.switch.is_match[st][pos_state], 1)?;
        self.rc.encode_bit(&mut self.model.switch.is_rep[st], 1)?;
        self.rc.encode_bit(&mut self.model.switch.is_rep_g0[st], 0)?;
        self.rc
            .encode_bit(&mut self.model.switch.is_rep0_long[st][pos_state], 0)?;

        let byte = self.history.back(self.ms.total_pos, self.ms.reps[0]);
        self.history.put(self.ms.total_pos, byte);
        self.ms.apply_short_rep();
        self.stats.short_reps += 1;
        Ok(())
    }

    pub(crate) fn commit_rep(&mut self, index: usize, len: u32) -> Result<()> {
        let pos_state = self.ms.pos_state(self.pb_mask);
        let st = self.ms.state.index();
        self.rc
            .encode_bit(&mut self.model.switch.is_match[st][pos_state], 1)?;
        self.rc.encode_bit(&mut self.model.switch.is_rep[st], 1)?;
        match index {
            0 => {
                self.rc.encode_bit(&mut self.model.switch.is_rep_g0[st], 0)?;
                self.rc
                    .encode_bit(&mut self.model.switch.is_rep0_long[st][pos_state], 1)?;
            }
            1 => {
                self.rc.encode_bit(&mut self.model.switch.is_rep_g0[st], 1)?;
                self.rc.encode_bit(&mut self.model.switch.is_rep_g1[st], 0)?;
            }
            2 => {
                self.rc.encode_bit(&mut self.model.switch.is_rep_g0[st], 1)?;
                self.rc.encode_bit(&mut self.model.switch.is_rep_g1[st], 1)?;
                self.rc.encode_bit(&mut self.model.switch.is_rep_g2[st], 0)?;
            }
            3 => {
                self.rc.encode_bit(&mut self.model.switch.is_rep_g0[st], 1)?;
                self.rc.encode_bit(&mut self.model.switch.is_rep_g1[st], 1)?;
                self.rc.encode_bit(&mut self.model.switch.is_rep_g2[st], 1)?;
            }
            _ => unreachable!("rep index out of range"),
        }
        encode_length(&mut self.rc, &mut self.model.rep_len, len, pos_state)?;

        self.ms.apply_rep(index, len);
        self.stats.rep_matches += 1;
        Ok(())
    }

    pub(crate) fn commit_match(&mut self, dist_code: u32, len: u32) -> Result<()> {
        self.encode_match_token(dist_code, len)?;
        self.ms.apply_match(dist_code, len);
        self.stats.simple_matches += 1;
        Ok(())
    }

    /// Simple-match symbols only; no state update. The end-of-stream marker
    /// uses this directly with the sentinel distance code.
    fn encode_match_token(&mut self, dist_code: u32, len: u32) -> Result<()> {
        let pos_state = self.ms.pos_state(self.pb_mask);
        let st = self.ms.state.index();
        self.rc
            .encode_bit(&mut self.model.switch.is_match[st][pos_state], 1)?;
        self.rc.encode_bit(&mut self.model.switch.is_rep[st], 0)?;
        encode_length(&mut self.rc, &mut self.model.len, len, pos_state)?;
        self.encode_distance(dist_code, len)
    }

    fn encode_distance(&mut self, dist_code: u32, len: u32) -> Result<()> {
        let slot = dist_slot(dist_code);
        self.rc.encode_tree(
            &mut self.model.dist.slot[dist_len_state(len)],
            DIST_SLOT_BITS,
            slot,
        )?;

        if slot >= START_DIST_MODEL {
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let reduced = dist_code - base;

            if slot < END_DIST_MODEL {
                // Reverse tree over this slot's slice of the shared pool.
                let mut node = 1u32;
                for i in 0..footer_bits {
                    let bit = (reduced >> i) & 1;
                    let index = (base + node) as usize - slot as usize - 1;
                    self.rc.encode_bit(&mut self.model.dist.pos[index], bit)?;
                    node = (node << 1) | bit;
                }
            } else {
                self.rc
                    .encode_direct_bits(reduced >> ALIGN_BITS, footer_bits - ALIGN_BITS)?;
                self.rc.encode_tree_rev(
                    &mut self.model.dist.align,
                    ALIGN_BITS,
                    reduced & (ALIGN_SIZE as u32 - 1),
                )?;
            }
        }
        Ok(())
    }
}

impl<W: Write> crate::lz77::TokenSink for LzmaEncoder<W> {
    fn emit_literal(&mut self, byte: u8) -> Result<()> {
        LzmaEncoder::emit_literal(self, byte)
    }

    fn emit_dl_code(&mut self, dist: u32, len: u32) -> Result<()> {
        LzmaEncoder::emit_dl_code(self, dist, len)
    }

    fn rep_distances(&self) -> [u32; 4] {
        self.ms.reps.map(|code| code + 1)
    }
}

/// Encode a match length through the three-range coder: lengths 2..=9 in
/// the low tree, 10..=17 in the mid tree, 18..=273 in the high tree.
fn encode_length<W: Write>(
    rc: &mut RangeEncoder<W>,
    probs: &mut LenProbs,
    len: u32,
    pos_state: usize,
) -> Result<()> {
    let len = len - MIN_MATCH_LEN;
    if len < 1 << LEN_LOW_BITS {
        rc.encode_bit(&mut probs.choice_1, 0)?;
        rc.encode_tree(&mut probs.low[pos_state], LEN_LOW_BITS, len)
    } else if len < (1 << LEN_LOW_BITS) + (1 << LEN_MID_BITS) {
        rc.encode_bit(&mut probs.choice_1, 1)?;
        rc.encode_bit(&mut probs.choice_2, 0)?;
        rc.encode_tree(
            &mut probs.mid[pos_state],
            LEN_MID_BITS,
            len - (1 << LEN_LOW_BITS),
        )
    } else {
        rc.encode_bit(&mut probs.choice_1, 1)?;
        rc.encode_bit(&mut probs.choice_2, 1)?;
        rc.encode_tree(
            &mut probs.high,
            LEN_HIGH_BITS,
            len - (1 << LEN_LOW_BITS) - (1 << LEN_MID_BITS),
        )
    }
}
