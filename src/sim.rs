//! Side-effect-free probability simulation.
//!
//! The variant optimizer needs to know how probable a candidate token
//! sequence would be under the current model without disturbing it. The
//! [`Simulator`] mirrors every coding path of the committed encoder, but
//! consults probabilities read-only and multiplies them into an `f64`
//! product instead of narrowing the range coder. It walks its own copy of
//! the machine state, so scoring a candidate leaves the live encoder
//! untouched.
//!
//! A single bit with probability counter `p` contributes `p / 2048` when
//! coded as 0 and `1 - p / 2048` when coded as 1; direct bits contribute
//! 1/2 each.

use crate::encoder::MachineState;
use crate::history::HistoryBuffer;
use crate::model::{
    dist_len_state, dist_slot, LenProbs, ProbModel, ALIGN_BITS, ALIGN_SIZE, DIST_SLOT_BITS,
    END_DIST_MODEL, LEN_LOW_BITS, LEN_MID_BITS, LEN_HIGH_BITS, START_DIST_MODEL,
};
use crate::range_coder::{Prob, PROB_SCALE};

/// Probability of coding `bit` against counter `prob`.
#[inline]
pub(crate) fn sim_bit(prob: Prob, bit: u32) -> f64 {
    let p0 = f64::from(prob) / f64::from(PROB_SCALE);
    if bit == 0 {
        p0
    } else {
        1.0 - p0
    }
}

/// A shadow encoder scoring token sequences against the live model.
///
/// Probes into the history assume the bytes under consideration have been
/// staged by `emit_dl_code`, which always happens before any simulation.
#[derive(Clone)]
pub(crate) struct Simulator<'a> {
    model: &'a ProbModel,
    history: &'a HistoryBuffer,
    pb_mask: u64,
    pub ms: MachineState,
}

impl<'a> Simulator<'a> {
    pub fn new(
        model: &'a ProbModel,
        history: &'a HistoryBuffer,
        pb_mask: u64,
        ms: MachineState,
    ) -> Self {
        Self {
            model,
            history,
            pb_mask,
            ms,
        }
    }

    fn pos_state(&self) -> usize {
        self.ms.pos_state(self.pb_mask)
    }

    fn prev_byte(&self) -> u8 {
        if self.ms.total_pos == 0 {
            0
        } else {
            self.history.get(self.ms.total_pos - 1)
        }
    }

    /// Whether the next byte could be committed as a short rep: it must
    /// equal the byte behind rep0 and the history must reach that far.
    pub fn short_rep_viable(&self, byte: u8) -> bool {
        let rep0 = self.ms.reps[0];
        self.ms.total_pos > u64::from(rep0) + 1 && byte == self.history.back(self.ms.total_pos, rep0)
    }

    fn tree(probs: &[Prob], num_bits: u32, symbol: u32) -> f64 {
        let mut product = 1.0;
        let mut node = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            product *= sim_bit(probs[node], bit);
            node = (node << 1) | bit as usize;
        }
        product
    }

    fn tree_rev(probs: &[Prob], num_bits: u32, symbol: u32) -> f64 {
        let mut product = 1.0;
        let mut node = 1usize;
        for i in 0..num_bits {
            let bit = (symbol >> i) & 1;
            product *= sim_bit(probs[node], bit);
            node = (node << 1) | bit as usize;
        }
        product
    }

    fn length(probs: &LenProbs, len: u32, pos_state: usize) -> f64 {
        let len = len - crate::model::MIN_MATCH_LEN;
        if len < 1 << LEN_LOW_BITS {
            sim_bit(probs.choice_1, 0) * Self::tree(&probs.low[pos_state], LEN_LOW_BITS, len)
        } else if len < (1 << LEN_LOW_BITS) + (1 << LEN_MID_BITS) {
            sim_bit(probs.choice_1, 1)
                * sim_bit(probs.choice_2, 0)
                * Self::tree(&probs.mid[pos_state], LEN_MID_BITS, len - (1 << LEN_LOW_BITS))
        } else {
            sim_bit(probs.choice_1, 1)
                * sim_bit(probs.choice_2, 1)
                * Self::tree(
                    &probs.high,
                    LEN_HIGH_BITS,
                    len - (1 << LEN_LOW_BITS) - (1 << LEN_MID_BITS),
                )
        }
    }

    fn distance(&self, dist_code: u32, len: u32) -> f64 {
        let slot = dist_slot(dist_code);
        let mut product = Self::tree(
            &self.model.dist.slot[dist_len_state(len)],
            DIST_SLOT_BITS,
            slot,
        );

        if slot >= START_DIST_MODEL {
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let reduced = dist_code - base;

            if slot < END_DIST_MODEL {
                let mut node = 1u32;
                for i in 0..footer_bits {
                    let bit = (reduced >> i) & 1;
                    let index = (base + node) as usize - slot as usize - 1;
                    product *= sim_bit(self.model.dist.pos[index], bit);
                    node = (node << 1) | bit;
                }
            } else {
                // Direct bits are equiprobable by construction.
                product *= 0.5f64.powi((footer_bits - ALIGN_BITS) as i32);
                product *= Self::tree_rev(
                    &self.model.dist.align,
                    ALIGN_BITS,
                    reduced & (ALIGN_SIZE as u32 - 1),
                );
            }
        }
        product
    }

    /// Probability of committing `byte` as a literal. Advances the shadow
    /// state past it.
    pub fn strict_literal(&mut self, byte: u8) -> f64 {
        let pos_state = self.pos_state();
        let st = self.ms.state.index();
        let mut product = sim_bit(self.model.switch.is_match[st][pos_state], 0);

        let cluster = self.model.lit.cluster_index(self.ms.total_pos, self.prev_byte());
        let probs = self.model.lit.cluster(cluster);

        if self.ms.state.is_literal() {
            let mut symbol = usize::from(byte) | 0x100;
            let mut node = 1usize;
            loop {
                let bit = (symbol >> 7) & 1;
                symbol <<= 1;
                product *= sim_bit(probs[node], bit as u32);
                node = (node << 1) | bit;
                if node >= 0x100 {
                    break;
                }
            }
        } else {
            let match_byte = self.history.back(self.ms.total_pos, self.ms.reps[0]);
            let mut symbol = usize::from(byte) | 0x100;
            let mut matched = usize::from(match_byte) << 1;
            let mut node = 1usize;
            loop {
                let match_bit = (matched >> 8) & 1;
                matched <<= 1;
                let bit = (symbol >> 7) & 1;
                symbol <<= 1;

                product *= sim_bit(probs[0x100 + (match_bit << 8) + node], bit as u32);
                node = (node << 1) | bit;
                if node >= 0x100 {
                    break;
                }
                if bit != match_bit {
                    while node < 0x100 {
                        let bit = (symbol >> 7) & 1;
                        symbol <<= 1;
                        product *= sim_bit(probs[node], bit as u32);
                        node = (node << 1) | bit;
                    }
                    break;
                }
            }
        }

        self.ms.apply_literal();
        product
    }

    /// Probability of a short rep match at the cursor. Advances past it.
    pub fn short_rep(&mut self) -> f64 {
        let pos_state = self.pos_state();
        let st = self.ms.state.index();
        let product = sim_bit(self.model.switch.is_match[st][pos_state], 1)
            * sim_bit(self.model.switch.is_rep[st], 1)
            * sim_bit(self.model.switch.is_rep_g0[st], 0)
            * sim_bit(self.model.switch.is_rep0_long[st][pos_state], 0);
        self.ms.apply_short_rep();
        product
    }

    /// Probability of whichever single-byte form is more probable for
    /// `byte`: a strict literal, or a short rep when the byte repeats the
    /// one behind rep0. Advances along the chosen form.
    pub fn any_literal(&mut self, byte: u8) -> f64 {
        if self.short_rep_viable(byte) {
            let mut as_rep = self.clone();
            let p_rep = as_rep.short_rep();
            let p_lit = self.strict_literal(byte);
            if p_rep > p_lit {
                self.ms = as_rep.ms;
                return p_rep;
            }
            return p_lit;
        }
        self.strict_literal(byte)
    }

    /// Probability of a rep match at `index` with length `len`.
    pub fn rep_match(&mut self, index: usize, len: u32) -> f64 {
        let pos_state = self.pos_state();
        let st = self.ms.state.index();
        let mut product = sim_bit(self.model.switch.is_match[st][pos_state], 1)
            * sim_bit(self.model.switch.is_rep[st], 1);
        product *= match index {
            0 => {
                sim_bit(self.model.switch.is_rep_g0[st], 0)
                    * sim_bit(self.model.switch.is_rep0_long[st][pos_state], 1)
            }
            1 => {
                sim_bit(self.model.switch.is_rep_g0[st], 1)
                    * sim_bit(self.model.switch.is_rep_g1[st], 0)
            }
            2 => {
                sim_bit(self.model.switch.is_rep_g0[st], 1)
                    * sim_bit(self.model.switch.is_rep_g1[st], 1)
                    * sim_bit(self.model.switch.is_rep_g2[st], 0)
            }
            _ => {
                sim_bit(self.model.switch.is_rep_g0[st], 1)
                    * sim_bit(self.model.switch.is_rep_g1[st], 1)
                    * sim_bit(self.model.switch.is_rep_g2[st], 1)
            }
        };
        product *= Self::length(&self.model.rep_len, len, pos_state);
        self.ms.apply_rep(index, len);
        product
    }

    /// Probability of a simple match with an explicitly coded distance.
    pub fn simple_match(&mut self, dist_code: u32, len: u32) -> f64 {
        let pos_state = self.pos_state();
        let st = self.ms.state.index();
        let product = sim_bit(self.model.switch.is_match[st][pos_state], 1)
            * sim_bit(self.model.switch.is_rep[st], 0)
            * Self::length(&self.model.len, len, pos_state)
            * self.distance(dist_code, len);
        self.ms.apply_match(dist_code, len);
        product
    }

    /// Probability of the DL code in the form the committed encoder would
    /// pick: the rep form when the distance sits on the recent stack and
    /// scores at least `rep_bias` times the simple form.
    pub fn strict_dl(&mut self, dist_code: u32, len: u32, rep_bias: f64) -> f64 {
        if let Some(index) = self.ms.rep_index(dist_code) {
            let mut as_rep = self.clone();
            let p_rep = as_rep.rep_match(index, len);
            let p_simple = self.clone().simple_match(dist_code, len);
            if p_rep >= p_simple * rep_bias {
                self.ms = as_rep.ms;
                return p_rep;
            }
        }
        self.simple_match(dist_code, len)
    }

    /// Probability of replacing the staged match at the cursor with `len`
    /// single-byte tokens, greedily taking the better form for each byte.
    /// Gives up (returns 0) as soon as the running product falls below
    /// `give_up`.
    pub fn expanded_dl(&mut self, len: u32, give_up: f64) -> f64 {
        let mut product = 1.0;
        for _ in 0..len {
            let byte = self.history.get(self.ms.total_pos);
            product *= self.any_literal(byte);
            if product < give_up {
                return 0.0;
            }
        }
        product
    }
}
