//! Shared test support: a reference LZMA decoder and test-data generators.
//!
//! The crate deliberately exports no decode API, so round-trip tests carry
//! their own decoder. It follows the stock LZMA decoding procedure and
//! shares nothing with the encoder under test beyond the wire format.
//!
//! Note: `#![allow(dead_code)]` because each integration test file compiles
//! this module separately and uses a subset of it.

#![allow(dead_code)]

use rand::{rngs::StdRng, RngCore, SeedableRng};

const STATES: usize = 12;
const POS_STATES: usize = 16;
const PROB_INIT: u16 = 1024;
const PROB_SCALE: u16 = 2048;
const MOVE_BITS: u32 = 5;
const TOP: u32 = 1 << 24;
const MIN_MATCH_LEN: u32 = 2;
const EOS_DIST_CODE: u32 = 0xFFFF_FFFF;

const UPDATE_LITERAL: [u8; STATES] = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];
const UPDATE_MATCH: [u8; STATES] = [7, 7, 7, 7, 7, 7, 7, 10, 10, 10, 10, 10];
const UPDATE_REP: [u8; STATES] = [8, 8, 8, 8, 8, 8, 8, 11, 11, 11, 11, 11];
const UPDATE_SHORT_REP: [u8; STATES] = [9, 9, 9, 9, 9, 9, 9, 11, 11, 11, 11, 11];

struct RangeDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self, String> {
        if data.len() < 5 {
            return Err("stream shorter than range-coder preamble".into());
        }
        if data[0] != 0 {
            return Err(format!("stream must start with 0x00, got {:#04x}", data[0]));
        }
        let mut dec = Self {
            data,
            pos: 1,
            range: u32::MAX,
            code: 0,
        };
        for _ in 0..4 {
            dec.code = (dec.code << 8) | u32::from(dec.next_byte());
        }
        Ok(dec)
    }

    /// Bytes past the end read as zero: trailing padding after the end
    /// marker must not derail decoding.
    fn next_byte(&mut self) -> u8 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    fn normalize(&mut self) {
        if self.range < TOP {
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(self.next_byte());
        }
    }

    fn bit(&mut self, prob: &mut u16) -> u32 {
        self.normalize();
        let bound = (self.range >> 11) * u32::from(*prob);
        if self.code < bound {
            self.range = bound;
            *prob += (PROB_SCALE - *prob) >> MOVE_BITS;
            0
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            1
        }
    }

    fn direct_bits(&mut self, count: u32) -> u32 {
        let mut value = 0;
        for _ in 0..count {
            self.normalize();
            self.range >>= 1;
            self.code = self.code.wrapping_sub(self.range);
            let bit = if (self.code as i32) < 0 {
                self.code = self.code.wrapping_add(self.range);
                0
            } else {
                1
            };
            value = (value << 1) | bit;
        }
        value
    }

    fn tree(&mut self, probs: &mut [u16], num_bits: u32) -> u32 {
        let mut node = 1usize;
        for _ in 0..num_bits {
            let bit = self.bit(&mut probs[node]);
            node = (node << 1) | bit as usize;
        }
        node as u32 - (1 << num_bits)
    }

    fn tree_rev(&mut self, probs: &mut [u16], num_bits: u32) -> u32 {
        let mut node = 1usize;
        let mut value = 0;
        for i in 0..num_bits {
            let bit = self.bit(&mut probs[node]);
            node = (node << 1) | bit as usize;
            value |= bit << i;
        }
        value
    }
}

struct LenModel {
    choice_1: u16,
    choice_2: u16,
    low: [[u16; 8]; POS_STATES],
    mid: [[u16; 8]; POS_STATES],
    high: [u16; 256],
}

impl LenModel {
    fn new() -> Self {
        Self {
            choice_1: PROB_INIT,
            choice_2: PROB_INIT,
            low: [[PROB_INIT; 8]; POS_STATES],
            mid: [[PROB_INIT; 8]; POS_STATES],
            high: [PROB_INIT; 256],
        }
    }

    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> u32 {
        if rc.bit(&mut self.choice_1) == 0 {
            MIN_MATCH_LEN + rc.tree(&mut self.low[pos_state], 3)
        } else if rc.bit(&mut self.choice_2) == 0 {
            MIN_MATCH_LEN + 8 + rc.tree(&mut self.mid[pos_state], 3)
        } else {
            MIN_MATCH_LEN + 16 + rc.tree(&mut self.high, 8)
        }
    }
}

/// Decode a complete raw LZMA stream (header included).
///
/// `has_size` says whether the eight-byte uncompressed-size field is
/// present; a value of all `0xFF` means unknown, falling back to the end
/// marker.
pub fn decode(stream: &[u8], has_size: bool) -> Result<Vec<u8>, String> {
    let header_len = if has_size { 13 } else { 5 };
    if stream.len() < header_len {
        return Err("stream shorter than header".into());
    }

    let props = stream[0];
    if props >= 9 * 5 * 5 {
        return Err(format!("bad property byte {props:#04x}"));
    }
    let lc = u32::from(props) % 9;
    let lp = (u32::from(props) % 45) / 9;
    let pb = u32::from(props) / 45;
    let pb_mask = (1u64 << pb) - 1;
    let lp_mask = (1u64 << lp) - 1;

    let _dict_size = u32::from_le_bytes(stream[1..5].try_into().unwrap());
    let size = if has_size {
        let raw = u64::from_le_bytes(stream[5..13].try_into().unwrap());
        (raw != u64::MAX).then_some(raw)
    } else {
        None
    };

    let mut rc = RangeDecoder::new(&stream[header_len..])?;

    let mut is_match = [[PROB_INIT; POS_STATES]; STATES];
    let mut is_rep = [PROB_INIT; STATES];
    let mut is_rep_g0 = [PROB_INIT; STATES];
    let mut is_rep_g1 = [PROB_INIT; STATES];
    let mut is_rep_g2 = [PROB_INIT; STATES];
    let mut is_rep0_long = [[PROB_INIT; POS_STATES]; STATES];
    let mut lit = vec![[PROB_INIT; 0x300]; 1 << (lc + lp)];
    let mut len_model = LenModel::new();
    let mut rep_len_model = LenModel::new();
    let mut dist_slot = [[PROB_INIT; 64]; 4];
    let mut dist_pos = [PROB_INIT; 128 - 14];
    let mut dist_align = [PROB_INIT; 16];

    let mut out: Vec<u8> = Vec::new();
    let mut state = 0usize;
    let mut reps = [0u32; 4];

    loop {
        if let Some(size) = size {
            if out.len() as u64 >= size {
                return Ok(out);
            }
        }

        let pos_state = (out.len() as u64 & pb_mask) as usize;

        if rc.bit(&mut is_match[state][pos_state]) == 0 {
            // Literal.
            let prev = out.last().copied().unwrap_or(0);
            let cluster = (((out.len() as u64 & lp_mask) << lc) as usize)
                | (usize::from(prev) >> (8 - lc as usize));
            let probs = &mut lit[cluster];

            let byte = if state < 7 {
                let mut node = 1usize;
                while node < 0x100 {
                    node = (node << 1) | rc.bit(&mut probs[node]) as usize;
                }
                (node - 0x100) as u8
            } else {
                if (reps[0] as usize) >= out.len() {
                    return Err("matched literal before any match".into());
                }
                let mut matched = usize::from(out[out.len() - 1 - reps[0] as usize]);
                let mut node = 1usize;
                while node < 0x100 {
                    let match_bit = (matched >> 7) & 1;
                    matched = (matched << 1) & 0xFF;
                    let bit = rc.bit(&mut probs[0x100 + (match_bit << 8) + node]) as usize;
                    node = (node << 1) | bit;
                    if bit != match_bit {
                        while node < 0x100 {
                            node = (node << 1) | rc.bit(&mut probs[node]) as usize;
                        }
                        break;
                    }
                }
                (node - 0x100) as u8
            };

            out.push(byte);
            state = UPDATE_LITERAL[state] as usize;
            continue;
        }

        // Match of some kind.
        let len;
        if rc.bit(&mut is_rep[state]) == 0 {
            // Simple match: length, then an explicitly coded distance.
            len = len_model.decode(&mut rc, pos_state);

            let len_state = ((len - MIN_MATCH_LEN).min(3)) as usize;
            let slot = rc.tree(&mut dist_slot[len_state], 6);
            let dist_code = if slot < 4 {
                slot
            } else {
                let footer = (slot >> 1) - 1;
                let base = (2 | (slot & 1)) << footer;
                if slot < 14 {
                    let mut node = 1u32;
                    let mut value = 0u32;
                    for i in 0..footer {
                        let index = (base + node) as usize - slot as usize - 1;
                        let bit = rc.bit(&mut dist_pos[index]);
                        node = (node << 1) | bit;
                        value |= bit << i;
                    }
                    base + value
                } else {
                    let high = rc.direct_bits(footer - 4);
                    let low = rc.tree_rev(&mut dist_align, 4);
                    base + (high << 4) + low
                }
            };

            if dist_code == EOS_DIST_CODE {
                if let Some(size) = size {
                    return Err(format!(
                        "end marker before the declared size ({} of {size} bytes)",
                        out.len()
                    ));
                }
                return Ok(out);
            }

            reps[3] = reps[2];
            reps[2] = reps[1];
            reps[1] = reps[0];
            reps[0] = dist_code;
            state = UPDATE_MATCH[state] as usize;
        } else if rc.bit(&mut is_rep_g0[state]) == 0 {
            if rc.bit(&mut is_rep0_long[state][pos_state]) == 0 {
                // Short rep: one byte at rep0.
                if (reps[0] as usize) >= out.len() {
                    return Err("short rep past history".into());
                }
                let byte = out[out.len() - 1 - reps[0] as usize];
                out.push(byte);
                state = UPDATE_SHORT_REP[state] as usize;
                continue;
            }
            len = rep_len_model.decode(&mut rc, pos_state);
            state = UPDATE_REP[state] as usize;
        } else {
            // Rep at index 1..3; rotate it to the front.
            let index = if rc.bit(&mut is_rep_g1[state]) == 0 {
                1
            } else if rc.bit(&mut is_rep_g2[state]) == 0 {
                2
            } else {
                3
            };
            let dist = reps[index];
            for i in (1..=index).rev() {
                reps[i] = reps[i - 1];
            }
            reps[0] = dist;
            len = rep_len_model.decode(&mut rc, pos_state);
            state = UPDATE_REP[state] as usize;
        }

        let dist = reps[0] as usize;
        if dist >= out.len() {
            return Err(format!("distance {} past history {}", dist + 1, out.len()));
        }
        for _ in 0..len {
            let byte = out[out.len() - 1 - dist];
            out.push(byte);
        }
    }
}

/// Round-trip helper for streams produced by [`rawlzma::compress`] with
/// the default header layout (no size field, end marker present).
pub fn decode_default(stream: &[u8]) -> Vec<u8> {
    decode(stream, false).expect("reference decode failed")
}

// Test data generators.

pub fn zeros(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

pub fn ones(len: usize) -> Vec<u8> {
    vec![0xFFu8; len]
}

/// Reproducible high-entropy bytes.
pub fn random(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// English-like text cycled to the requested length.
pub fn text(len: usize) -> Vec<u8> {
    let sample = b"It is a truth universally acknowledged, that a single man in \
                   possession of a good fortune, must be in want of a wife. \
                   However little known the feelings or views of such a man may \
                   be on his first entering a neighbourhood, this truth is so \
                   well fixed in the minds of the surrounding families. ";
    sample.iter().copied().cycle().take(len).collect()
}

/// A repeating 17-byte pattern.
pub fn pattern17(len: usize) -> Vec<u8> {
    b"qwertyuiopasdfghj".iter().copied().cycle().take(len).collect()
}
