//! LZ77 front end: the token producer driving the encoder core.
//!
//! The core itself never looks for matches; it consumes a stream of
//! literal and (distance, length) events through [`TokenSink`]. Any
//! producer honoring that contract can drive it. The [`MatchFinder`] here
//! is the built-in producer behind [`crate::compress`]: a greedy
//! hash-chain searcher that checks the encoder's recent distances first,
//! then walks a chain of prior positions with the same 3-byte hash,
//! nearest first.

use crate::error::Result;
use crate::Level;

const HASH_SIZE: usize = 1 << 16;
const NO_POS: u32 = u32::MAX;

/// Consumer side of the LZ77 event stream.
///
/// The contract for [`emit_dl_code`]: `dist >= 1`, `2 <= len <= 273`, and
/// the consumer's history at distance `dist` holds at least `len` valid
/// bytes. Every literal consumes one input byte, every DL code consumes
/// `len`, whatever re-encoding the consumer settles on internally.
///
/// [`emit_dl_code`]: TokenSink::emit_dl_code
pub trait TokenSink {
    /// Consume one literal byte.
    fn emit_literal(&mut self, byte: u8) -> Result<()>;

    /// Consume a (distance, length) match.
    fn emit_dl_code(&mut self, dist: u32, len: u32) -> Result<()>;

    /// The consumer's four most recent match distances, newest first.
    /// Producers use these to rank cheap repeat-distance candidates.
    fn rep_distances(&self) -> [u32; 4];
}

/// Greedy hash-chain match finder.
pub struct MatchFinder {
    head: Vec<u32>,
    chain: Vec<u32>,
    depth: usize,
    min_len: usize,
    max_len: usize,
    min_rep_len: usize,
    window: usize,
}

impl MatchFinder {
    /// Create a finder tuned for `level`, limited to matches within
    /// `window` bytes.
    pub fn new(level: Level, window: u32) -> Self {
        let (depth, min_len, max_len, min_rep_len) = match level.index() {
            0 => (0, 0, 0, 0),
            1 => (16, 3, 128, 3),
            2 => (64, 3, 273, 2),
            _ => (512, 3, 273, 2),
        };
        Self {
            head: vec![NO_POS; HASH_SIZE],
            chain: Vec::new(),
            depth,
            min_len,
            max_len,
            min_rep_len,
            window: window as usize,
        }
    }

    /// Drive `sink` with the token stream for `data`.
    pub fn run<S: TokenSink>(&mut self, data: &[u8], sink: &mut S) -> Result<()> {
        if self.depth == 0 {
            for &byte in data {
                sink.emit_literal(byte)?;
            }
            return Ok(());
        }

        self.head.fill(NO_POS);
        self.chain.clear();
        self.chain.resize(data.len(), NO_POS);

        let mut pos = 0usize;
        while pos < data.len() {
            match self.decide(data, pos, sink.rep_distances()) {
                Some((dist, len)) => {
                    sink.emit_dl_code(dist as u32, len as u32)?;
                    for i in pos..pos + len {
                        self.insert(data, i);
                    }
                    pos += len;
                }
                None => {
                    sink.emit_literal(data[pos])?;
                    self.insert(data, pos);
                    pos += 1;
                }
            }
        }
        Ok(())
    }

    /// Pick the token for `pos`: the best repeat-distance candidate when it
    /// is at least as long as the best fresh match (or a decent rep0), the
    /// fresh match otherwise, a literal when neither qualifies.
    fn decide(&self, data: &[u8], pos: usize, reps: [u32; 4]) -> Option<(usize, usize)> {
        let mut best_rep: Option<(usize, usize, usize)> = None;
        for (index, dist) in reps.iter().enumerate() {
            let len = self.rep_match_len(data, pos, *dist as usize);
            if len >= self.min_rep_len && best_rep.is_none_or(|(_, _, l)| len > l) {
                best_rep = Some((index, *dist as usize, len));
            }
        }

        let fresh = self.find_match(data, pos);

        match (best_rep, fresh) {
            (Some((index, rep_dist, rep_len)), Some((_, len)))
                if rep_len >= len || (index == 0 && rep_len >= 3) =>
            {
                Some((rep_dist, rep_len))
            }
            (_, Some(found)) => Some(found),
            (Some((_, rep_dist, rep_len)), None) => Some((rep_dist, rep_len)),
            (None, None) => None,
        }
    }

    /// Length of the match continuing at `pos` with the given distance.
    fn rep_match_len(&self, data: &[u8], pos: usize, dist: usize) -> usize {
        if dist == 0 || dist > pos {
            return 0;
        }
        let src = pos - dist;
        let max_len = (data.len() - pos).min(self.max_len);
        let mut len = 0;
        while len < max_len && data[src + len] == data[pos + len] {
            len += 1;
        }
        len
    }

    /// Best fresh match at `pos` via the hash chain, preferring longer and
    /// then nearer candidates.
    fn find_match(&self, data: &[u8], pos: usize) -> Option<(usize, usize)> {
        if pos + self.min_len.max(3) > data.len() {
            return None;
        }

        let mut cand = self.head[Self::hash3(&data[pos..])] as usize;
        if cand == NO_POS as usize {
            return None;
        }

        let max_len = (data.len() - pos).min(self.max_len);
        let mut best_dist = 0usize;
        let mut best_len = 0usize;
        let mut steps = 0usize;

        while cand < pos && steps < self.depth {
            let dist = pos - cand;
            if dist > self.window {
                break;
            }

            if data[cand] == data[pos]
                && data[cand + 1] == data[pos + 1]
                && data[cand + 2] == data[pos + 2]
            {
                let mut len = 3;
                while len < max_len && data[pos + len] == data[cand + len] {
                    len += 1;
                }
                if len > best_len || (len == best_len && dist < best_dist) {
                    best_dist = dist;
                    best_len = len;
                    if len >= max_len {
                        break;
                    }
                }
            }

            let next = self.chain[cand] as usize;
            if next >= cand {
                break;
            }
            cand = next;
            steps += 1;
        }

        (best_len >= self.min_len).then_some((best_dist, best_len))
    }

    fn insert(&mut self, data: &[u8], pos: usize) {
        if pos + 3 > data.len() {
            return;
        }
        let h = Self::hash3(&data[pos..]);
        self.chain[pos] = self.head[h];
        self.head[h] = pos as u32;
    }

    /// FNV-1a over three bytes, folded into the table size.
    fn hash3(data: &[u8]) -> usize {
        let mut h = 2166136261u32;
        for &b in &data[..3] {
            h ^= u32::from(b);
            h = h.wrapping_mul(16777619);
        }
        (h as usize) & (HASH_SIZE - 1)
    }
}
