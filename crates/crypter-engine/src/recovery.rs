//! Ciphertext recovery heuristic.
//!
//! When the on-disk ciphertext differs from the copy kept in the key store,
//! the two are compared with the Ratcliff/Obershelp "gestalt" similarity
//! ratio: `2 * M / (len(a) + len(b))`, where `M` is the total length of the
//! matching blocks found by recursively taking the longest common block and
//! repeating on both sides of it. If the ratio reaches the threshold, the
//! on-disk bytes are treated as a damaged copy and the stored ciphertext is
//! decrypted instead.
//!
//! This is a convenience for interrupted writes and similar accidents, NOT an
//! integrity check. Byte similarity between two ciphertexts says nothing about
//! what they decrypt to; authenticity comes only from the AEAD tag.

use std::collections::HashMap;

use crypter_core::config::DEFAULT_RECOVERY_THRESHOLD;

use crate::error::EngineError;

/// What to decrypt, given the stored and on-disk ciphertexts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Byte-for-byte identical, nothing to recover.
    UseOnDisk,
    /// Close enough: decrypt the stored copy, discarding the on-disk bytes.
    UseStored { ratio: f64 },
    /// Too different to assume they are the same encryption.
    ///
    /// `ratio` is exact, or an upper bound when the bound alone already fell
    /// short of the threshold.
    Abort { ratio: f64 },
}

/// A block `a[a..a + size] == b[b..b + size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Match {
    pub a: usize,
    pub b: usize,
    pub size: usize,
}

/// Recovery policy with a validated threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryMatcher {
    threshold: f64,
}

impl Default for RecoveryMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RECOVERY_THRESHOLD,
        }
    }
}

impl RecoveryMatcher {
    /// `threshold` must lie in `(0.0, 1.0]`, so an empty on-disk file can
    /// never be "recovered" from a non-empty stored copy.
    pub fn new(threshold: f64) -> Result<Self, EngineError> {
        if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
            return Err(EngineError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn reconcile(&self, stored: &[u8], on_disk: &[u8]) -> Decision {
        reconcile(stored, on_disk, self.threshold)
    }
}

/// Decide between the stored and the on-disk ciphertext.
///
/// `ratio >= threshold` recovers; anything below aborts.
pub fn reconcile(stored: &[u8], on_disk: &[u8], threshold: f64) -> Decision {
    if stored == on_disk {
        return Decision::UseOnDisk;
    }

    let bound = quick_ratio(stored, on_disk);
    if bound < threshold {
        return Decision::Abort { ratio: bound };
    }

    let ratio = similarity_ratio(stored, on_disk);
    if ratio >= threshold {
        Decision::UseStored { ratio }
    } else {
        Decision::Abort { ratio }
    }
}

/// Gestalt similarity of two byte strings, in `[0.0, 1.0]`.
///
/// Two empty strings are identical (1.0).
pub fn similarity_ratio(a: &[u8], b: &[u8]) -> f64 {
    let matched: usize = matching_blocks(a, b).iter().map(|m| m.size).sum();
    ratio_of(matched, a.len() + b.len())
}

/// Upper bound on [`similarity_ratio`]: counts shared bytes ignoring order.
pub fn quick_ratio(a: &[u8], b: &[u8]) -> f64 {
    let mut avail = [0usize; 256];
    for &byte in b {
        avail[byte as usize] += 1;
    }
    let mut matched = 0;
    for &byte in a {
        let slot = &mut avail[byte as usize];
        if *slot > 0 {
            *slot -= 1;
            matched += 1;
        }
    }
    ratio_of(matched, a.len() + b.len())
}

fn ratio_of(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    2.0 * matched as f64 / total as f64
}

/// Non-overlapping, order-preserving matching blocks, sorted by position.
///
/// Adjacent blocks are merged.
pub fn matching_blocks(a: &[u8], b: &[u8]) -> Vec<Match> {
    let mut found = Vec::new();
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let m = find_longest_match(a, b, alo, ahi, blo, bhi);
        if m.size == 0 {
            continue;
        }
        found.push(m);
        if alo < m.a && blo < m.b {
            pending.push((alo, m.a, blo, m.b));
        }
        if m.a + m.size < ahi && m.b + m.size < bhi {
            pending.push((m.a + m.size, ahi, m.b + m.size, bhi));
        }
    }
    found.sort();

    let mut merged: Vec<Match> = Vec::with_capacity(found.len());
    for m in found {
        match merged.last_mut() {
            Some(last) if last.a + last.size == m.a && last.b + last.size == m.b => {
                last.size += m.size;
            }
            _ => merged.push(m),
        }
    }
    merged
}

/// Largest `b` range indexed with a suffix automaton (`u32` state ids).
const MAX_AUTOMATON_TEXT: usize = (u32::MAX / 4) as usize;

/// Longest block common to `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Among equally long blocks the one starting earliest in `a` wins, then the
/// one starting earliest in `b`.
fn find_longest_match(a: &[u8], b: &[u8], alo: usize, ahi: usize, blo: usize, bhi: usize) -> Match {
    if alo >= ahi || blo >= bhi {
        return Match {
            a: alo,
            b: blo,
            size: 0,
        };
    }
    if bhi - blo <= MAX_AUTOMATON_TEXT {
        SuffixAutomaton::build(&b[blo..bhi]).longest_match(a, alo, ahi, blo)
    } else {
        longest_match_by_table(a, b, alo, ahi, blo, bhi)
    }
}

/// Row-by-row dynamic programming over the positions of each byte in `b`.
///
/// Quadratic in the worst case; only used past [`MAX_AUTOMATON_TEXT`].
fn longest_match_by_table(
    a: &[u8],
    b: &[u8],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> Match {
    // positions[x] = ascending offsets of byte x in b[blo..bhi]
    let mut positions: Vec<Vec<usize>> = vec![Vec::new(); 256];
    for (j, &byte) in b[blo..bhi].iter().enumerate() {
        positions[byte as usize].push(blo + j);
    }

    let mut best = Match {
        a: alo,
        b: blo,
        size: 0,
    };
    // run[j] = length of the match ending at a[i - 1] and b[j]
    let mut run: HashMap<usize, usize> = HashMap::new();
    let mut next_run: HashMap<usize, usize> = HashMap::new();

    for (offset, &byte) in a[alo..ahi].iter().enumerate() {
        let i = alo + offset;
        next_run.clear();
        for &j in &positions[byte as usize] {
            let k = j
                .checked_sub(1)
                .and_then(|prev| run.get(&prev))
                .copied()
                .unwrap_or(0)
                + 1;
            next_run.insert(j, k);
            if k > best.size {
                best = Match {
                    a: i + 1 - k,
                    b: j + 1 - k,
                    size: k,
                };
            }
        }
        std::mem::swap(&mut run, &mut next_run);
    }
    best
}

const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct State {
    /// Length of the longest string in this state
    len: u32,
    /// Suffix link
    link: u32,
    /// End offset of the first occurrence of this state's strings
    first_end: u32,
    /// First outgoing edge, or NONE
    head: u32,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    byte: u8,
    to: u32,
    next: u32,
}

/// Suffix automaton of one slice of `b`: every substring of the slice is a
/// path from the root. Edges live in one arena as per-state linked lists,
/// except the root's, which are a dense table.
struct SuffixAutomaton {
    states: Vec<State>,
    edges: Vec<Edge>,
    root: [u32; 256],
}

impl SuffixAutomaton {
    fn build(text: &[u8]) -> Self {
        let mut sam = Self {
            states: Vec::with_capacity(2 * text.len() + 1),
            edges: Vec::with_capacity(3 * text.len()),
            root: [NONE; 256],
        };
        sam.states.push(State {
            len: 0,
            link: NONE,
            first_end: 0,
            head: NONE,
        });

        let mut last = 0;
        for (pos, &byte) in text.iter().enumerate() {
            last = sam.extend(last, byte, pos as u32);
        }
        sam
    }

    fn state(&self, id: u32) -> &State {
        &self.states[id as usize]
    }

    fn state_mut(&mut self, id: u32) -> &mut State {
        &mut self.states[id as usize]
    }

    fn push_state(&mut self, state: State) -> u32 {
        self.states.push(state);
        (self.states.len() - 1) as u32
    }

    fn next(&self, from: u32, byte: u8) -> Option<u32> {
        if from == 0 {
            let to = self.root[byte as usize];
            return (to != NONE).then_some(to);
        }
        let mut e = self.state(from).head;
        while e != NONE {
            let edge = self.edges[e as usize];
            if edge.byte == byte {
                return Some(edge.to);
            }
            e = edge.next;
        }
        None
    }

    fn add_edge(&mut self, from: u32, byte: u8, to: u32) {
        if from == 0 {
            self.root[byte as usize] = to;
            return;
        }
        let next = self.state(from).head;
        self.edges.push(Edge { byte, to, next });
        self.state_mut(from).head = (self.edges.len() - 1) as u32;
    }

    fn redirect(&mut self, from: u32, byte: u8, to: u32) {
        if from == 0 {
            self.root[byte as usize] = to;
            return;
        }
        let mut e = self.state(from).head;
        while e != NONE {
            let edge = &mut self.edges[e as usize];
            if edge.byte == byte {
                edge.to = to;
                return;
            }
            e = edge.next;
        }
    }

    /// Append `byte` (found at offset `pos`) and return the new last state.
    fn extend(&mut self, last: u32, byte: u8, pos: u32) -> u32 {
        let cur = self.push_state(State {
            len: self.state(last).len + 1,
            link: 0,
            first_end: pos,
            head: NONE,
        });

        let mut p = last;
        while p != NONE && self.next(p, byte).is_none() {
            self.add_edge(p, byte, cur);
            p = self.state(p).link;
        }
        if p == NONE {
            return cur;
        }
        let Some(q) = self.next(p, byte) else {
            return cur;
        };
        if self.state(p).len + 1 == self.state(q).len {
            self.state_mut(cur).link = q;
            return cur;
        }

        let original = *self.state(q);
        let clone = self.push_state(State {
            len: self.state(p).len + 1,
            link: original.link,
            first_end: original.first_end,
            head: NONE,
        });
        let mut e = original.head;
        while e != NONE {
            let edge = self.edges[e as usize];
            self.add_edge(clone, edge.byte, edge.to);
            e = edge.next;
        }
        while p != NONE && self.next(p, byte) == Some(q) {
            self.redirect(p, byte, clone);
            p = self.state(p).link;
        }
        self.state_mut(q).link = clone;
        self.state_mut(cur).link = clone;
        cur
    }

    /// Longest block of `a[alo..ahi]` occurring in the indexed text, which
    /// starts at offset `blo` of `b`.
    ///
    /// Scanning `a` left to right and keeping only strict improvements picks
    /// the earliest end in `a`; `first_end` picks the earliest end in `b`.
    fn longest_match(&self, a: &[u8], alo: usize, ahi: usize, blo: usize) -> Match {
        let mut best = Match {
            a: alo,
            b: blo,
            size: 0,
        };
        let mut state = 0;
        let mut len = 0usize;

        for (offset, &byte) in a[alo..ahi].iter().enumerate() {
            loop {
                if let Some(to) = self.next(state, byte) {
                    state = to;
                    len += 1;
                    break;
                }
                if state == 0 {
                    len = 0;
                    break;
                }
                state = self.state(state).link;
                len = self.state(state).len as usize;
            }

            if len > best.size {
                let i = alo + offset;
                let first_end = self.state(state).first_end as usize;
                best = Match {
                    a: i + 1 - len,
                    b: blo + first_end + 1 - len,
                    size: len,
                };
            }
        }
        best
    }
}
