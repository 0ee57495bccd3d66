//! Similarity scores on a 0–100 scale.
//!
//! All offsets are character (Unicode scalar) offsets, never byte offsets.
//! [`ratio`] is the normalized InDel similarity `2·LCS / (|a|+|b|)`;
//! [`partial_ratio_alignment`] finds the best window of the longer string
//! for the shorter one; [`length_adjusted_partial_ratio`] is the corpus-level
//! scorer used to find phrases inside long OCR fragments.

use std::collections::HashMap;

/// Any function scoring `candidate` against `target`, returning 0 below `cutoff`.
pub type Scorer = fn(candidate: &str, target: &str, cutoff: f64) -> f64;

/// Best window found by [`partial_ratio_alignment`].
///
/// `src_*` index into the first argument, `dest_*` into the second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Alignment {
    pub score: f64,
    pub src_start: usize,
    pub src_end: usize,
    pub dest_start: usize,
    pub dest_end: usize,
}

/// Normalized InDel similarity of two strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// [`ratio`] with a cutoff, shaped as a [`Scorer`].
pub fn ratio_scorer(candidate: &str, target: &str, cutoff: f64) -> f64 {
    let score = ratio(candidate, target);
    if score >= cutoff { score } else { 0.0 }
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let lcs = PatternMatch::new(short).lcs(long);
    score_from_lcs(lcs, total)
}

fn score_from_lcs(lcs: usize, total: usize) -> f64 {
    100.0 * (2 * lcs) as f64 / total as f64
}

/// Slide the shorter string over the longer one and keep the best window.
///
/// Windows partially overlapping either end of the longer string are
/// considered too. Ties keep the leftmost window. Returns `None` for empty
/// input or when the best score is below `cutoff`.
pub fn partial_ratio_alignment(a: &str, b: &str, cutoff: f64) -> Option<Alignment> {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return None;
    }

    let swapped = a_chars.len() > b_chars.len();
    let (needle, hay) = if swapped {
        (&b_chars, &a_chars)
    } else {
        (&a_chars, &b_chars)
    };
    let (score, start, end) = best_window(needle, hay);
    if score < cutoff {
        return None;
    }

    let alignment = if swapped {
        Alignment {
            score,
            src_start: start,
            src_end: end,
            dest_start: 0,
            dest_end: needle.len(),
        }
    } else {
        Alignment {
            score,
            src_start: 0,
            src_end: needle.len(),
            dest_start: start,
            dest_end: end,
        }
    };
    Some(alignment)
}

fn best_window(needle: &[char], hay: &[char]) -> (f64, usize, usize) {
    let pm = PatternMatch::new(needle);
    let m = needle.len();
    let n = hay.len();
    let mut best = (0.0, 0, m.min(n));

    let consider = |start: usize, end: usize, best: &mut (f64, usize, usize)| -> bool {
        let lcs = pm.lcs(&hay[start..end]);
        let score = score_from_lcs(lcs, m + (end - start));
        if score > best.0 {
            *best = (score, start, end);
        }
        best.0 >= 100.0
    };

    // Windows hanging off the left edge; one ending on a char absent from the
    // needle can never beat the same window without that char.
    for end in 1..m {
        if pm.contains(hay[end - 1]) && consider(0, end, &mut best) {
            return best;
        }
    }
    for start in 0..=(n - m) {
        if pm.contains(hay[start + m - 1]) && consider(start, start + m, &mut best) {
            return best;
        }
    }
    for start in (n - m + 1)..n {
        if pm.contains(hay[start]) && consider(start, n, &mut best) {
            return best;
        }
    }
    best
}

/// Factor penalizing an aligned span whose length differs from the phrase's.
///
/// Symmetric in its arguments and never above 1.
pub fn length_factor(aligned_len: usize, phrase_len: usize) -> f64 {
    if aligned_len == 0 || phrase_len == 0 {
        return 0.0;
    }
    let a = aligned_len as f64;
    let p = phrase_len as f64;
    (p / a).min(a / p)
}

/// Partial-ratio score of `phrase` inside `text`, scaled by [`length_factor`].
///
/// Phrases more than one and a half times longer than the text are rejected
/// without scoring.
pub fn length_adjusted_partial_ratio(text: &str, phrase: &str, cutoff: f64) -> f64 {
    let text_len = text.chars().count();
    let phrase_len = phrase.chars().count();
    if text_len == 0 || phrase_len == 0 || (text_len as f64) * 1.5 < phrase_len as f64 {
        return 0.0;
    }
    let Some(alignment) = partial_ratio_alignment(text, phrase, cutoff) else {
        return 0.0;
    };
    alignment.score * length_factor(alignment.src_end - alignment.src_start, phrase_len)
}

/// Bit-parallel LCS (Hyyrö) over a fixed pattern, any pattern length.
struct PatternMatch {
    len: usize,
    blocks: usize,
    masks: HashMap<char, Vec<u64>>,
}

impl PatternMatch {
    fn new(pattern: &[char]) -> Self {
        let blocks = pattern.len().div_ceil(64).max(1);
        let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
        for (i, ch) in pattern.iter().enumerate() {
            let mask = masks.entry(*ch).or_insert_with(|| vec![0; blocks]);
            mask[i / 64] |= 1u64 << (i % 64);
        }
        Self {
            len: pattern.len(),
            blocks,
            masks,
        }
    }

    fn contains(&self, ch: char) -> bool {
        self.masks.contains_key(&ch)
    }

    fn lcs(&self, text: &[char]) -> usize {
        if self.len == 0 || text.is_empty() {
            return 0;
        }
        let mut rows = vec![u64::MAX; self.blocks];
        for ch in text {
            let Some(mask) = self.masks.get(ch) else {
                continue;
            };
            let mut carry = 0u64;
            for (row, m) in rows.iter_mut().zip(mask) {
                let s = *row;
                let u = s & m;
                let (sum, c1) = s.overflowing_add(u);
                let (sum, c2) = sum.overflowing_add(carry);
                carry = u64::from(c1 || c2);
                *row = sum | (s - u);
            }
        }

        let mut lcs = 0usize;
        for (i, row) in rows.iter().enumerate() {
            let bits = (self.len - i * 64).min(64);
            let valid = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            lcs += (!row & valid).count_ones() as usize;
        }
        lcs
    }
}
