//! Word-level SimHash fingerprints and n-gram overlap.
//!
//! Everything here is a pure function of its inputs. Texts that are compared
//! repeatedly (the exemplar) can be tokenized once into a [`TextProfile`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use storyloom_common::text::tokenize;

pub const SIMHASH_BITS: usize = 256;

/// Smallest n considered by the longest-shared-run scan.
pub const MIN_SHARED_NGRAM: usize = 3;

/// Longest run the guard's shared-run scan looks for.
pub const SHARED_NGRAM_SCAN: usize = 20;

/// N-gram size for the overlap-density metric.
pub const OVERLAP_NGRAM: usize = 4;

// =============================================================================
// Fingerprint
// =============================================================================

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u64; 4]);

impl Fingerprint {
    pub const fn zero() -> Self {
        Self([0; 4])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn bit(&self, index: usize) -> bool {
        index < SIMHASH_BITS && (self.0[index / 64] >> (index % 64)) & 1 == 1
    }

    fn set(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().rev().map(|w| format!("{w:016x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

fn word_hash(word: &str) -> [u8; 32] {
    Sha256::digest(word.as_bytes()).into()
}

/// 256-bit SimHash over lowercase word tokens.
pub fn simhash(text: &str) -> Fingerprint {
    simhash_tokens(&tokenize(text), SIMHASH_BITS)
}

/// SimHash truncated to the low `bits` positions (at most 256).
pub fn simhash_bits(text: &str, bits: usize) -> Fingerprint {
    simhash_tokens(&tokenize(text), bits)
}

pub fn simhash_tokens(tokens: &[String], bits: usize) -> Fingerprint {
    let bits = bits.min(SIMHASH_BITS);
    let mut counters = [0i64; SIMHASH_BITS];

    for token in tokens {
        let hash = word_hash(token);
        for (i, counter) in counters.iter_mut().enumerate().take(bits) {
            if (hash[i / 8] >> (i % 8)) & 1 == 1 {
                *counter += 1;
            } else {
                *counter -= 1;
            }
        }
    }

    let mut fp = Fingerprint::zero();
    for (i, counter) in counters.iter().enumerate().take(bits) {
        if *counter > 0 {
            fp.set(i);
        }
    }
    fp
}

pub fn hamming_distance(a: &Fingerprint, b: &Fingerprint) -> u32 {
    a.0.iter().zip(b.0.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

// =============================================================================
// N-grams
// =============================================================================

pub fn ngrams(tokens: &[String], n: usize) -> HashSet<&[String]> {
    if n == 0 || n > tokens.len() {
        return HashSet::new();
    }
    tokens.windows(n).collect()
}

/// Largest n in `[3, max_n]` with at least one shared n-gram, else 0.
pub fn max_shared_ngram(text_a: &str, text_b: &str, max_n: usize) -> usize {
    max_shared_ngram_tokens(&tokenize(text_a), &tokenize(text_b), max_n)
}

pub fn max_shared_ngram_tokens(a: &[String], b: &[String], max_n: usize) -> usize {
    let upper = max_n.min(a.len()).min(b.len());
    for n in (MIN_SHARED_NGRAM..=upper).rev() {
        let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        let seen = ngrams(small, n);
        if large.windows(n).any(|w| seen.contains(w)) {
            return n;
        }
    }
    0
}

/// Share of the generated text's distinct n-grams also found in the exemplar.
pub fn ngram_overlap_percentage(generated: &str, exemplar: &str, n: usize) -> f64 {
    ngram_overlap_tokens(&tokenize(generated), &tokenize(exemplar), n)
}

pub fn ngram_overlap_tokens(generated: &[String], exemplar: &[String], n: usize) -> f64 {
    let ours = ngrams(generated, n);
    if ours.is_empty() {
        return 0.0;
    }
    let theirs = ngrams(exemplar, n);
    let shared = ours.iter().filter(|g| theirs.contains(*g)).count();
    shared as f64 / ours.len() as f64
}

// =============================================================================
// TextProfile
// =============================================================================

/// Tokens and fingerprint of a text, computed once.
#[derive(Debug, Clone)]
pub struct TextProfile {
    pub tokens: Vec<String>,
    pub fingerprint: Fingerprint,
}

impl TextProfile {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let fingerprint = simhash_tokens(&tokens, SIMHASH_BITS);
        Self {
            tokens,
            fingerprint,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSAGE: &str = "The lighthouse keeper counted the ships at dusk and wrote each name \
        in a ledger that smelled of salt and lamp oil.";

    #[test]
    fn simhash_is_deterministic() {
        assert_eq!(simhash(PASSAGE), simhash(PASSAGE));
        assert_eq!(hamming_distance(&simhash(PASSAGE), &simhash(PASSAGE)), 0);
    }

    #[test]
    fn empty_text_has_zero_fingerprint() {
        assert!(simhash("").is_zero());
        assert!(simhash("!!! ...").is_zero());
    }

    #[test]
    fn simhash_ignores_case_and_punctuation() {
        assert_eq!(simhash("Salt, LAMP oil."), simhash("salt lamp oil"));
    }

    #[test]
    fn unrelated_texts_are_far_apart() {
        let other = "Quantum chromodynamics describes gluons binding quarks inside hadrons \
            under asymptotic freedom at very high energies.";
        let d = hamming_distance(&simhash(PASSAGE), &simhash(other));
        assert!(d >= 18, "distance {d}");
    }

    #[test]
    fn simhash_bits_masks_high_positions() {
        let fp = simhash_bits(PASSAGE, 8);
        assert!(fp.count_ones() <= 8);
        for i in 8..SIMHASH_BITS {
            assert!(!fp.bit(i));
        }
    }

    #[test]
    fn max_shared_ngram_finds_longest_run() {
        let a = "one two three four five six seven";
        let b = "zero two three four five eight";
        assert_eq!(max_shared_ngram(a, b, 12), 4);
    }

    #[test]
    fn max_shared_ngram_is_capped() {
        assert_eq!(max_shared_ngram(PASSAGE, PASSAGE, 12), 12);
    }

    #[test]
    fn disjoint_texts_share_nothing() {
        assert_eq!(max_shared_ngram("red green blue", "cat dog bird fish", 12), 0);
        assert_eq!(max_shared_ngram("", PASSAGE, 12), 0);
    }

    #[test]
    fn two_word_overlap_does_not_count() {
        assert_eq!(max_shared_ngram("the ships sailed", "counted the ships", 12), 0);
    }

    #[test]
    fn overlap_percentage_normalizes_by_generated() {
        let exemplar = "a b c d e f g h";
        let generated = "a b c d x y z w";
        // 4-grams of generated: abcd, bcdx, cdxy, dxyz, xyzw -> 1 shared of 5
        assert!((ngram_overlap_percentage(generated, exemplar, 4) - 0.2).abs() < 1e-12);
        assert_eq!(ngram_overlap_percentage("a b c", exemplar, 4), 0.0);
        assert_eq!(ngram_overlap_percentage(PASSAGE, PASSAGE, 4), 1.0);
    }

    #[test]
    fn profile_matches_direct_computation() {
        let profile = TextProfile::new(PASSAGE);
        assert_eq!(profile.fingerprint, simhash(PASSAGE));
        assert!(!profile.is_empty());
    }
}
