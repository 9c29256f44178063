//! Seed derivation.
//!
//! Seeds written to exported files must reproduce the same streams on any
//! toolchain, so derivation uses a fixed SplitMix64 mixer rather than std hashers.

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// One SplitMix64 output for state `x`.
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fold a word sequence into one seed. Order-sensitive.
pub fn mix_words(words: &[u64]) -> u64 {
    words.iter().fold(0, |acc, &w| splitmix64(splitmix64(acc).wrapping_add(w)))
}
