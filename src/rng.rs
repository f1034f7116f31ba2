//! Seeded, reproducible random number generation.
//!
//! Every stochastic choice made by a [Simulation](crate::Simulation) draws from a single
//! [Mulberry32] generator. The recurrence is fixed and operates on 32-bit words only, so a
//! given seed produces the same sequence bit-for-bit on every platform.

use rand::RngCore;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The generator state used when no seed is given.
const DEFAULT_SEED: u32 = 0x12345;

/// FNV-1a offset basis.
const FNV_OFFSET: u32 = 2_166_136_261;

/// FNV-1a prime.
const FNV_PRIME: u32 = 16_777_619;

/// The Weyl sequence increment of Mulberry32.
const MULBERRY_INCREMENT: u32 = 0x6D2B_79F5;

/// A user supplied seed value.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Seed {
    /// An integer seed, truncated to its low 32 bits.
    Int(i64),
    /// A textual seed, hashed with FNV-1a over its UTF-16 code units.
    Str(String),
    /// No seed was given.
    #[default]
    Default,
}

impl Seed {
    /// Interprets a textual seed: an optional `-` followed by ASCII digits becomes
    /// [Seed::Int], anything else (including whitespace, a `+` sign or an integer
    /// outside the `i64` range) is kept as [Seed::Str].
    pub fn parse(text: &str) -> Self {
        let digits = text.strip_prefix('-').unwrap_or(text);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Seed::Str(text.to_string());
        }
        match text.parse::<i64>() {
            Ok(value) => Seed::Int(value),
            Err(_) => Seed::Str(text.to_string()),
        }
    }

    /// Hashes the seed to a 32-bit generator state.
    pub fn hash(&self) -> u32 {
        match self {
            Seed::Int(value) => *value as u32,
            Seed::Str(text) => text.encode_utf16().fold(FNV_OFFSET, |hash, unit| {
                (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
            }),
            Seed::Default => DEFAULT_SEED,
        }
    }
}

impl From<i64> for Seed {
    fn from(value: i64) -> Self {
        Seed::Int(value)
    }
}

impl From<u32> for Seed {
    fn from(value: u32) -> Self {
        Seed::Int(value.into())
    }
}

impl From<&str> for Seed {
    fn from(value: &str) -> Self {
        Seed::Str(value.to_string())
    }
}

impl From<String> for Seed {
    fn from(value: String) -> Self {
        Seed::Str(value)
    }
}

/// The Mulberry32 generator.
///
/// Each draw advances a Weyl sequence by `0x6D2B79F5` and mixes it with two
/// multiply-xorshift rounds. [Mulberry32::next_f64] divides the 32-bit output by 2<sup>32</sup>,
/// giving a uniform value in `[0, 1)`.
#[derive(Clone, Debug)]
pub struct Mulberry32 {
    /// The state the generator was created with, used by [Mulberry32::reset].
    seed: u32,
    /// The current Weyl sequence value.
    state: u32,
}

impl Mulberry32 {
    /// Creates a generator from a raw 32-bit state.
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed }
    }

    /// Creates a generator from a user supplied seed.
    pub fn from_seed_value(seed: &Seed) -> Self {
        Self::new(seed.hash())
    }

    /// The 32-bit state this generator started from.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Rewinds the generator to the start of its sequence.
    pub fn reset(&mut self) {
        self.state = self.seed;
    }

    /// Draws the next raw 32-bit value.
    pub fn next_word(&mut self) -> u32 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let a = self.state;
        let mut t = (a ^ (a >> 15)).wrapping_mul(1 | a);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t));
        t ^ (t >> 14)
    }

    /// Draws a uniform value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_word()) / 4_294_967_296.0
    }

    /// Draws a uniform value in `[lo, hi)`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Returns `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Draws an index in `0..count`. `count` must not be zero.
    pub fn index(&mut self, count: usize) -> usize {
        let idx = (self.next_f64() * count as f64) as usize;
        idx.min(count.saturating_sub(1))
    }
}

impl RngCore for Mulberry32 {
    fn next_u32(&mut self) -> u32 {
        self.next_word()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(self.next_word());
        let lo = u64::from(self.next_word());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_word().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn hash_seed() {
        assert_eq!(Seed::from("demo").hash(), 0xAEFD_3536);
        assert_eq!(Seed::Str("12345".into()).hash(), 1_136_836_824);
        assert_eq!(Seed::Int(12345).hash(), 12345);
        assert_eq!(Seed::Int(-1).hash(), u32::MAX);
        assert_eq!(Seed::Default.hash(), 0x12345);
    }

    #[test]
    fn parse_seed() {
        assert_eq!(Seed::parse("12345"), Seed::Int(12345));
        assert_eq!(Seed::parse("demo"), Seed::Str("demo".into()));
        assert_eq!(Seed::parse("-5"), Seed::Int(-5));
    }

    #[test]
    fn parse_seed_only_accepts_plain_integers() {
        for text in [" 5", "5 ", "+5", "-", "", "1e3", "99999999999999999999"] {
            assert_eq!(Seed::parse(text), Seed::Str(text.into()), "{text:?}");
        }
        // Whitespace changes the hashed state.
        assert_ne!(Seed::parse(" 5").hash(), Seed::parse("5").hash());
    }

    #[test]
    fn known_sequence() {
        let mut rng = Mulberry32::new(12345);
        assert_eq!(rng.next_word(), 4_207_900_869);
        assert_eq!(rng.next_word(), 1_317_490_944);
        assert_eq!(rng.next_word(), 2_079_646_450);

        let mut rng = Mulberry32::from_seed_value(&Seed::from("demo"));
        assert_eq!(rng.next_word(), 3_603_001_048);
        assert_eq!(rng.next_word(), 581_339_189);

        let mut rng = Mulberry32::new(0);
        assert_eq!(rng.next_word(), 1_144_304_738);
        assert_eq!(rng.next_word(), 1_416_247);
    }

    #[test]
    fn uniform_floats() {
        let mut rng = Mulberry32::new(12345);
        assert_approx_eq!(rng.next_f64(), 0.9797282677609473, 1e-15);
        assert_approx_eq!(rng.next_f64(), 0.3067522644996643, 1e-15);
        assert_approx_eq!(rng.next_f64(), 0.484205421525985, 1e-15);
    }

    #[test]
    fn reset_rewinds() {
        let mut rng = Mulberry32::new(7);
        let first: Vec<u32> = (0..5).map(|_| rng.next_word()).collect();
        rng.reset();
        let second: Vec<u32> = (0..5).map(|_| rng.next_word()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn draws_in_range() {
        let mut rng = Mulberry32::new(99);
        for _ in 0..1000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
            assert!(rng.index(3) < 3);
        }
    }
}
