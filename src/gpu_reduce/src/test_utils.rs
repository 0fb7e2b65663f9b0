//! Input generators shared by the task, tests and the harness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::InputPattern;

/// Values are masked into `[0, 16)`.
pub const RANDOM_VALUE_MASK: u32 = 15;

/// Print from tests only when the `test-verbose` feature is enabled.
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        #[cfg(feature = "test-verbose")]
        println!($($arg)*);
    };
}

/// `len` ones; the expected sum is `len`.
pub fn ones(len: usize) -> Vec<u32> {
    vec![1; len]
}

/// `len` pseudo-random values in `[0, 16)` drawn from `rng`.
pub fn random_input_from<R: Rng>(rng: &mut R, len: usize) -> Vec<u32> {
    (0..len).map(|_| rng.gen::<u32>() & RANDOM_VALUE_MASK).collect()
}

/// `len` pseudo-random values in `[0, 16)` from a seeded generator.
pub fn random_input(len: usize, seed: u64) -> Vec<u32> {
    random_input_from(&mut StdRng::seed_from_u64(seed), len)
}

/// Generate an input array following `pattern`.
///
/// Without a seed the random pattern draws from entropy.
pub fn generate_input(pattern: InputPattern, len: usize, seed: Option<u64>) -> Vec<u32> {
    match (pattern, seed) {
        (InputPattern::Ones, _) => ones(len),
        (InputPattern::Random, Some(seed)) => random_input(len, seed),
        (InputPattern::Random, None) => random_input_from(&mut StdRng::from_entropy(), len),
    }
}
