//! Randomness used while building transactions.

use rand::Rng;

/// Uniform integers for change placement and locktime jitter.
pub trait RandomSource: Send + Sync {
    /// A value in `0..upper`. Returns 0 when `upper` is 0.
    fn uniform(&self, upper: u32) -> u32;
}

/// The thread-local generator, seeded from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn uniform(&self, upper: u32) -> u32 {
        if upper == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_range() {
        for upper in [1u32, 2, 3, 10, 100] {
            for _ in 0..200 {
                assert!(OsRandom.uniform(upper) < upper);
            }
        }
        assert_eq!(OsRandom.uniform(0), 0);
    }

    #[test]
    fn reaches_every_value() {
        let mut seen = [false; 4];
        for _ in 0..1000 {
            seen[OsRandom.uniform(4) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s), "{seen:?}");
    }
}
