//! Nullable random: deterministic change placement and locktime jitter.

use std::sync::Mutex;

use satchel_wallet_core::RandomSource;

/// A deterministic random source for testing.
///
/// Returns pre-configured values in order, cycling, each reduced into the
/// requested range.
pub struct NullRandom {
    outputs: Vec<u32>,
    index: Mutex<usize>,
}

impl NullRandom {
    /// Create with a sequence of deterministic values.
    pub fn new(outputs: Vec<u32>) -> Self {
        Self {
            outputs,
            index: Mutex::new(0),
        }
    }

    /// Create with a single value returned for every call.
    pub fn constant(value: u32) -> Self {
        Self::new(vec![value])
    }
}

impl Default for NullRandom {
    /// Always the first choice: change first, no locktime jitter.
    fn default() -> Self {
        Self::constant(0)
    }
}

impl RandomSource for NullRandom {
    fn uniform(&self, upper: u32) -> u32 {
        if upper == 0 || self.outputs.is_empty() {
            return 0;
        }
        let mut idx = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let value = self.outputs[*idx % self.outputs.len()];
        *idx += 1;
        value % upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_outputs() {
        let random = NullRandom::new(vec![1, 7, 12]);
        assert_eq!(random.uniform(10), 1);
        assert_eq!(random.uniform(10), 7);
        assert_eq!(random.uniform(10), 2);
        assert_eq!(random.uniform(10), 1);
    }

    #[test]
    fn zero_range_is_zero() {
        assert_eq!(NullRandom::constant(5).uniform(0), 0);
    }
}
