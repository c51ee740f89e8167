//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano.
//! Everything the session reaches outside itself for (the backend, the
//! signer, randomness) sits behind a trait. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Record what was asked of them for assertions
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod backend;
pub mod random;
pub mod signer;

pub use backend::{NullBackend, VALID_CODE};
pub use random::NullRandom;
pub use signer::NullSigner;
