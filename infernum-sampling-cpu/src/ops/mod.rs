//! CPU implementations of all sampling op traits.

pub mod logits;
pub mod memory;
pub mod random;
pub mod sample;
