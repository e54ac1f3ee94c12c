//! RandomStateOps implementation for CpuBackend.
//!
//! Each request owns one `u64` of generator state. A draw seeds a `StdRng`
//! from the state, takes what it needs, and stores the generator's next
//! output as the new state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use infernum_sampling::backend::RandomStateOps;
use infernum_sampling::dtype::DType;
use infernum_sampling::tensor::Tensor;
use infernum_sampling::{Error, Result};

use crate::tensor::CpuTensor;
use crate::CpuBackend;

const SUBSEQUENCE_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Initial state for request `index` seeded with `seed`.
#[must_use]
pub fn initial_state(seed: u64, index: usize) -> u64 {
    let mut rng = StdRng::seed_from_u64(seed ^ SUBSEQUENCE_MIX.wrapping_mul(index as u64 + 1));
    rng.gen()
}

/// Draw a uniform `f32` in `[0, 1)` and advance `state`.
pub(crate) fn draw_uniform(state: &mut u64) -> f32 {
    let mut rng = StdRng::seed_from_u64(*state);
    let u: f32 = rng.gen();
    *state = rng.gen();
    u
}

impl RandomStateOps for CpuBackend {
    fn init_rand_states(&self, states: &mut CpuTensor, offset: usize, seeds: &[u64]) -> Result<()> {
        states.expect_dtype(DType::U64)?;
        let states = states.as_slice_mut::<u64>()?;
        let end = offset + seeds.len();
        if end > states.len() {
            return Err(Error::InvalidShape(format!(
                "random states [{offset}, {end}) out of range for {} requests",
                states.len()
            )));
        }
        for (i, (state, &seed)) in states[offset..end].iter_mut().zip(seeds).enumerate() {
            *state = initial_state(seed, offset + i);
        }
        Ok(())
    }
}
