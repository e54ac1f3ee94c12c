//! Grow-only host staging arrays.
//!
//! Host-side parameter arrays are reused across decode steps: they grow to
//! the largest batch seen (amortized, via `Vec`) and are never shrunk when a
//! later batch is smaller. Device mirrors follow a different policy
//! (reallocate to the exact batch size); see
//! [`SamplingBuffers`](crate::layer::SamplingBuffers).

/// A host array whose length only ever increases.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer<T> {
    data: Vec<T>,
}

impl<T: Copy + Default> HostBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Grow to at least `len` elements. New slots are `T::default()`.
    /// Returns `true` if the buffer grew.
    pub fn ensure_len(&mut self, len: usize) -> bool {
        if self.data.len() < len {
            self.data.resize(len, T::default());
            true
        } else {
            false
        }
    }

    /// Number of usable elements (the largest length ever requested).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated capacity in elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The first `n` elements.
    ///
    /// # Panics
    /// Panics if `n > self.len()`.
    #[must_use]
    pub fn prefix(&self, n: usize) -> &[T] {
        &self.data[..n]
    }

    /// The first `n` elements, mutably.
    ///
    /// # Panics
    /// Panics if `n > self.len()`.
    pub fn prefix_mut(&mut self, n: usize) -> &mut [T] {
        &mut self.data[..n]
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}
