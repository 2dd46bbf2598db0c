//! Pass-through module used where a layer slot is configured as "no operation".

use burn::prelude::*;

/// Module returning its input unchanged, for any tensor rank.
#[derive(Module, Debug)]
pub struct Identity<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> Identity<B> {
    /// Create a new `Identity`.
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    pub const fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input
    }
}

impl<B: Backend> Default for Identity<B> {
    fn default() -> Self {
        Self::new()
    }
}
