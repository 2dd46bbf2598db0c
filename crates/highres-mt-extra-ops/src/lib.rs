//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the categorical sampling operations used by stochastic
//! filter groups (Gumbel noise, Gumbel-softmax relaxation, hard one-hot with a
//! straight-through gradient) together with a pass-through `Identity` module.

use burn::prelude::*;

mod gumbel;
mod identity;

// Convenient re-exports
#[doc(inline)]
pub use gumbel::{gumbel_noise, gumbel_softmax, hard_one_hot, straight_through, GUMBEL_EPS};
#[doc(inline)]
pub use identity::Identity;

/// Categorical sampling operations for Burn tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// Draw a relaxed one-hot sample along `dim` from unnormalised log-probabilities.
    fn gumbel_softmax(self, temperature: f64, dim: usize) -> Self;

    /// One-hot encoding of the arg-max along `dim`.
    fn hard_one_hot(self, dim: usize) -> Self;

    /// Hard one-hot in the forward pass, gradient of `self` in the backward pass.
    fn straight_through(self, dim: usize) -> Self;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn gumbel_softmax(self, temperature: f64, dim: usize) -> Self {
        gumbel_softmax(self, temperature, dim)
    }

    fn hard_one_hot(self, dim: usize) -> Self {
        hard_one_hot(self, dim)
    }

    fn straight_through(self, dim: usize) -> Self {
        let hard = hard_one_hot(self.clone(), dim);
        straight_through(hard, self)
    }
}
