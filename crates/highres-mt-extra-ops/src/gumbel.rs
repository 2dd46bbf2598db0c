//! Gumbel-softmax sampling for categorical variables.
//!
//! A categorical sample is drawn by perturbing log-probabilities with Gumbel
//! noise and taking the arg-max. Replacing the arg-max by a tempered softmax
//! gives a differentiable relaxation; the straight-through estimator recovers a
//! hard one-hot in the forward pass while keeping the relaxed gradient.

use burn::{
    prelude::*,
    tensor::{activation::softmax, Distribution},
};

/// Offset keeping both logarithms of the Gumbel transform finite.
pub const GUMBEL_EPS: f64 = 1e-20;

/// Sample standard Gumbel noise `-log(-log(u))` with `u ~ U(0, 1)`.
pub fn gumbel_noise<B: Backend, const D: usize>(
    shape: [usize; D],
    device: &Device<B>,
) -> Tensor<B, D> {
    let uniform = Tensor::<B, D>::random(shape, Distribution::Uniform(0.0, 1.0), device);
    let inner = uniform.add_scalar(GUMBEL_EPS).log().neg();

    inner.add_scalar(GUMBEL_EPS).log().neg()
}

/// Relaxed one-hot sample `softmax((logits + g) / temperature)` along `dim`.
///
/// # Panics
///
/// Panics if `temperature` is not strictly positive.
pub fn gumbel_softmax<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    temperature: f64,
    dim: usize,
) -> Tensor<B, D> {
    assert!(
        temperature > 0.0,
        "Gumbel-softmax temperature must be positive, got {temperature}"
    );

    let noise = gumbel_noise::<B, D>(logits.dims(), &logits.device());

    softmax((logits + noise).div_scalar(temperature), dim)
}

/// One-hot encoding of the arg-max of `input` along `dim`.
///
/// The result has the same shape as `input`; ties resolve to the first index.
pub fn hard_one_hot<B: Backend, const D: usize>(input: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let dims = input.dims();
    let num_classes = dims[dim];
    let device = input.device();

    let winners = input.argmax(dim).repeat_dim(dim, num_classes);

    let mut class_shape = [1usize; D];
    class_shape[dim] = num_classes;
    let mut classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
        .reshape(class_shape);
    for (axis, &size) in dims.iter().enumerate() {
        if axis != dim && size > 1 {
            classes = classes.repeat_dim(axis, size);
        }
    }

    winners.equal(classes).float()
}

/// Straight-through estimator: the value of `hard`, the gradient of `soft`.
pub fn straight_through<B: Backend, const D: usize>(
    hard: Tensor<B, D>,
    soft: Tensor<B, D>,
) -> Tensor<B, D> {
    hard - soft.clone().detach() + soft
}
