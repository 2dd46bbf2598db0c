//! `HighRes-MT`: a multi-task HighRes3DNet with learned categorical group
//! convolutions for 3D segmentation.
//!
//! This crate ties the model, loss and data crates together with backend
//! selection and a training loop.

pub mod backend;
pub mod training;

#[doc(inline)]
pub use backend::burn_backend_types;
#[doc(inline)]
pub use highres_mt_loss as loss;
#[doc(inline)]
pub use highres_mt_model as model;
#[doc(inline)]
pub use highres_mt_train as train;
