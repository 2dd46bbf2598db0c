//! Backend selection based on feature flags.

/// Backend, device and display name picked by the enabled feature
/// (`cuda`, then `wgpu`, falling back to `ndarray`).
pub mod burn_backend_types {
    use cfg_if::cfg_if;

    cfg_if! {
        if #[cfg(feature = "cuda")] {
            use burn::backend::cuda::{Cuda, CudaDevice};

            pub type InferenceBackend = Cuda;
            pub type InferenceDevice = CudaDevice;
            pub const NAME: &str = "CUDA (NVIDIA GPU)";
        } else if #[cfg(feature = "wgpu")] {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};

            pub type InferenceBackend = Wgpu;
            pub type InferenceDevice = WgpuDevice;
            pub const NAME: &str = "WGPU (GPU)";
        } else {
            use burn::backend::ndarray::{NdArray, NdArrayDevice};

            pub type InferenceBackend = NdArray;
            pub type InferenceDevice = NdArrayDevice;
            pub const NAME: &str = "NdArray (CPU)";
        }
    }

    /// Training wraps the selected backend in automatic differentiation.
    pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;
}
