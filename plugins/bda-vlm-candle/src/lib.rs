//! Candle inference plugin for `bda-pipeline`.
//!
//! Provides a Moondream2 implementation of `VlmLoader` that can be injected
//! into `bda_pipeline::PipelineBuilder::with_loader`.
//!
//! Enable the `cuda` or `metal` feature for accelerator kernels. Without one,
//! models load on the CPU and the pipeline refuses them.

pub mod moondream;
pub mod params;

pub use moondream::{MoondreamLoader, MoondreamModel, REQUIRED_ARTIFACTS};
pub use params::{DeviceSpec, GenerationSettings};

/// Whether candle was built with an accelerator backend that is usable here
pub fn accelerator_available() -> bool {
    candle_core::utils::cuda_is_available() || candle_core::utils::metal_is_available()
}
