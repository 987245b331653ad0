//! The `doctor` command: what the inference backend can see

use bda_pipeline::default_models_dir;
use candle_core::utils;
use tracing::warn;

/// Accelerator and build information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub version: &'static str,
    pub cuda_available: bool,
    pub metal_available: bool,
    pub cpu_threads: usize,
    pub avx: bool,
    pub neon: bool,
}

impl Diagnostics {
    pub fn collect() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            cuda_available: utils::cuda_is_available(),
            metal_available: utils::metal_is_available(),
            cpu_threads: utils::get_num_threads(),
            avx: utils::with_avx(),
            neon: utils::with_neon(),
        }
    }

    pub fn has_accelerator(&self) -> bool {
        self.cuda_available || self.metal_available
    }
}

pub fn run() {
    let diagnostics = Diagnostics::collect();

    println!("bda-svc {}", diagnostics.version);
    println!("  CUDA available:  {}", diagnostics.cuda_available);
    println!("  Metal available: {}", diagnostics.metal_available);
    println!("  CPU threads:     {}", diagnostics.cpu_threads);
    println!("  AVX: {}  NEON: {}", diagnostics.avx, diagnostics.neon);
    println!("  Model cache:     {}", default_models_dir().display());

    if !diagnostics.has_accelerator() {
        warn!("No accelerator available; models must be fully resident on CUDA or Metal");
    }
}
