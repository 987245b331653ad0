//! Interpretation of the opaque load and generation parameter maps

use bda_core::{DevicePlacement, Error, ParamMap, Result};
use bda_pipeline::LoadError;
use candle_core::{DType, Device, DeviceLocation};
use serde_json::Value;
use tracing::debug;

/// Default sampling seed
pub const DEFAULT_SEED: u64 = 299_792_458;

/// Default generation budget
pub const DEFAULT_MAX_NEW_TOKENS: usize = 512;

/// Requested device for the whole model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    /// Best available accelerator, CPU otherwise
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSpec {
    /// Parse `auto`, `cpu`, `cuda[:N]`, `metal[:N]` or `mps`
    pub fn parse(spec: &str) -> std::result::Result<Self, LoadError> {
        let spec = spec.trim().to_lowercase();
        let (kind, ordinal) = match spec.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    LoadError::failed(format!("invalid device ordinal in '{}'", spec))
                })?;
                (kind.to_string(), ordinal)
            }
            None => (spec.clone(), 0),
        };

        match kind.as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(LoadError::failed(format!("unsupported device '{}'", spec))),
        }
    }

    /// From the `device_map` (or `device`) load parameter, `auto` when absent
    pub fn from_params(params: &ParamMap) -> std::result::Result<Self, LoadError> {
        match params.get("device_map").or_else(|| params.get("device")) {
            None | Some(Value::Null) => Ok(Self::Auto),
            Some(Value::String(spec)) => Self::parse(spec),
            Some(other) => Err(LoadError::failed(format!(
                "device_map must be a string, found {}",
                other
            ))),
        }
    }

    /// Open the device
    pub fn open(self) -> std::result::Result<Device, LoadError> {
        let device = match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| LoadError::failed(format!("Failed to initialize CUDA: {}", e)))?,
            Self::Metal(ordinal) => Device::new_metal(ordinal)
                .map_err(|e| LoadError::failed(format!("Failed to initialize Metal: {}", e)))?,
            Self::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(0)
                        .map_err(|e| LoadError::failed(format!("Failed to initialize CUDA: {}", e)))?
                } else if candle_core::utils::metal_is_available() {
                    Device::new_metal(0)
                        .map_err(|e| LoadError::failed(format!("Failed to initialize Metal: {}", e)))?
                } else {
                    Device::Cpu
                }
            }
        };
        debug!(requested = ?self, opened = ?device.location(), "Device selected");
        Ok(device)
    }
}

/// Placement reported for a candle device
pub fn placement_of(device: &Device) -> DevicePlacement {
    match device.location() {
        DeviceLocation::Cpu => DevicePlacement::Cpu,
        DeviceLocation::Cuda { gpu_id } => DevicePlacement::Cuda(gpu_id),
        DeviceLocation::Metal { gpu_id } => DevicePlacement::Metal(gpu_id),
    }
}

/// Weight precision from `torch_dtype` / `dtype`.
///
/// Without an explicit precision, accelerators run in half precision and the
/// CPU in full precision.
pub fn dtype_from_params(params: &ParamMap, device: &Device) -> std::result::Result<DType, LoadError> {
    let requested = params.get("torch_dtype").or_else(|| params.get("dtype"));
    let name = match requested {
        None | Some(Value::Null) => "auto",
        Some(Value::String(name)) => name.as_str(),
        Some(other) => {
            return Err(LoadError::failed(format!(
                "dtype must be a string, found {}",
                other
            )))
        }
    };

    match name.trim().to_lowercase().as_str() {
        "auto" => Ok(if device.is_cpu() { DType::F32 } else { DType::F16 }),
        "float32" | "fp32" | "f32" => Ok(DType::F32),
        "float16" | "fp16" | "f16" | "half" => Ok(DType::F16),
        "bfloat16" | "bf16" => Ok(DType::BF16),
        other => Err(LoadError::failed(format!("unsupported dtype '{}'", other))),
    }
}

/// Sampling settings for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    /// `None` means greedy decoding
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: None,
            top_p: None,
            seed: DEFAULT_SEED,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
        }
    }
}

impl GenerationSettings {
    /// Read the generation parameter map.
    ///
    /// `temperature` and `top_p` only apply with `do_sample: true`. Unknown
    /// keys are ignored. A badly typed value fails the generation call as an
    /// inference error.
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let mut settings = Self::default();
        let mut do_sample = false;
        let mut temperature = None;

        for (key, value) in params {
            match key.as_str() {
                "max_new_tokens" | "max_tokens" => {
                    settings.max_new_tokens = as_u64(key, value)? as usize
                }
                "do_sample" => do_sample = as_bool(key, value)?,
                "temperature" => temperature = Some(as_f64(key, value)?),
                "top_p" => settings.top_p = Some(as_f64(key, value)?),
                "seed" => settings.seed = as_u64(key, value)?,
                "repetition_penalty" | "repeat_penalty" => {
                    settings.repeat_penalty = as_f64(key, value)? as f32
                }
                "repeat_last_n" => settings.repeat_last_n = as_u64(key, value)? as usize,
                _ => debug!(key = %key, "Ignoring unsupported generation parameter"),
            }
        }

        if do_sample {
            settings.temperature = temperature.filter(|t| *t > 0.0).or(Some(1.0));
        } else {
            settings.top_p = None;
        }

        Ok(settings)
    }
}

fn as_u64(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::inference(format!("{} must be a non-negative integer, found {}", key, value)))
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::inference(format!("{} must be a number, found {}", key, value)))
}

fn as_bool(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::inference(format!("{} must be a boolean, found {}", key, value)))
}
