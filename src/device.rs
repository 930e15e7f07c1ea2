//! # Device Selection
//!
//! Picks the compute device the Whisper backend runs on. GPU devices are only
//! used when candle was built with support for them; otherwise selection
//! falls back to the CPU.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Automatically select the best available device
    #[default]
    Auto,
    /// Force CPU usage
    Cpu,
    /// CUDA GPU (falls back to CPU if not available)
    Cuda,
    /// Metal GPU (falls back to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference string from config into a device.
///
/// Unknown strings are logged and treated as `auto`.
pub fn select_device(preference: &str) -> Device {
    let preference = preference.parse::<DevicePreference>().unwrap_or_else(|e| {
        warn!("{}, using auto", e);
        DevicePreference::Auto
    });

    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
        DevicePreference::Auto => cuda_device().or_else(metal_device).unwrap_or(Device::Cpu),
    };

    info!(device = describe(&device), "Selected inference device");
    device
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

/// Short label for logs and `/health`.
pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
