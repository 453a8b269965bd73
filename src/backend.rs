//! 計算バックエンドの型とデバイス

use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

/// CPU（NdArray）
pub type CpuBackend = NdArray<f32>;
pub type CpuAutodiffBackend = Autodiff<CpuBackend>;

/// GPU（WGPU）
pub type GpuBackend = Wgpu;
pub type GpuAutodiffBackend = Autodiff<GpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// 既定のGPUアダプタ
pub fn gpu_device() -> WgpuDevice {
    WgpuDevice::default()
}
