//! 图形设备后端
//!
//! - `backend`：所有后端实现的 [`GpuDevice`] trait
//! - `adapter`：适配器描述与选择策略
//! - `software`：软件参考设备，任何平台可用，带校验层
//! - `dx12`：DirectX 12 设备（仅 Windows）

pub mod adapter;
pub mod backend;
pub mod software;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::GpuDevice;
pub use software::SoftwareDevice;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
