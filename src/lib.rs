//! frame_pipeline - fence 同步的 GPU 帧管线
//!
//! 一个 DirectX 12 风格的帧循环：清屏、画一个矩形、呈现，
//! CPU 与 GPU 之间通过 fence 同步。
//!
//! # 模块结构
//!
//! - `core`：日志、配置、错误处理
//! - `gfx`：设备后端（DirectX 12、软件参考设备）
//! - `renderer`：资源、描述符、命令记录、提交队列、帧同步
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use frame_pipeline::core::SyncMode;
//! use frame_pipeline::gfx::SoftwareDevice;
//! use frame_pipeline::renderer::context::{ContextOptions, GpuContext};
//! use frame_pipeline::renderer::frame::FrameSynchronizer;
//! use frame_pipeline::renderer::swapchain::SwapChainDesc;
//!
//! # fn main() -> frame_pipeline::core::Result<()> {
//! let device = Arc::new(SoftwareDevice::new());
//! let context = Arc::new(GpuContext::new(device, ContextOptions::default())?);
//! let swap_chain = context.create_swap_chain(SwapChainDesc::new(640, 480, 2), None)?;
//! let mut frames = FrameSynchronizer::new(context, swap_chain, SyncMode::FullDrain)?;
//!
//! let report = frames.render_frame(|frame| frame.clear([1.0, 1.0, 0.0, 1.0]))?;
//! assert_eq!(report.fence_value, 1);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
