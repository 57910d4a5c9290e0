//! 帧管线
//!
//! 与具体后端无关的帧管线组件，只通过 [`GpuDevice`](crate::gfx::backend::GpuDevice)
//! 访问设备。
//!
//! # 分层
//!
//! ```text
//! FrameSynchronizer      每帧的 acquire/record/submit/wait/reset/present
//!        │
//! SubmissionQueue        提交、signal、present，跟踪资源状态
//!        │
//! CommandRecorder        分配器 + 命令列表的状态机
//!        │
//! Resource / DescriptorHeap / Pipeline / Fence
//! ```
//!
//! - `resource`：资源句柄、映射守卫、帧资源池
//! - `descriptor`：描述符堆与 CPU/GPU 句柄
//! - `command`：命令记录器
//! - `state`：资源状态跟踪
//! - `queue`：提交队列
//! - `sync`：fence 与延迟释放
//! - `swapchain`：交换链与后缓冲
//! - `frame`：帧同步器
//! - `context`：持有设备、队列与 fence 的上下文

pub mod command;
pub mod context;
pub mod descriptor;
pub mod frame;
pub mod pipeline;
pub mod quad;
pub mod queue;
pub mod resource;
pub mod shaders;
pub mod state;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use command::{CommandRecorder, RecorderState};
pub use context::{ContextOptions, GpuContext};
pub use frame::{FrameRecording, FrameReport, FrameSynchronizer};
pub use queue::SubmissionQueue;
pub use resource::{Resource, ResourceDesc, ResourceState};
pub use sync::{Fence, FenceWait};
