//! 图形设备的统一抽象接口
//!
//! 本模块定义了所有设备后端（DirectX 12、软件参考设备）必须实现的底层接口。
//! 上层的资源、描述符、命令记录、提交队列与帧同步模块只依赖此 trait，
//! 所以同一套帧管线既可以驱动真实 GPU，也可以在测试中驱动软件设备。
//!
//! # 设计理念
//!
//! - **薄封装**：每个方法对应一个或少数几个原生 API 调用
//! - **关联类型**：原生对象（资源、堆、命令列表、fence）由后端自行定义
//! - **协议在上层**：状态机、生命周期与同步规则由 `renderer` 模块保证

use std::sync::Arc;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;

use crate::core::error::GpuResult;
use crate::gfx::adapter::{AdapterInfo, FeatureLevel};
use crate::renderer::command::Command;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType, GpuDescriptorHandle, ViewDesc};
use crate::renderer::pipeline::PipelineDesc;
use crate::renderer::resource::ResourceDesc;
use crate::renderer::swapchain::SwapChainDesc;

/// 后端创建的描述符堆及其起始句柄
pub struct RawDescriptorHeap<H> {
    pub heap: H,
    pub cpu_start: CpuDescriptorHandle,
    /// 仅着色器可见的堆有 GPU 句柄
    pub gpu_start: Option<GpuDescriptorHandle>,
}

/// 图形设备接口
///
/// 所有具体的设备后端都必须实现此 trait。方法按对象分组：
/// 资源、描述符、管线、命令列表、队列与 fence、交换链。
pub trait GpuDevice: Send + Sync + Sized + 'static {
    /// 原生资源
    type Resource: Send + Sync;
    /// 原生描述符堆
    type DescriptorHeap: Send + Sync;
    /// 管线状态对象（含根签名）
    type Pipeline: Send + Sync;
    /// 原生命令列表
    type CommandList: Send;
    /// 命令队列
    type Queue: Send + Sync;
    /// fence
    type Fence: Send + Sync;
    /// 操作系统事件
    type Event: Send + Sync;
    /// 交换链
    type SwapChain: Send;

    /// 后端名称（如 "DirectX 12"）
    fn backend_name(&self) -> &str;

    /// 创建设备时选中的适配器
    fn adapter(&self) -> &AdapterInfo;

    /// 实际创建成功的特性级别
    fn feature_level(&self) -> FeatureLevel;

    // ---- 资源 ----

    fn create_resource(&self, desc: &ResourceDesc) -> GpuResult<Self::Resource>;

    /// GPU 虚拟地址
    fn gpu_address(&self, resource: &Self::Resource) -> u64;

    fn map(&self, resource: &Self::Resource) -> GpuResult<()>;

    fn unmap(&self, resource: &Self::Resource);

    /// 写入已映射的资源（调用方已做越界检查）
    fn write_mapped(&self, resource: &Self::Resource, offset: u64, data: &[u8]);

    /// 读取已映射的资源（调用方已做越界检查）
    fn read_mapped(&self, resource: &Self::Resource, offset: u64, out: &mut [u8]);

    // ---- 描述符 ----

    /// 相邻描述符之间的字节距离，按堆类型固定
    fn descriptor_increment(&self, heap_type: DescriptorHeapType) -> u32;

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> GpuResult<RawDescriptorHeap<Self::DescriptorHeap>>;

    /// 在 `handle` 处写入资源视图
    fn write_descriptor(&self, handle: CpuDescriptorHandle, resource: &Self::Resource, view: &ViewDesc);

    // ---- 管线 ----

    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<Self::Pipeline>;

    // ---- 命令列表 ----

    fn create_command_list(&self) -> GpuResult<Self::CommandList>;

    /// 重置原生命令列表与分配器，准备重新编码
    fn reset_command_list(&self, list: &mut Self::CommandList) -> GpuResult<()>;

    /// 将记录好的命令编码进原生命令列表并关闭它
    fn encode(&self, list: &mut Self::CommandList, commands: &Arc<[Command<Self>]>) -> GpuResult<()>;

    // ---- 队列与同步 ----

    fn create_queue(&self) -> GpuResult<Self::Queue>;

    /// 按顺序执行已关闭的命令列表
    fn execute(&self, queue: &Self::Queue, lists: &[&Self::CommandList]) -> GpuResult<()>;

    fn create_fence(&self, initial_value: u64) -> GpuResult<Self::Fence>;

    /// 在队列中排入 fence 信号：之前提交的工作完成后 fence 变为 `value`
    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> GpuResult<()>;

    fn completed_value(&self, fence: &Self::Fence) -> u64;

    fn create_event(&self) -> GpuResult<Self::Event>;

    /// fence 达到 `value` 时触发事件
    fn set_event_on_completion(&self, fence: &Self::Fence, value: u64, event: &Self::Event) -> GpuResult<()>;

    /// 阻塞等待事件，`None` 表示无限等待。超时返回 `Ok(false)`
    fn wait_event(&self, event: &Self::Event, timeout: Option<Duration>) -> GpuResult<bool>;

    // ---- 交换链 ----

    /// 创建交换链。软件设备没有窗口时 `window` 为 None
    fn create_swap_chain(
        &self,
        queue: &Self::Queue,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> GpuResult<Self::SwapChain>;

    fn back_buffer(&self, swap_chain: &Self::SwapChain, index: u32) -> GpuResult<Self::Resource>;

    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32;

    /// 呈现当前后缓冲，并推进后缓冲索引
    fn present(&self, queue: &Self::Queue, swap_chain: &mut Self::SwapChain, sync_interval: u32) -> GpuResult<()>;

    /// 调整交换链大小，调用前必须释放所有后缓冲引用
    fn resize_swap_chain(&self, swap_chain: &mut Self::SwapChain, width: u32, height: u32) -> GpuResult<()>;
}
