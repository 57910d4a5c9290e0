//! GPU 上下文
//!
//! 显式构造的上下文对象，持有设备、唯一的直接命令队列、帧 fence、
//! 启动时查询一次的描述符增量以及延迟释放队列。所有组件通过引用拿到它，
//! 没有进程级的全局设备或队列。
//!
//! # 上传路径
//!
//! - 顶点/索引/常量数据：上传堆缓冲，映射 → 写入 → 解除映射
//! - GPU 本地缓冲与纹理：先写入上传堆暂存缓冲，再用复制命令搬到默认堆，
//!   暂存缓冲交给延迟释放队列，fence 完成后释放

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::gfx::adapter::{AdapterPreference, FeatureLevel};
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{CommandRecorder, RecorderState};
use crate::renderer::descriptor::{DescriptorHeap, DescriptorHeapDesc, DescriptorIncrements, ViewDesc};
use crate::renderer::queue::SubmissionQueue;
use crate::renderer::resource::{HeapKind, PixelData, Resource, ResourceDesc, ResourceState, TextureFootprint};
use crate::renderer::swapchain::{SwapChain, SwapChainDesc};
use crate::renderer::sync::{DeferredDeletionQueue, Fence, FenceWait};

/// 创建上下文的选项
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub adapter: AdapterPreference,
    pub min_feature_level: FeatureLevel,
    pub debug_layer: bool,
    /// 队列提交时跟踪资源状态，记录时检查屏障链
    pub track_resource_states: bool,
    /// 每个命令分配器可容纳的命令数
    pub command_memory_limit: usize,
    /// None 表示无限等待
    pub fence_timeout: Option<Duration>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            adapter: AdapterPreference::Auto,
            min_feature_level: FeatureLevel::Level11_0,
            debug_layer: cfg!(debug_assertions),
            track_resource_states: cfg!(debug_assertions),
            command_memory_limit: 4096,
            fence_timeout: None,
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            adapter: config.graphics.adapter.clone(),
            min_feature_level: config.graphics.min_feature_level,
            debug_layer: config.validation.debug_layer,
            track_resource_states: config.validation.track_resource_states,
            command_memory_limit: config.frame.command_memory_limit,
            fence_timeout: config.frame.fence_timeout(),
        }
    }
}

/// GPU 上下文
pub struct GpuContext<B: GpuDevice> {
    device: Arc<B>,
    queue: SubmissionQueue<B>,
    fence: Fence<B>,
    increments: DescriptorIncrements,
    retired: Mutex<DeferredDeletionQueue>,
    options: ContextOptions,
}

impl<B: GpuDevice> GpuContext<B> {
    /// 在已创建的设备上建立队列与 fence
    pub fn new(device: Arc<B>, options: ContextOptions) -> Result<Self> {
        let queue = SubmissionQueue::new(&device, options.track_resource_states)?;
        let fence = Fence::new(&device, 0)?;
        let increments = DescriptorIncrements::query(device.as_ref());

        crate::engine_info!(
            backend = device.backend_name(),
            adapter = %device.adapter().name,
            vendor = device.adapter().vendor_name(),
            feature_level = %device.feature_level(),
            track_resource_states = options.track_resource_states,
            "GPU context created"
        );
        tracing::debug!(?increments, "Descriptor increments");

        Ok(Self {
            device,
            queue,
            fence,
            increments,
            retired: Mutex::new(DeferredDeletionQueue::new()),
            options,
        })
    }

    pub fn device(&self) -> &Arc<B> {
        &self.device
    }

    pub fn queue(&self) -> &SubmissionQueue<B> {
        &self.queue
    }

    pub fn fence(&self) -> &Fence<B> {
        &self.fence
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn increments(&self) -> DescriptorIncrements {
        self.increments
    }

    /// 创建命令记录器，容量与屏障检查来自选项
    pub fn create_recorder(&self, name: impl Into<String>) -> Result<CommandRecorder<B>> {
        Ok(CommandRecorder::new(&self.device, name, self.options.command_memory_limit)?
            .with_barrier_validation(self.options.track_resource_states))
    }

    pub fn create_swap_chain(&self, desc: SwapChainDesc, window: Option<RawWindowHandle>) -> Result<SwapChain<B>> {
        SwapChain::create(&self.device, &self.queue, &self.increments, desc, window)
    }

    pub fn create_resource(&self, desc: ResourceDesc) -> Result<Resource<B>> {
        Resource::create(&self.device, desc)
    }

    pub fn create_descriptor_heap(&self, desc: DescriptorHeapDesc) -> Result<Arc<DescriptorHeap<B>>> {
        DescriptorHeap::create(&self.device, desc, &self.increments)
    }

    /// 创建上传堆缓冲并写入 POD 数据（顶点、索引）
    pub fn upload_buffer<T: bytemuck::Pod>(&self, name: &str, data: &[T]) -> Result<Resource<B>> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = self.create_resource(ResourceDesc::upload_buffer(name, bytes.len() as u64))?;
        let mapped = buffer.map()?;
        mapped.write(0, bytes)?;
        mapped.unmap();
        Ok(buffer)
    }

    /// 创建常量缓冲（256 字节对齐），写入初值，并在 `heap` 中创建 CBV
    pub fn create_constant_buffer<T: bytemuck::Pod>(
        &self,
        name: &str,
        value: &T,
        heap: &DescriptorHeap<B>,
    ) -> Result<(Resource<B>, u32)> {
        let buffer = self.create_resource(ResourceDesc::constant_buffer(name, std::mem::size_of::<T>() as u64))?;
        buffer.upload(0, bytemuck::bytes_of(value))?;
        let slot = heap.push_view(
            &buffer,
            &ViewDesc::ConstantBuffer {
                offset: 0,
                size: buffer.size_bytes() as u32,
            },
        )?;
        Ok((buffer, slot))
    }

    /// 把数据搬到默认堆缓冲，结束后处于 `final_state`
    pub fn upload_to_default_buffer<T: bytemuck::Pod>(
        &self,
        name: &str,
        data: &[T],
        final_state: ResourceState,
    ) -> Result<Resource<B>> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as u64;
        let buffer = self.create_resource(ResourceDesc::buffer(name, size, HeapKind::Default, ResourceState::CopyDest))?;
        let staging = self.upload_buffer(&format!("{} (staging)", name), bytes)?;

        let mut recorder = self.create_recorder(format!("upload {}", name))?;
        recorder.reset(&self.fence, None)?;
        recorder.copy_buffer_region(&buffer, 0, &staging, 0, size)?;
        if final_state != ResourceState::CopyDest {
            recorder.transition(&buffer, ResourceState::CopyDest, final_state)?;
        }
        self.execute_and_wait(&mut recorder)?;
        self.retire(staging);
        self.collect_retired();
        Ok(buffer)
    }

    /// 上传纹理并在 `heap` 中创建 SRV
    ///
    /// 暂存缓冲按 256 字节行距排布，复制后纹理转换到 PIXEL_SHADER_RESOURCE。
    pub fn upload_texture(&self, name: &str, pixels: &PixelData<'_>, heap: &DescriptorHeap<B>) -> Result<(Resource<B>, u32)> {
        let texture = self.create_resource(ResourceDesc::texture2d(
            name,
            pixels.width,
            pixels.height,
            pixels.format,
            HeapKind::Default,
            ResourceState::CopyDest,
        ))?;

        let footprint = TextureFootprint::for_texture(pixels.width, pixels.height, pixels.format);
        let staging = self.create_resource(ResourceDesc::upload_buffer(
            format!("{} (staging)", name),
            footprint.total_bytes(),
        ))?;
        staging.write_pixels(&footprint, pixels)?;

        let mut recorder = self.create_recorder(format!("upload {}", name))?;
        recorder.reset(&self.fence, None)?;
        recorder.copy_texture_from_buffer(&texture, &staging, footprint)?;
        recorder.transition(&texture, ResourceState::CopyDest, ResourceState::PixelShaderResource)?;
        self.execute_and_wait(&mut recorder)?;
        self.retire(staging);
        self.collect_retired();

        let slot = heap.push_view(&texture, &ViewDesc::ShaderResource { format: pixels.format })?;
        tracing::debug!(texture = name, width = pixels.width, height = pixels.height, slot, "Texture uploaded");
        Ok((texture, slot))
    }

    /// 关闭、提交、signal 并等待完成
    ///
    /// 用于初始化阶段的一次性命令，结束后记录器可以立即 reset。
    pub fn execute_and_wait(&self, recorder: &mut CommandRecorder<B>) -> Result<FenceWait> {
        if recorder.state() == RecorderState::Recording {
            recorder.close()?;
        }
        self.queue.submit(&mut [&mut *recorder])?;
        let value = self.queue.signal_next(&self.fence)?;
        recorder.retire_at(value);
        let wait = self.fence.wait(value, self.options.fence_timeout)?;
        self.collect_retired();
        Ok(wait)
    }

    /// 在当前所有已提交工作完成后释放 `item`
    pub fn retire<T: Send + 'static>(&self, item: T) {
        let value = self.fence.last_signaled();
        self.retired.lock().retire(value, item);
    }

    /// 释放已经安全的对象
    pub fn collect_retired(&self) -> usize {
        self.retired.lock().collect(self.fence.completed_value())
    }

    pub fn pending_retirements(&self) -> usize {
        self.retired.lock().len()
    }

    /// 排入信号并等待 GPU 空闲，然后释放所有延迟对象
    pub fn flush(&self) -> Result<FenceWait> {
        let wait = self.queue.flush(&self.fence, self.options.fence_timeout)?;
        self.collect_retired();
        Ok(wait)
    }

}

impl<B: GpuDevice> Drop for GpuContext<B> {
    fn drop(&mut self) {
        // 退出前排空 GPU，避免释放仍被引用的资源
        if let Err(e) = self.queue.flush(&self.fence, Some(Duration::from_secs(5))) {
            crate::engine_error!("Failed to drain GPU on shutdown: {}", e);
        }
        let pending = self.retired.lock().len();
        self.retired.lock().clear();
        if pending > 0 {
            tracing::debug!(pending, "Released deferred resources on shutdown");
        }
    }
}
