//! 软件参考设备
//!
//! 在 CPU 上实现 [`GpuDevice`]，用于无 GPU 环境下运行帧管线和测试。
//!
//! # 设计原则
//!
//! - **异步时间线**：提交的命令列表由独立线程按顺序执行，fence 在之前的工作完成后才前进，
//!   和真实 GPU 一样，CPU 不等待就读取结果会看到旧数据
//! - **验证层**：执行时检查资源状态、绑定、越界访问，问题记录在 [`DeviceSnapshot`] 中
//! - **真实内存**：缓冲区与纹理都有实际字节，清屏、复制会写入数据，可以回读检查

mod timeline;
mod validation;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;

pub use timeline::{SoftwareEvent, SoftwareFence};
pub use validation::{DeviceSnapshot, ValidationMessage, ValidationSeverity};

use crate::core::error::{GpuError, GpuResult};
use crate::gfx::adapter::{select_adapter, AdapterInfo, AdapterPreference, FeatureLevel, VENDOR_MICROSOFT};
use crate::gfx::backend::{GpuDevice, RawDescriptorHeap};
use crate::renderer::command::Command;
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType, GpuDescriptorHandle, ViewDesc,
};
use crate::renderer::pipeline::PipelineDesc;
use crate::renderer::resource::{ResourceDesc, ResourceState};
use crate::renderer::swapchain::SwapChainDesc;
use timeline::QueueOp;
use validation::ValidationLog;

/// 资源虚拟地址对齐（D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT）
const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

/// 着色器可见堆的 GPU 句柄相对 CPU 句柄的偏移
const GPU_DESCRIPTOR_BASE: u64 = 0x1_0000_0000;

/// 每种堆的描述符增量
#[derive(Debug, Clone, Copy)]
pub(crate) struct Increments {
    pub(crate) rtv: u32,
    pub(crate) dsv: u32,
    pub(crate) cbv_srv_uav: u32,
    pub(crate) sampler: u32,
}

impl Increments {
    fn get(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::Rtv => self.rtv,
            DescriptorHeapType::Dsv => self.dsv,
            DescriptorHeapType::CbvSrvUav => self.cbv_srv_uav,
            DescriptorHeapType::Sampler => self.sampler,
        }
    }
}

/// 资源的实际内存
pub(crate) struct MemoryBlock {
    pub(crate) name: String,
    pub(crate) desc: ResourceDesc,
    pub(crate) size: u64,
    pub(crate) address: u64,
    pub(crate) data: Mutex<Vec<u8>>,
    /// GPU 时间线上的真实状态
    pub(crate) state: Mutex<ResourceState>,
    map_count: AtomicU32,
}

impl MemoryBlock {
    fn new(desc: &ResourceDesc, address: u64) -> Self {
        let size = desc.size_bytes();
        Self {
            name: desc.name.clone(),
            desc: desc.clone(),
            size,
            address,
            data: Mutex::new(vec![0; size as usize]),
            state: Mutex::new(desc.initial_state),
            map_count: AtomicU32::new(0),
        }
    }
}

/// 软件资源
#[derive(Clone)]
pub struct SoftwareResource(pub(crate) Arc<MemoryBlock>);

impl SoftwareResource {
    /// 后端收到的未配对 map 调用次数
    pub fn backend_map_count(&self) -> u32 {
        self.0.map_count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SoftwareResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareResource")
            .field("name", &self.0.name)
            .field("address", &format_args!("{:#x}", self.0.address))
            .finish()
    }
}

/// 着色器可见堆在两个地址空间中的位置
struct HeapRange {
    cpu_start: usize,
    gpu_start: u64,
    len: u64,
}

/// 设备与 GPU 时间线共享的状态
pub(crate) struct DeviceShared {
    pub(crate) log: Mutex<ValidationLog>,
    pub(crate) increments: Increments,
    /// CPU 描述符句柄 -> 视图
    descriptors: Mutex<HashMap<usize, (Weak<MemoryBlock>, ViewDesc)>>,
    shader_visible_heaps: Mutex<Vec<HeapRange>>,
    next_address: AtomicU64,
    next_descriptor: AtomicUsize,
    removed: Mutex<Option<String>>,
}

impl DeviceShared {
    /// 句柄处写入的视图及其资源（资源已释放时为 None）
    pub(crate) fn descriptor(&self, cpu: usize) -> Option<(Arc<MemoryBlock>, ViewDesc)> {
        let descriptors = self.descriptors.lock();
        let (block, view) = descriptors.get(&cpu)?;
        Some((block.upgrade()?, *view))
    }

    /// GPU 句柄换算回 CPU 句柄
    pub(crate) fn cpu_handle_for(&self, gpu: GpuDescriptorHandle) -> Option<usize> {
        self.shader_visible_heaps
            .lock()
            .iter()
            .find(|h| gpu.ptr >= h.gpu_start && gpu.ptr < h.gpu_start + h.len)
            .map(|h| h.cpu_start + (gpu.ptr - h.gpu_start) as usize)
    }

    fn allocate_address(&self, size: u64) -> u64 {
        let span = size.max(1).div_ceil(RESOURCE_PLACEMENT_ALIGNMENT) * RESOURCE_PLACEMENT_ALIGNMENT;
        self.next_address.fetch_add(span, Ordering::Relaxed)
    }

    fn removed_reason(&self) -> Option<String> {
        self.removed.lock().clone()
    }
}

/// 软件描述符堆
#[derive(Debug)]
pub struct SoftwareDescriptorHeap {
    pub cpu_start: CpuDescriptorHandle,
    pub len: u32,
}

/// 软件管线状态
#[derive(Debug)]
pub struct SoftwarePipeline {
    pub name: String,
}

/// 软件命令列表：保存编码好的命令，直到下一次 reset
#[derive(Default)]
pub struct SoftwareCommandList {
    commands: Option<Arc<[Command<SoftwareDevice>]>>,
}

/// 软件命令队列
pub struct SoftwareQueue {
    sender: Mutex<Sender<QueueOp>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftwareQueue {
    fn send(&self, op: QueueOp) -> GpuResult<()> {
        self.sender
            .lock()
            .send(op)
            .map_err(|_| GpuError::DeviceRemoved("GPU timeline thread has stopped".into()))
    }
}

impl Drop for SoftwareQueue {
    fn drop(&mut self) {
        let _ = self.sender.lock().send(QueueOp::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Software GPU timeline panicked");
            }
        }
    }
}

/// 软件交换链
#[derive(Debug)]
pub struct SoftwareSwapChain {
    buffers: Vec<SoftwareResource>,
    index: u32,
    desc: SwapChainDesc,
}

/// 软件参考设备
pub struct SoftwareDevice {
    shared: Arc<DeviceShared>,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
}

impl fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("adapter", &self.adapter.name)
            .field("feature_level", &self.feature_level)
            .finish()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// 软件设备暴露的唯一适配器
    pub fn adapter_info() -> AdapterInfo {
        AdapterInfo {
            index: 0,
            name: "Software Reference Device".into(),
            vendor_id: VENDOR_MICROSOFT,
            device_id: 0x8c,
            dedicated_video_memory: 0,
            is_software: true,
            max_feature_level: Some(FeatureLevel::Level12_1),
        }
    }

    /// 创建开启验证层的设备
    pub fn new() -> Self {
        Self::with_adapter(Self::adapter_info(), FeatureLevel::Level12_1, true)
    }

    /// 按适配器策略与最低特性级别创建设备
    pub fn create(preference: &AdapterPreference, minimum: FeatureLevel, debug_layer: bool) -> GpuResult<Self> {
        let adapters = [Self::adapter_info()];
        let adapter = select_adapter(&adapters, preference, minimum)?;
        let feature_level = FeatureLevel::candidates(minimum)
            .find(|level| adapter.supports(*level))
            .ok_or_else(|| GpuError::DeviceCreationFailed(format!("no feature level >= {}", minimum)))?;

        tracing::info!(
            adapter = %adapter.name,
            feature_level = %feature_level,
            debug_layer,
            "Software device created"
        );
        Ok(Self::with_adapter(adapter.clone(), feature_level, debug_layer))
    }

    fn with_adapter(adapter: AdapterInfo, feature_level: FeatureLevel, debug_layer: bool) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                log: Mutex::new(ValidationLog::new(debug_layer)),
                increments: Increments {
                    rtv: 32,
                    dsv: 8,
                    cbv_srv_uav: 64,
                    sampler: 16,
                },
                descriptors: Mutex::new(HashMap::new()),
                shader_visible_heaps: Mutex::new(Vec::new()),
                next_address: AtomicU64::new(RESOURCE_PLACEMENT_ALIGNMENT),
                next_descriptor: AtomicUsize::new(0x1000),
                removed: Mutex::new(None),
            }),
            adapter,
            feature_level,
        }
    }

    /// 统计与验证消息的快照
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.shared.log.lock().snapshot()
    }

    /// 取出并清空验证消息
    pub fn take_validation_messages(&self) -> Vec<ValidationMessage> {
        self.shared.log.lock().take_messages()
    }

    /// 模拟设备移除：之后的提交与呈现都会失败
    pub fn simulate_device_removed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Simulating device removal");
        *self.shared.removed.lock() = Some(reason);
    }

    /// 读取资源当前内容（不经过映射，用于测试与截图）
    pub fn contents(&self, resource: &SoftwareResource) -> Vec<u8> {
        resource.0.data.lock().clone()
    }

    /// GPU 时间线上资源的真实状态
    pub fn resource_state(&self, resource: &SoftwareResource) -> ResourceState {
        *resource.0.state.lock()
    }

    fn check_removed(&self) -> GpuResult<()> {
        match self.shared.removed_reason() {
            Some(reason) => Err(GpuError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }

    fn allocate_block(&self, desc: &ResourceDesc) -> SoftwareResource {
        let address = self.shared.allocate_address(desc.size_bytes());
        SoftwareResource(Arc::new(MemoryBlock::new(desc, address)))
    }

    fn create_back_buffers(&self, desc: &SwapChainDesc) -> Vec<SoftwareResource> {
        (0..desc.buffer_count)
            .map(|index| self.allocate_block(&desc.back_buffer_desc(index)))
            .collect()
    }
}

impl GpuDevice for SoftwareDevice {
    type Resource = SoftwareResource;
    type DescriptorHeap = SoftwareDescriptorHeap;
    type Pipeline = SoftwarePipeline;
    type CommandList = SoftwareCommandList;
    type Queue = SoftwareQueue;
    type Fence = SoftwareFence;
    type Event = SoftwareEvent;
    type SwapChain = SoftwareSwapChain;

    fn backend_name(&self) -> &str {
        "Software"
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn create_resource(&self, desc: &ResourceDesc) -> GpuResult<Self::Resource> {
        self.check_removed()?;
        let resource = self.allocate_block(desc);
        tracing::trace!(resource = %desc.name, size = desc.size_bytes(), "Resource created");
        Ok(resource)
    }

    fn gpu_address(&self, resource: &Self::Resource) -> u64 {
        resource.0.address
    }

    fn map(&self, resource: &Self::Resource) -> GpuResult<()> {
        resource.0.map_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn unmap(&self, resource: &Self::Resource) {
        resource.0.map_count.fetch_sub(1, Ordering::AcqRel);
    }

    fn write_mapped(&self, resource: &Self::Resource, offset: u64, data: &[u8]) {
        let start = offset as usize;
        resource.0.data.lock()[start..start + data.len()].copy_from_slice(data);
    }

    fn read_mapped(&self, resource: &Self::Resource, offset: u64, out: &mut [u8]) {
        let start = offset as usize;
        out.copy_from_slice(&resource.0.data.lock()[start..start + out.len()]);
    }

    fn descriptor_increment(&self, heap_type: DescriptorHeapType) -> u32 {
        self.shared.increments.get(heap_type)
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> GpuResult<RawDescriptorHeap<Self::DescriptorHeap>> {
        let increment = self.descriptor_increment(desc.heap_type()) as usize;
        let bytes = desc.num_descriptors as usize * increment;
        let cpu_start = self.shared.next_descriptor.fetch_add(bytes.max(increment), Ordering::Relaxed);

        let gpu_start = if desc.shader_visible {
            let gpu_start = GPU_DESCRIPTOR_BASE + cpu_start as u64;
            self.shared.shader_visible_heaps.lock().push(HeapRange {
                cpu_start,
                gpu_start,
                len: bytes as u64,
            });
            Some(GpuDescriptorHandle::new(gpu_start))
        } else {
            None
        };

        Ok(RawDescriptorHeap {
            heap: SoftwareDescriptorHeap {
                cpu_start: CpuDescriptorHandle::new(cpu_start),
                len: desc.num_descriptors,
            },
            cpu_start: CpuDescriptorHandle::new(cpu_start),
            gpu_start,
        })
    }

    fn write_descriptor(&self, handle: CpuDescriptorHandle, resource: &Self::Resource, view: &ViewDesc) {
        self.shared
            .descriptors
            .lock()
            .insert(handle.ptr, (Arc::downgrade(&resource.0), *view));
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<Self::Pipeline> {
        if desc.vertex_shader.entry_point.is_empty() || desc.pixel_shader.entry_point.is_empty() {
            return Err(GpuError::PipelineCreationFailed(format!(
                "'{}': shader entry point is empty",
                desc.name
            )));
        }
        Ok(SoftwarePipeline { name: desc.name.clone() })
    }

    fn create_command_list(&self) -> GpuResult<Self::CommandList> {
        Ok(SoftwareCommandList::default())
    }

    fn reset_command_list(&self, list: &mut Self::CommandList) -> GpuResult<()> {
        list.commands = None;
        Ok(())
    }

    fn encode(&self, list: &mut Self::CommandList, commands: &Arc<[Command<Self>]>) -> GpuResult<()> {
        list.commands = Some(Arc::clone(commands));
        Ok(())
    }

    fn create_queue(&self) -> GpuResult<Self::Queue> {
        let (sender, worker) = timeline::spawn(Arc::clone(&self.shared))?;
        Ok(SoftwareQueue {
            sender: Mutex::new(sender),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn execute(&self, queue: &Self::Queue, lists: &[&Self::CommandList]) -> GpuResult<()> {
        self.check_removed()?;
        let lists = lists
            .iter()
            .map(|list| {
                list.commands
                    .clone()
                    .ok_or_else(|| GpuError::SubmissionFailed("command list was never closed".into()))
            })
            .collect::<GpuResult<Vec<_>>>()?;
        queue.send(QueueOp::Execute(lists))
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<Self::Fence> {
        Ok(SoftwareFence::new(initial_value))
    }

    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> GpuResult<()> {
        queue.send(QueueOp::Signal(fence.clone(), value))
    }

    fn completed_value(&self, fence: &Self::Fence) -> u64 {
        fence.completed()
    }

    fn create_event(&self) -> GpuResult<Self::Event> {
        Ok(SoftwareEvent::default())
    }

    fn set_event_on_completion(&self, fence: &Self::Fence, value: u64, event: &Self::Event) -> GpuResult<()> {
        fence.on_completion(value, event);
        Ok(())
    }

    fn wait_event(&self, event: &Self::Event, timeout: Option<Duration>) -> GpuResult<bool> {
        Ok(event.wait(timeout))
    }

    fn create_swap_chain(
        &self,
        _queue: &Self::Queue,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> GpuResult<Self::SwapChain> {
        if window.is_some() {
            tracing::debug!("Software swap chain ignores the window handle and renders offscreen");
        }
        Ok(SoftwareSwapChain {
            buffers: self.create_back_buffers(desc),
            index: 0,
            desc: *desc,
        })
    }

    fn back_buffer(&self, swap_chain: &Self::SwapChain, index: u32) -> GpuResult<Self::Resource> {
        swap_chain
            .buffers
            .get(index as usize)
            .cloned()
            .ok_or(GpuError::DescriptorOutOfRange {
                slot: index,
                capacity: swap_chain.desc.buffer_count,
            })
    }

    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32 {
        swap_chain.index
    }

    fn present(&self, queue: &Self::Queue, swap_chain: &mut Self::SwapChain, _sync_interval: u32) -> GpuResult<()> {
        if let Some(reason) = self.shared.removed_reason() {
            return Err(GpuError::PresentFailed(reason));
        }
        let index = swap_chain.index;
        let buffer = swap_chain.buffers[index as usize].clone();
        queue
            .send(QueueOp::Present { buffer, index })
            .map_err(|e| GpuError::PresentFailed(e.to_string()))?;
        swap_chain.index = (index + 1) % swap_chain.desc.buffer_count;
        Ok(())
    }

    fn resize_swap_chain(&self, swap_chain: &mut Self::SwapChain, width: u32, height: u32) -> GpuResult<()> {
        self.check_removed()?;
        let outstanding = swap_chain
            .buffers
            .iter()
            .filter(|b| Arc::strong_count(&b.0) > 1)
            .count();
        if outstanding > 0 {
            tracing::warn!(outstanding, "Resizing swap chain while back buffers are referenced");
        }

        swap_chain.desc = SwapChainDesc {
            width,
            height,
            ..swap_chain.desc
        };
        swap_chain.buffers = self.create_back_buffers(&swap_chain.desc);
        swap_chain.index = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::{CommandRecorder, IndexBufferView, IndexFormat, ScissorRect, VertexBufferView, Viewport};
    use crate::renderer::descriptor::DescriptorIncrements;
    use crate::renderer::pipeline::{InputElement, Pipeline, PrimitiveTopology, ShaderBytecode};
    use crate::renderer::queue::SubmissionQueue;
    use crate::renderer::resource::{Format, HeapKind, Resource};
    use crate::renderer::swapchain::SwapChain;
    use crate::renderer::sync::Fence;

    struct Harness {
        device: Arc<SoftwareDevice>,
        queue: SubmissionQueue<SoftwareDevice>,
        fence: Fence<SoftwareDevice>,
        increments: DescriptorIncrements,
    }

    fn harness() -> Harness {
        let device = Arc::new(SoftwareDevice::new());
        // 关掉队列侧跟踪，由设备验证层报告问题
        let queue = SubmissionQueue::new(&device, false).unwrap();
        let fence = Fence::new(&device, 0).unwrap();
        let increments = DescriptorIncrements::query(device.as_ref());
        Harness { device, queue, fence, increments }
    }

    fn run(h: &Harness, recorder: &mut CommandRecorder<SoftwareDevice>) {
        recorder.close().unwrap();
        h.queue.submit(&mut [recorder]).unwrap();
        let value = h.queue.signal_next(&h.fence).unwrap();
        recorder.retire_at(value);
        h.fence.wait(value, Some(Duration::from_secs(5))).unwrap();
    }

    fn quad_pipeline(device: &Arc<SoftwareDevice>) -> Arc<Pipeline<SoftwareDevice>> {
        let desc = PipelineDesc::new(
            "quad",
            ShaderBytecode::new(b"float4 BasicVS() : SV_POSITION { return 0; }".to_vec(), "BasicVS"),
            ShaderBytecode::new(b"float4 BasicPS() : SV_TARGET { return 1; }".to_vec(), "BasicPS"),
        )
        .with_input(InputElement::new("POSITION", Format::Rgb32Float));
        Pipeline::create(device, desc).unwrap()
    }

    #[test]
    fn test_create_respects_preference() {
        let device = SoftwareDevice::create(&AdapterPreference::Auto, FeatureLevel::Level11_0, true).unwrap();
        assert_eq!(device.feature_level(), FeatureLevel::Level12_1);
        assert!(device.adapter().is_software);

        let err = SoftwareDevice::create(&AdapterPreference::Nvidia, FeatureLevel::Level11_0, true).unwrap_err();
        assert!(matches!(err, GpuError::DeviceCreationFailed(_)));
    }

    #[test]
    fn test_resource_addresses_are_aligned_and_distinct() {
        let device = Arc::new(SoftwareDevice::new());
        let a = Resource::create(&device, ResourceDesc::upload_buffer("a", 16)).unwrap();
        let b = Resource::create(&device, ResourceDesc::upload_buffer("b", 70_000)).unwrap();
        let c = Resource::create(&device, ResourceDesc::upload_buffer("c", 16)).unwrap();
        assert_eq!(a.gpu_address() % RESOURCE_PLACEMENT_ALIGNMENT, 0);
        assert_eq!(b.gpu_address() - a.gpu_address(), RESOURCE_PLACEMENT_ALIGNMENT);
        assert_eq!(c.gpu_address() - b.gpu_address(), 2 * RESOURCE_PLACEMENT_ALIGNMENT);
    }

    #[test]
    fn test_clear_writes_pixels() {
        let h = harness();
        let swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 2, 2), None).unwrap();
        let buffer = swap_chain.back_buffer(0).unwrap().clone();

        let mut recorder = CommandRecorder::new(&h.device, "clear", 16).unwrap();
        recorder.reset(&h.fence, None).unwrap();
        recorder
            .transition(&buffer, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        recorder
            .clear_render_target(swap_chain.rtv(0).unwrap(), [1.0, 1.0, 0.0, 1.0])
            .unwrap();
        recorder
            .transition(&buffer, ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        run(&h, &mut recorder);

        let pixels = h.device.contents(buffer.raw());
        assert_eq!(pixels.len(), 4 * 2 * 4);
        assert!(pixels.chunks(4).all(|p| p == [255, 255, 0, 255]));
        let snapshot = h.device.snapshot();
        assert_eq!(snapshot.validation_errors(), 0);
        assert_eq!(snapshot.clears, 1);
        assert_eq!(snapshot.barriers, 2);
    }

    #[test]
    fn test_clear_in_present_state_is_reported() {
        let h = harness();
        let swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 4, 2), None).unwrap();

        let mut recorder = CommandRecorder::new(&h.device, "clear", 16).unwrap();
        recorder.reset(&h.fence, None).unwrap();
        recorder.clear_render_target(swap_chain.rtv(0).unwrap(), [0.0; 4]).unwrap();
        run(&h, &mut recorder);

        let messages = h.device.take_validation_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].command, "ClearRenderTargetView");
        assert!(messages[0].message.contains("Present"));
    }

    #[test]
    fn test_draw_without_bindings_is_reported() {
        let h = harness();
        let pipeline = quad_pipeline(&h.device);

        let mut recorder = CommandRecorder::new(&h.device, "draw", 16).unwrap();
        recorder.reset(&h.fence, Some(&pipeline)).unwrap();
        recorder.draw_instanced(3, 1, 0, 0).unwrap();
        run(&h, &mut recorder);

        let snapshot = h.device.snapshot();
        // 缺少渲染目标、视口、裁剪矩形、拓扑和顶点缓冲
        assert_eq!(snapshot.validation_errors(), 5);
        assert!(snapshot.has_message_for("DrawInstanced"));
    }

    #[test]
    fn test_indexed_draw_checks_vertex_range() {
        let h = harness();
        let pipeline = quad_pipeline(&h.device);
        let swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 4, 2), None).unwrap();
        let target = swap_chain.back_buffer(0).unwrap().clone();

        // 只有 3 个顶点，但索引引用到 3
        let vb = Resource::create(&h.device, ResourceDesc::upload_buffer("vb", 36)).unwrap();
        let ib = Resource::create(&h.device, ResourceDesc::upload_buffer("ib", 12)).unwrap();
        ib.map().unwrap().write_pod(0, &[0u16, 1, 2, 2, 1, 3]).unwrap();

        let mut recorder = CommandRecorder::new(&h.device, "draw", 32).unwrap();
        recorder.reset(&h.fence, Some(&pipeline)).unwrap();
        recorder
            .transition(&target, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        recorder.set_render_target(swap_chain.rtv(0).unwrap()).unwrap();
        recorder.set_viewport(Viewport::from_size(4, 4)).unwrap();
        recorder.set_scissor(ScissorRect::from_size(4, 4)).unwrap();
        recorder.set_primitive_topology(PrimitiveTopology::TriangleList).unwrap();
        recorder.set_vertex_buffer(0, VertexBufferView::whole(&vb, 12)).unwrap();
        recorder.set_index_buffer(IndexBufferView::whole(&ib, IndexFormat::U16)).unwrap();
        recorder.draw_indexed_instanced(3, 1, 0, 0, 0).unwrap();
        recorder.draw_indexed_instanced(6, 1, 0, 0, 0).unwrap();
        recorder
            .transition(&target, ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        run(&h, &mut recorder);

        let snapshot = h.device.snapshot();
        assert_eq!(snapshot.draws, 2);
        assert_eq!(snapshot.validation_errors(), 1);
        assert!(snapshot.messages[0].message.contains("vertex buffer view"));
    }

    #[test]
    fn test_overflowing_ranges_are_reported() {
        let h = harness();
        let pipeline = quad_pipeline(&h.device);
        let swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 4, 2), None).unwrap();
        let target = swap_chain.back_buffer(0).unwrap().clone();

        let src = Resource::create(&h.device, ResourceDesc::upload_buffer("src", 16)).unwrap();
        let dst = Resource::create(
            &h.device,
            ResourceDesc::buffer("dst", 16, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();
        let vb = Resource::create(&h.device, ResourceDesc::upload_buffer("vb", 36)).unwrap();
        let ib = Resource::create(&h.device, ResourceDesc::upload_buffer("ib", 12)).unwrap();
        ib.map().unwrap().write_pod(0, &[0u16, 1, 2, 2, 1, 0]).unwrap();

        let mut recorder = CommandRecorder::new(&h.device, "overflow", 32).unwrap();
        recorder.reset(&h.fence, Some(&pipeline)).unwrap();
        recorder.copy_buffer_region(&dst, 0, &src, u64::MAX - 4, 16).unwrap();
        recorder.copy_buffer_region(&dst, u64::MAX, &src, 0, 16).unwrap();

        recorder
            .transition(&target, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        recorder.set_render_target(swap_chain.rtv(0).unwrap()).unwrap();
        recorder.set_viewport(Viewport::from_size(4, 4)).unwrap();
        recorder.set_scissor(ScissorRect::from_size(4, 4)).unwrap();
        recorder.set_primitive_topology(PrimitiveTopology::TriangleList).unwrap();
        recorder.set_vertex_buffer(0, VertexBufferView::whole(&vb, 12)).unwrap();
        recorder
            .set_index_buffer(IndexBufferView {
                offset: u64::MAX - 1,
                ..IndexBufferView::whole(&ib, IndexFormat::U16)
            })
            .unwrap();
        recorder.draw_indexed_instanced(3, 1, 0, 0, 0).unwrap();
        recorder.set_index_buffer(IndexBufferView::whole(&ib, IndexFormat::U16)).unwrap();
        recorder.draw_indexed_instanced(u32::MAX, 1, u32::MAX, 0, 0).unwrap();
        recorder.draw_indexed_instanced(6, 1, 0, 0, 0).unwrap();
        recorder
            .transition(&target, ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        run(&h, &mut recorder);

        let snapshot = h.device.snapshot();
        let count = |command: &str| snapshot.messages.iter().filter(|m| m.command == command).count();
        assert_eq!(count("CopyBufferRegion"), 2);
        assert_eq!(count("IASetIndexBuffer"), 1);
        assert_eq!(count("DrawIndexedInstanced"), 2);
        assert_eq!(snapshot.validation_errors(), 5);
        // 时间线仍在运行，合法的绘制照常执行
        assert_eq!(snapshot.draws, 3);
        assert_eq!(snapshot.copies, 0);
    }

    #[test]
    fn test_mismatched_barrier_reported_by_device() {
        let h = harness();
        let buffer = Resource::create(
            &h.device,
            ResourceDesc::buffer("vb", 16, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();

        let mut recorder = CommandRecorder::new(&h.device, "barrier", 8)
            .unwrap()
            .with_barrier_validation(false);
        recorder.reset(&h.fence, None).unwrap();
        recorder
            .transition(&buffer, ResourceState::Common, ResourceState::VertexAndConstantBuffer)
            .unwrap();
        run(&h, &mut recorder);

        let messages = h.device.take_validation_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].command, "ResourceBarrier");
        // 验证层报告后仍按声明的目标状态继续
        assert_eq!(h.device.resource_state(buffer.raw()), ResourceState::VertexAndConstantBuffer);
    }

    #[test]
    fn test_device_removed() {
        let h = harness();
        let mut swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 4, 2), None).unwrap();
        h.device.simulate_device_removed("TDR");

        let err = h.queue.present(&mut swap_chain, 1).unwrap_err();
        assert!(err.is_fatal());

        let mut recorder = CommandRecorder::new(&h.device, "main", 8).unwrap();
        recorder.reset(&h.fence, None).unwrap();
        recorder.close().unwrap();
        let err = h.queue.submit(&mut [&mut recorder]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_present_advances_back_buffer() {
        let h = harness();
        let mut swap_chain = SwapChain::create(&h.device, &h.queue, &h.increments, SwapChainDesc::new(4, 4, 3), None).unwrap();
        for expected in [1, 2, 0] {
            h.queue.present(&mut swap_chain, 0).unwrap();
            assert_eq!(swap_chain.current_index(), expected);
        }
        h.queue.flush(&h.fence, Some(Duration::from_secs(5))).unwrap();
        let snapshot = h.device.snapshot();
        assert_eq!(snapshot.presents, 3);
        assert_eq!(snapshot.validation_errors(), 0);
    }
}
