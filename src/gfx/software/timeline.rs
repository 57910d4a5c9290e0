//! 软件 GPU 时间线
//!
//! 队列上的操作被发送到一个工作线程，按提交顺序执行：
//! 命令列表逐条回放，fence 信号在之前的工作全部完成之后才生效。

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::validation::ValidationSeverity;
use super::{DeviceShared, MemoryBlock, SoftwareDevice, SoftwareResource};
use crate::core::error::{GpuError, GpuResult};
use crate::renderer::command::{Command, IndexBufferView, IndexFormat, TransitionBarrier, VertexBufferView};
use crate::renderer::descriptor::{DescriptorType, GpuDescriptorHandle, ViewDesc};
use crate::renderer::pipeline::{Pipeline, PrimitiveTopology, RootParameter};
use crate::renderer::resource::{ResourceDimension, ResourceState, TextureFootprint};

type SoftCommand = Command<SoftwareDevice>;

/// 自动复位的事件（CreateEvent(bManualReset = FALSE)）
#[derive(Clone, Default)]
pub struct SoftwareEvent(Arc<EventShared>);

#[derive(Default)]
struct EventShared {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SoftwareEvent {
    pub(crate) fn set(&self) {
        let mut signaled = self.0.signaled.lock();
        *signaled = true;
        self.0.cond.notify_all();
    }

    /// 等待事件，超时返回 false
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signaled = self.0.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.0.cond.wait_until(&mut signaled, deadline).timed_out() && !*signaled {
                        return false;
                    }
                }
                None => self.0.cond.wait(&mut signaled),
            }
        }
        *signaled = false;
        true
    }
}

/// 软件 fence
#[derive(Clone)]
pub struct SoftwareFence(Arc<Mutex<FenceState>>);

struct FenceState {
    completed: u64,
    waiters: Vec<(u64, SoftwareEvent)>,
}

impl SoftwareFence {
    pub(crate) fn new(initial_value: u64) -> Self {
        Self(Arc::new(Mutex::new(FenceState {
            completed: initial_value,
            waiters: Vec::new(),
        })))
    }

    pub(crate) fn completed(&self) -> u64 {
        self.0.lock().completed
    }

    /// GPU 侧设置完成值，并触发已满足的事件
    pub(crate) fn complete(&self, value: u64) {
        let mut state = self.0.lock();
        state.completed = value;
        state.waiters.retain(|(target, event)| {
            if *target <= value {
                event.set();
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn on_completion(&self, value: u64, event: &SoftwareEvent) {
        let mut state = self.0.lock();
        if state.completed >= value {
            event.set();
        } else {
            state.waiters.push((value, event.clone()));
        }
    }
}

/// 队列操作
pub(crate) enum QueueOp {
    Execute(Vec<Arc<[SoftCommand]>>),
    Signal(SoftwareFence, u64),
    /// 呈现时后缓冲必须处于 PRESENT
    Present { buffer: SoftwareResource, index: u32 },
    Shutdown,
}

/// 启动 GPU 时间线线程
pub(crate) fn spawn(shared: Arc<DeviceShared>) -> GpuResult<(Sender<QueueOp>, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("software-gpu".into())
        .spawn(move || run(shared, receiver))
        .map_err(|e| GpuError::DeviceCreationFailed(format!("failed to start GPU timeline: {}", e)))?;
    Ok((sender, handle))
}

fn run(shared: Arc<DeviceShared>, receiver: Receiver<QueueOp>) {
    tracing::debug!("Software GPU timeline started");
    for op in receiver {
        match op {
            QueueOp::Execute(lists) => {
                for commands in lists {
                    ListExecutor::new(&shared).execute(&commands);
                    shared.log.lock().stats().executed_lists += 1;
                }
            }
            QueueOp::Signal(fence, value) => fence.complete(value),
            QueueOp::Present { buffer, index } => {
                let state = *buffer.0.state.lock();
                let mut log = shared.log.lock();
                if state != ResourceState::Present {
                    log.report(
                        ValidationSeverity::Error,
                        "Present",
                        format!("back buffer {} is in {:?}, expected Present", index, state),
                    );
                }
                log.stats().presents += 1;
            }
            QueueOp::Shutdown => break,
        }
    }
    tracing::debug!("Software GPU timeline stopped");
}

/// 单个命令列表的绑定状态（每个列表开始时清空）
#[derive(Default)]
struct BindState {
    pipeline: Option<Arc<Pipeline<SoftwareDevice>>>,
    render_target: Option<Arc<MemoryBlock>>,
    viewport: bool,
    scissor: bool,
    topology: Option<PrimitiveTopology>,
    vertex_buffers: HashMap<u32, VertexBufferView<SoftwareDevice>>,
    index_buffer: Option<IndexBufferView<SoftwareDevice>>,
    shader_heap_bound: bool,
    tables: HashMap<u32, GpuDescriptorHandle>,
}

struct ListExecutor<'a> {
    shared: &'a DeviceShared,
    bind: BindState,
}

impl<'a> ListExecutor<'a> {
    fn new(shared: &'a DeviceShared) -> Self {
        Self {
            shared,
            bind: BindState::default(),
        }
    }

    fn error(&self, command: &'static str, message: String) {
        self.shared.log.lock().report(ValidationSeverity::Error, command, message);
    }

    fn warn(&self, command: &'static str, message: String) {
        self.shared.log.lock().report(ValidationSeverity::Warning, command, message);
    }

    fn execute(&mut self, commands: &[SoftCommand]) {
        for command in commands {
            let name = command.name();
            match command {
                Command::Barrier(barrier) => self.barrier(barrier),
                Command::SetPipeline(pipeline) => self.bind.pipeline = Some(Arc::clone(pipeline)),
                Command::SetRenderTargets { rtv } => {
                    match self.shared.descriptor(rtv.ptr) {
                        Some((block, ViewDesc::RenderTarget { .. })) => self.bind.render_target = Some(block),
                        _ => self.error(name, format!("RTV handle {:#x} does not hold a render target view", rtv.ptr)),
                    }
                }
                Command::ClearRenderTarget { rtv, color } => self.clear(rtv.ptr, *color),
                Command::SetViewport(v) => {
                    if v.width <= 0.0 || v.height <= 0.0 {
                        self.error(name, format!("viewport has empty extent {}x{}", v.width, v.height));
                    }
                    self.bind.viewport = true;
                }
                Command::SetScissor(r) => {
                    if r.right <= r.left || r.bottom <= r.top {
                        self.warn(name, "scissor rectangle is empty".into());
                    }
                    self.bind.scissor = true;
                }
                Command::SetPrimitiveTopology(t) => self.bind.topology = Some(*t),
                Command::SetVertexBuffer { slot, view } => {
                    if !fits(view.offset, view.size_in_bytes as u64, view.resource.size_bytes()) {
                        self.error(name, format!("vertex buffer view exceeds '{}'", view.resource.name()));
                    }
                    self.bind.vertex_buffers.insert(*slot, view.clone());
                }
                Command::SetIndexBuffer(view) => {
                    if !fits(view.offset, view.size_in_bytes as u64, view.resource.size_bytes()) {
                        self.error(name, format!("index buffer view exceeds '{}'", view.resource.name()));
                    }
                    self.bind.index_buffer = Some(view.clone());
                }
                Command::SetDescriptorHeaps(heaps) => {
                    self.bind.shader_heap_bound = heaps.iter().any(|h| h.is_shader_visible());
                    if heaps.iter().any(|h| !h.is_shader_visible()) {
                        self.error(name, "descriptor heaps bound to the pipeline must be shader visible".into());
                    }
                }
                Command::SetDescriptorTable { root_index, base } => {
                    if !self.bind.shader_heap_bound {
                        self.error(name, "descriptor table set before SetDescriptorHeaps".into());
                    }
                    self.bind.tables.insert(*root_index, *base);
                }
                Command::Draw { vertex_count, instance_count, start_vertex, .. } => {
                    if self.check_draw(name) {
                        self.check_vertex_range(name, *start_vertex as u64 + *vertex_count as u64);
                    }
                    if *instance_count == 0 {
                        self.warn(name, "draw with zero instances".into());
                    }
                    self.shared.log.lock().stats().draws += 1;
                }
                Command::DrawIndexed { index_count, start_index, base_vertex, .. } => {
                    if self.check_draw(name) {
                        self.check_indices(name, *start_index, *index_count, *base_vertex);
                    }
                    self.shared.log.lock().stats().draws += 1;
                }
                Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                    self.copy_buffer(&dst.raw().0, *dst_offset, &src.raw().0, *src_offset, *size)
                }
                Command::CopyBufferToTexture { dst, src, footprint } => {
                    self.copy_texture(&dst.raw().0, &src.raw().0, footprint)
                }
            }
        }
    }

    fn barrier(&self, barrier: &TransitionBarrier<SoftwareDevice>) {
        let block = &barrier.resource.raw().0;
        let mut state = block.state.lock();
        if barrier.before == barrier.after {
            drop(state);
            self.error(
                "ResourceBarrier",
                format!("'{}': before and after states are both {:?}", block.name, barrier.before),
            );
            return;
        }
        if *state != barrier.before {
            let actual = *state;
            *state = barrier.after;
            drop(state);
            self.error(
                "ResourceBarrier",
                format!(
                    "'{}': declared before state {:?} does not match actual state {:?}",
                    block.name, barrier.before, actual
                ),
            );
        } else {
            *state = barrier.after;
            drop(state);
        }
        self.shared.log.lock().stats().barriers += 1;
    }

    fn clear(&self, rtv: usize, color: [f32; 4]) {
        let name = "ClearRenderTargetView";
        let Some((block, view)) = self.shared.descriptor(rtv) else {
            self.error(name, format!("RTV handle {:#x} was never written", rtv));
            return;
        };
        let ViewDesc::RenderTarget { format } = view else {
            self.error(name, format!("handle {:#x} does not hold a render target view", rtv));
            return;
        };
        let state = *block.state.lock();
        if state != ResourceState::RenderTarget {
            self.error(name, format!("'{}' is in {:?}, expected RenderTarget", block.name, state));
        }

        let pixel = format.encode_color(color);
        if !pixel.is_empty() {
            let mut data = block.data.lock();
            for chunk in data.chunks_exact_mut(pixel.len()) {
                chunk.copy_from_slice(&pixel);
            }
        }
        self.shared.log.lock().stats().clears += 1;
    }

    /// 检查绘制所需的全部绑定，返回是否可以继续检查顶点范围
    fn check_draw(&self, name: &'static str) -> bool {
        let Some(pipeline) = &self.bind.pipeline else {
            self.error(name, "no pipeline state bound".into());
            return false;
        };
        let desc = pipeline.desc();

        match &self.bind.render_target {
            None => self.error(name, "no render target bound".into()),
            Some(target) => {
                let state = *target.state.lock();
                if state != ResourceState::RenderTarget {
                    self.error(name, format!("render target '{}' is in {:?}", target.name, state));
                }
                if let ResourceDimension::Texture2D { format, .. } = target.desc.dimension {
                    if format != desc.render_target_format {
                        self.error(
                            name,
                            format!("pipeline expects {:?} but render target is {:?}", desc.render_target_format, format),
                        );
                    }
                }
            }
        }
        if !self.bind.viewport {
            self.error(name, "no viewport set".into());
        }
        if !self.bind.scissor {
            self.error(name, "no scissor rectangle set".into());
        }
        match self.bind.topology {
            None => self.error(name, "no primitive topology set".into()),
            Some(t) if t.topology_type() != desc.topology_type => self.error(
                name,
                format!("topology {:?} does not match pipeline topology type {:?}", t, desc.topology_type),
            ),
            _ => {}
        }

        for (root_index, parameter) in desc.root_parameters.iter().enumerate() {
            let RootParameter::DescriptorTable { ranges, .. } = parameter;
            let Some(base) = self.bind.tables.get(&(root_index as u32)) else {
                self.error(name, format!("root parameter {} has no descriptor table", root_index));
                continue;
            };
            let mut slot = 0u32;
            for range in ranges {
                for _ in 0..range.count {
                    self.check_table_entry(name, base.offset(slot, self.shared.increments.cbv_srv_uav), range.range_type);
                    slot += 1;
                }
            }
        }

        if desc.input_layout.is_empty() {
            return false;
        }
        for slot in desc.input_layout.iter().map(|e| e.input_slot) {
            match self.bind.vertex_buffers.get(&slot) {
                None => {
                    self.error(name, format!("no vertex buffer bound to slot {}", slot));
                    return false;
                }
                Some(view) => {
                    let state = *view.resource.raw().0.state.lock();
                    if !state.allows_vertex_read() {
                        self.error(name, format!("vertex buffer '{}' is in {:?}", view.resource.name(), state));
                    }
                    let expected = desc.vertex_stride(slot);
                    if view.stride_in_bytes < expected {
                        self.error(
                            name,
                            format!("vertex stride {} is smaller than input layout size {}", view.stride_in_bytes, expected),
                        );
                    }
                }
            }
        }
        true
    }

    fn check_table_entry(&self, name: &'static str, handle: GpuDescriptorHandle, expected: DescriptorType) {
        let Some(cpu) = self.shared.cpu_handle_for(handle) else {
            self.error(name, format!("GPU descriptor handle {:#x} is not in a shader-visible heap", handle.ptr));
            return;
        };
        let Some((block, view)) = self.shared.descriptor(cpu) else {
            self.error(name, format!("descriptor at {:#x} was never written", handle.ptr));
            return;
        };
        if view.descriptor_type() != expected {
            self.error(
                name,
                format!("descriptor table expects {} but slot holds {}", expected.name(), view.descriptor_type().name()),
            );
        }
        let state = *block.state.lock();
        let readable = match view {
            ViewDesc::ShaderResource { .. } => state.allows_pixel_shader_read() || state == ResourceState::NonPixelShaderResource,
            ViewDesc::ConstantBuffer { .. } => state.allows_vertex_read(),
            _ => true,
        };
        if !readable {
            self.error(name, format!("'{}' is in {:?} and cannot be read by shaders", block.name, state));
        }
    }

    fn check_vertex_range(&self, name: &'static str, end_vertex: u64) {
        for view in self.bind.vertex_buffers.values() {
            match end_vertex.checked_mul(view.stride_in_bytes as u64) {
                Some(needed) if needed <= view.size_in_bytes as u64 => {}
                Some(needed) => self.error(
                    name,
                    format!(
                        "draw reads {} bytes but vertex buffer view '{}' holds {}",
                        needed,
                        view.resource.name(),
                        view.size_in_bytes
                    ),
                ),
                None => self.error(
                    name,
                    format!("vertex range overflows for vertex buffer view '{}'", view.resource.name()),
                ),
            }
        }
    }

    fn check_indices(&self, name: &'static str, start_index: u32, index_count: u32, base_vertex: i32) {
        let Some(view) = &self.bind.index_buffer else {
            self.error(name, "no index buffer bound".into());
            return;
        };
        let block = &view.resource.raw().0;
        let state = *block.state.lock();
        if !state.allows_index_read() {
            self.error(name, format!("index buffer '{}' is in {:?}", block.name, state));
        }

        let stride = view.format.size_bytes() as u64;
        let range = (start_index as u64)
            .checked_mul(stride)
            .and_then(|skip| view.offset.checked_add(skip))
            .and_then(|start| {
                let end = (index_count as u64).checked_mul(stride).and_then(|len| start.checked_add(len))?;
                Some((start, end))
            });
        let view_end = view.offset.checked_add(view.size_in_bytes as u64);
        let (start, end) = match (range, view_end) {
            (Some((start, end)), Some(view_end)) if end <= view_end && end <= block.size => (start, end),
            _ => {
                self.error(name, format!("draw reads past the end of index buffer '{}'", block.name));
                return;
            }
        };

        let data = block.data.lock();
        let bytes = &data[start as usize..end as usize];
        let max_index = match view.format {
            IndexFormat::U16 => bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as i64)
                .max(),
            IndexFormat::U32 => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .max(),
        };
        drop(data);

        if let Some(max_index) = max_index {
            let end_vertex = max_index + base_vertex as i64 + 1;
            if end_vertex > 0 {
                self.check_vertex_range(name, end_vertex as u64);
            }
        }
    }

    fn copy_buffer(&self, dst: &Arc<MemoryBlock>, dst_offset: u64, src: &Arc<MemoryBlock>, src_offset: u64, size: u64) {
        let name = "CopyBufferRegion";
        let src_state = *src.state.lock();
        let dst_state = *dst.state.lock();
        if !src_state.allows_copy_source() {
            self.error(name, format!("source '{}' is in {:?}", src.name, src_state));
        }
        if dst_state != ResourceState::CopyDest {
            self.error(name, format!("destination '{}' is in {:?}", dst.name, dst_state));
        }
        if !fits(src_offset, size, src.size) || !fits(dst_offset, size, dst.size) {
            self.error(name, "copy range exceeds resource bounds".into());
            return;
        }

        let (s, d, n) = (src_offset as usize, dst_offset as usize, size as usize);
        if Arc::ptr_eq(src, dst) {
            src.data.lock().copy_within(s..s + n, d);
        } else {
            let source = src.data.lock();
            dst.data.lock()[d..d + n].copy_from_slice(&source[s..s + n]);
        }
        self.shared.log.lock().stats().copies += 1;
    }

    fn copy_texture(&self, dst: &Arc<MemoryBlock>, src: &Arc<MemoryBlock>, footprint: &TextureFootprint) {
        let name = "CopyTextureRegion";
        let ResourceDimension::Texture2D { width, height, format } = dst.desc.dimension else {
            self.error(name, format!("destination '{}' is not a texture", dst.name));
            return;
        };
        if (width, height, format) != (footprint.width, footprint.height, footprint.format) {
            self.error(name, format!("footprint does not match texture '{}'", dst.name));
            return;
        }
        if footprint.row_pitch as u64 % crate::renderer::resource::TEXTURE_PITCH_ALIGNMENT != 0 {
            self.error(name, format!("row pitch {} is not 256-byte aligned", footprint.row_pitch));
        }
        if footprint.checked_total_bytes().map_or(true, |total| total > src.size) {
            self.error(name, format!("source '{}' is smaller than the footprint", src.name));
            return;
        }
        let src_state = *src.state.lock();
        let dst_state = *dst.state.lock();
        if !src_state.allows_copy_source() {
            self.error(name, format!("source '{}' is in {:?}", src.name, src_state));
        }
        if dst_state != ResourceState::CopyDest {
            self.error(name, format!("destination '{}' is in {:?}", dst.name, dst_state));
        }

        let row = footprint.tight_row_bytes() as usize;
        let source = src.data.lock();
        let mut target = dst.data.lock();
        for y in 0..footprint.height as usize {
            let from = footprint.offset as usize + y * footprint.row_pitch as usize;
            target[y * row..(y + 1) * row].copy_from_slice(&source[from..from + row]);
        }
        drop(target);
        drop(source);
        self.shared.log.lock().stats().copies += 1;
    }
}

/// `offset + len` 不溢出且不超过 `size`
fn fits(offset: u64, len: u64, size: u64) -> bool {
    offset.checked_add(len).map_or(false, |end| end <= size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_auto_reset() {
        let event = SoftwareEvent::default();
        event.set();
        assert!(event.wait(Some(Duration::from_millis(1))));
        // 自动复位后再等待会超时
        assert!(!event.wait(Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_fence_fires_waiters_in_order() {
        let fence = SoftwareFence::new(0);
        let early = SoftwareEvent::default();
        let late = SoftwareEvent::default();
        fence.on_completion(1, &early);
        fence.on_completion(3, &late);

        fence.complete(2);
        assert_eq!(fence.completed(), 2);
        assert!(early.wait(Some(Duration::from_millis(1))));
        assert!(!late.wait(Some(Duration::from_millis(1))));

        fence.complete(3);
        assert!(late.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_cross_thread_wait() {
        let fence = SoftwareFence::new(0);
        let event = SoftwareEvent::default();
        fence.on_completion(1, &event);

        let signaler = fence.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            signaler.complete(1);
        });
        assert!(event.wait(None));
        handle.join().unwrap();
        assert_eq!(fence.completed(), 1);
    }
}
