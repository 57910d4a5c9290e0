//! 命令记录模块
//!
//! 命令记录器与它的分配器一一配对，负责按顺序累积 GPU 命令。
//!
//! # 生命周期
//!
//! ```text
//! Initial --reset--> Recording --close--> Closed --submit--> Submitted
//!                        ^                                      |
//!                        +----reset (fence >= retire value)-----+
//! ```
//!
//! - `close()` 只能在 `Recording` 状态调用
//! - `reset()` 只有在上一次提交的 fence 值完成后才能调用，
//!   否则返回 `ResetBeforeRetire`，不会覆盖 GPU 仍在读取的命令内存
//! - 记录的命令持有资源句柄，分配器重置时才释放这些引用

use std::fmt;
use std::sync::Arc;

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
use crate::renderer::pipeline::{Pipeline, PrimitiveTopology};
use crate::renderer::resource::{Format, Resource, ResourceState, TextureFootprint};
use crate::renderer::sync::Fence;

/// 命令记录器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// 刚创建，尚未 reset
    Initial,
    /// 正在记录
    Recording,
    /// 已关闭，可以提交
    Closed,
    /// 已提交到队列
    Submitted,
}

/// 资源状态转换屏障
pub struct TransitionBarrier<B: GpuDevice> {
    pub resource: Resource<B>,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个渲染目标的视口
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 顶点缓冲视图
pub struct VertexBufferView<B: GpuDevice> {
    pub resource: Resource<B>,
    pub offset: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

impl<B: GpuDevice> VertexBufferView<B> {
    /// 覆盖整个缓冲区的视图
    pub fn whole(resource: &Resource<B>, stride_in_bytes: u32) -> Self {
        Self {
            resource: resource.clone(),
            offset: 0,
            size_in_bytes: resource.size_bytes() as u32,
            stride_in_bytes,
        }
    }

    /// GPU 虚拟地址
    pub fn location(&self) -> u64 {
        self.resource.gpu_address() + self.offset
    }

    pub fn vertex_count(&self) -> u32 {
        if self.stride_in_bytes == 0 {
            0
        } else {
            self.size_in_bytes / self.stride_in_bytes
        }
    }
}

impl<B: GpuDevice> Clone for VertexBufferView<B> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            offset: self.offset,
            size_in_bytes: self.size_in_bytes,
            stride_in_bytes: self.stride_in_bytes,
        }
    }
}

/// 索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn format(&self) -> Format {
        match self {
            IndexFormat::U16 => Format::R16Uint,
            IndexFormat::U32 => Format::R32Uint,
        }
    }

    pub fn size_bytes(&self) -> u32 {
        self.format().bytes_per_element()
    }
}

/// 索引缓冲视图
pub struct IndexBufferView<B: GpuDevice> {
    pub resource: Resource<B>,
    pub offset: u64,
    pub size_in_bytes: u32,
    pub format: IndexFormat,
}

impl<B: GpuDevice> IndexBufferView<B> {
    pub fn whole(resource: &Resource<B>, format: IndexFormat) -> Self {
        Self {
            resource: resource.clone(),
            offset: 0,
            size_in_bytes: resource.size_bytes() as u32,
            format,
        }
    }

    pub fn location(&self) -> u64 {
        self.resource.gpu_address() + self.offset
    }

    pub fn index_count(&self) -> u32 {
        self.size_in_bytes / self.format.size_bytes()
    }
}

impl<B: GpuDevice> Clone for IndexBufferView<B> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            offset: self.offset,
            size_in_bytes: self.size_in_bytes,
            format: self.format,
        }
    }
}

/// 记录的 GPU 命令
///
/// 命令按记录顺序被 GPU 原样回放。
pub enum Command<B: GpuDevice> {
    Barrier(TransitionBarrier<B>),
    SetPipeline(Arc<Pipeline<B>>),
    SetRenderTargets { rtv: CpuDescriptorHandle },
    ClearRenderTarget { rtv: CpuDescriptorHandle, color: [f32; 4] },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer { slot: u32, view: VertexBufferView<B> },
    SetIndexBuffer(IndexBufferView<B>),
    SetDescriptorHeaps(Vec<Arc<DescriptorHeap<B>>>),
    SetDescriptorTable { root_index: u32, base: GpuDescriptorHandle },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    CopyBuffer {
        dst: Resource<B>,
        dst_offset: u64,
        src: Resource<B>,
        src_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        dst: Resource<B>,
        src: Resource<B>,
        footprint: TextureFootprint,
    },
}

impl<B: GpuDevice> Command<B> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Barrier(_) => "ResourceBarrier",
            Command::SetPipeline(_) => "SetPipelineState",
            Command::SetRenderTargets { .. } => "OMSetRenderTargets",
            Command::ClearRenderTarget { .. } => "ClearRenderTargetView",
            Command::SetViewport(_) => "RSSetViewports",
            Command::SetScissor(_) => "RSSetScissorRects",
            Command::SetPrimitiveTopology(_) => "IASetPrimitiveTopology",
            Command::SetVertexBuffer { .. } => "IASetVertexBuffers",
            Command::SetIndexBuffer(_) => "IASetIndexBuffer",
            Command::SetDescriptorHeaps(_) => "SetDescriptorHeaps",
            Command::SetDescriptorTable { .. } => "SetGraphicsRootDescriptorTable",
            Command::Draw { .. } => "DrawInstanced",
            Command::DrawIndexed { .. } => "DrawIndexedInstanced",
            Command::CopyBuffer { .. } => "CopyBufferRegion",
            Command::CopyBufferToTexture { .. } => "CopyTextureRegion",
        }
    }
}

impl<B: GpuDevice> fmt::Debug for Command<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Barrier(b) => write!(f, "{}({} {:?} -> {:?})", self.name(), b.resource.name(), b.before, b.after),
            Command::ClearRenderTarget { color, .. } => write!(f, "{}({:?})", self.name(), color),
            Command::Draw { vertex_count, instance_count, .. } => {
                write!(f, "{}({}, {})", self.name(), vertex_count, instance_count)
            }
            Command::DrawIndexed { index_count, instance_count, .. } => {
                write!(f, "{}({}, {})", self.name(), index_count, instance_count)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// 命令记录器（命令列表 + 分配器）
pub struct CommandRecorder<B: GpuDevice> {
    name: String,
    raw: B::CommandList,
    device: Arc<B>,
    state: RecorderState,
    /// 分配器能容纳的命令数
    command_limit: usize,
    /// 正在记录的命令
    commands: Vec<Command<B>>,
    /// 关闭后冻结的命令，持有到下一次 reset
    recorded: Option<Arc<[Command<B>]>>,
    /// 上一次提交完成时的 fence 值
    retire_value: Option<u64>,
    /// reset 时绑定的管线，丢弃命令后重新绑定
    initial_pipeline: Option<Arc<Pipeline<B>>>,
    /// 记录时检查本列表内的屏障链
    validate_barriers: bool,
}

impl<B: GpuDevice> CommandRecorder<B> {
    /// 创建命令记录器
    ///
    /// # 参数
    ///
    /// * `command_limit` - 分配器可容纳的命令数量
    pub fn new(device: &Arc<B>, name: impl Into<String>, command_limit: usize) -> Result<Self> {
        let raw = device.create_command_list()?;
        Ok(Self {
            name: name.into(),
            raw,
            device: Arc::clone(device),
            state: RecorderState::Initial,
            command_limit,
            commands: Vec::new(),
            recorded: None,
            retire_value: None,
            initial_pipeline: None,
            validate_barriers: cfg!(debug_assertions),
        })
    }

    /// 是否在记录时检查屏障链
    pub fn with_barrier_validation(mut self, enabled: bool) -> Self {
        self.validate_barriers = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn raw(&self) -> &B::CommandList {
        &self.raw
    }

    pub fn command_limit(&self) -> usize {
        self.command_limit
    }

    /// 当前记录的命令数
    pub fn len(&self) -> usize {
        match self.state {
            RecorderState::Recording => self.commands.len(),
            _ => self.recorded.as_ref().map_or(0, |r| r.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已关闭的命令序列
    pub fn recorded(&self) -> Option<&Arc<[Command<B>]>> {
        self.recorded.as_ref()
    }

    /// 需要等待的 fence 值
    pub fn retire_value(&self) -> Option<u64> {
        self.retire_value
    }

    /// 上一次提交是否已由 GPU 完成
    pub fn is_retired(&self, fence: &Fence<B>) -> bool {
        match (self.state, self.retire_value) {
            (RecorderState::Submitted, None) => false,
            (_, Some(value)) => fence.completed_value() >= value,
            _ => true,
        }
    }

    /// 重置分配器与命令列表，进入 `Recording`
    ///
    /// 上一次提交的工作未被 fence 确认完成时返回 `ResetBeforeRetire`。
    pub fn reset(&mut self, fence: &Fence<B>, initial_pipeline: Option<&Arc<Pipeline<B>>>) -> Result<()> {
        match self.state {
            RecorderState::Recording => {
                return Err(GpuError::InvalidRecorderState {
                    operation: "reset",
                    state: self.state,
                }
                .into());
            }
            RecorderState::Submitted if self.retire_value.is_none() => {
                // 已提交但还没有 fence 值可等
                return Err(GpuError::ResetBeforeRetire {
                    required: fence.last_signaled() + 1,
                    completed: fence.completed_value(),
                }
                .into());
            }
            _ => {}
        }

        if let Some(required) = self.retire_value {
            let completed = fence.completed_value();
            if completed < required {
                return Err(GpuError::ResetBeforeRetire { required, completed }.into());
            }
        }

        if self.command_limit == 0 {
            return Err(GpuError::OutOfCommandMemory { limit: 0 }.into());
        }

        self.device.reset_command_list(&mut self.raw)?;
        self.recorded = None;
        self.commands.clear();
        self.retire_value = None;
        self.initial_pipeline = initial_pipeline.cloned();
        self.state = RecorderState::Recording;
        self.bind_initial_pipeline("reset")?;

        tracing::trace!(recorder = %self.name, "Command recorder reset");
        Ok(())
    }

    /// 关闭命令列表，进入 `Closed`
    pub fn close(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(GpuError::InvalidRecorderState {
                operation: "close",
                state: self.state,
            }
            .into());
        }

        let frozen: Arc<[Command<B>]> = std::mem::take(&mut self.commands).into();
        self.device.encode(&mut self.raw, &frozen)?;
        tracing::trace!(recorder = %self.name, commands = frozen.len(), "Command recorder closed");
        self.recorded = Some(frozen);
        self.state = RecorderState::Closed;
        Ok(())
    }

    /// 丢弃尚未提交的命令，重新进入 `Recording`
    ///
    /// 用于中途放弃一帧。reset 时给出的初始管线会重新绑定。已提交的记录器不能丢弃，只能在 fence 完成后 reset。
    pub fn discard(&mut self) -> Result<()> {
        match self.state {
            RecorderState::Initial => Ok(()),
            RecorderState::Recording => {
                self.commands.clear();
                self.bind_initial_pipeline("discard")
            }
            RecorderState::Closed => {
                self.device.reset_command_list(&mut self.raw)?;
                self.recorded = None;
                self.commands.clear();
                self.state = RecorderState::Recording;
                self.bind_initial_pipeline("discard")
            }
            RecorderState::Submitted => Err(GpuError::InvalidRecorderState {
                operation: "discard",
                state: self.state,
            }
            .into()),
        }
    }

    fn bind_initial_pipeline(&mut self, operation: &'static str) -> Result<()> {
        match self.initial_pipeline.clone() {
            Some(pipeline) => self.push(Command::SetPipeline(pipeline), operation),
            None => Ok(()),
        }
    }

    /// 由提交队列调用
    pub(crate) fn mark_submitted(&mut self) -> Result<()> {
        if self.state != RecorderState::Closed {
            return Err(GpuError::InvalidRecorderState {
                operation: "submit",
                state: self.state,
            }
            .into());
        }
        self.state = RecorderState::Submitted;
        Ok(())
    }

    /// 记录提交后 fence 将达到的值，之后的 reset 要等到这个值完成
    pub fn retire_at(&mut self, fence_value: u64) {
        self.retire_value = Some(fence_value);
    }

    fn push(&mut self, command: Command<B>, operation: &'static str) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(GpuError::InvalidRecorderState {
                operation,
                state: self.state,
            }
            .into());
        }
        if self.commands.len() >= self.command_limit {
            return Err(GpuError::OutOfCommandMemory {
                limit: self.command_limit,
            }
            .into());
        }
        self.commands.push(command);
        Ok(())
    }

    /// 记录资源状态转换屏障
    pub fn transition(&mut self, resource: &Resource<B>, before: ResourceState, after: ResourceState) -> Result<()> {
        if self.validate_barriers && self.state == RecorderState::Recording {
            let last = self.commands.iter().rev().find_map(|c| match c {
                Command::Barrier(b) if b.resource.id() == resource.id() => Some(b.after),
                _ => None,
            });
            if let Some(tracked) = last {
                if tracked != before {
                    return Err(GpuError::ResourceStateMismatch {
                        resource: resource.name().to_string(),
                        declared: before,
                        tracked,
                    }
                    .into());
                }
            }
        }

        self.push(
            Command::Barrier(TransitionBarrier {
                resource: resource.clone(),
                before,
                after,
            }),
            "transition",
        )
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<Pipeline<B>>) -> Result<()> {
        self.push(Command::SetPipeline(Arc::clone(pipeline)), "set_pipeline")
    }

    pub fn set_render_target(&mut self, rtv: CpuDescriptorHandle) -> Result<()> {
        self.push(Command::SetRenderTargets { rtv }, "set_render_target")
    }

    pub fn clear_render_target(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) -> Result<()> {
        self.push(Command::ClearRenderTarget { rtv, color }, "clear_render_target")
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.push(Command::SetViewport(viewport), "set_viewport")
    }

    pub fn set_scissor(&mut self, rect: ScissorRect) -> Result<()> {
        self.push(Command::SetScissor(rect), "set_scissor")
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> Result<()> {
        self.push(Command::SetPrimitiveTopology(topology), "set_primitive_topology")
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, view: VertexBufferView<B>) -> Result<()> {
        self.push(Command::SetVertexBuffer { slot, view }, "set_vertex_buffer")
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView<B>) -> Result<()> {
        self.push(Command::SetIndexBuffer(view), "set_index_buffer")
    }

    pub fn set_descriptor_heaps(&mut self, heaps: &[Arc<DescriptorHeap<B>>]) -> Result<()> {
        self.push(Command::SetDescriptorHeaps(heaps.to_vec()), "set_descriptor_heaps")
    }

    pub fn set_descriptor_table(&mut self, root_index: u32, base: GpuDescriptorHandle) -> Result<()> {
        self.push(Command::SetDescriptorTable { root_index, base }, "set_descriptor_table")
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) -> Result<()> {
        self.push(
            Command::Draw {
                vertex_count,
                instance_count,
                start_vertex,
                start_instance,
            },
            "draw_instanced",
        )
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> Result<()> {
        self.push(
            Command::DrawIndexed {
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            },
            "draw_indexed_instanced",
        )
    }

    pub fn copy_buffer_region(&mut self, dst: &Resource<B>, dst_offset: u64, src: &Resource<B>, src_offset: u64, size: u64) -> Result<()> {
        self.push(
            Command::CopyBuffer {
                dst: dst.clone(),
                dst_offset,
                src: src.clone(),
                src_offset,
                size,
            },
            "copy_buffer_region",
        )
    }

    /// 从上传缓冲按 `footprint` 复制到纹理
    pub fn copy_texture_from_buffer(&mut self, dst: &Resource<B>, src: &Resource<B>, footprint: TextureFootprint) -> Result<()> {
        self.push(
            Command::CopyBufferToTexture {
                dst: dst.clone(),
                src: src.clone(),
                footprint,
            },
            "copy_texture_from_buffer",
        )
    }
}

impl<B: GpuDevice> fmt::Debug for CommandRecorder<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("commands", &self.len())
            .field("retire_value", &self.retire_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FramePipelineError;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::resource::ResourceDesc;

    fn setup() -> (Arc<SoftwareDevice>, Fence<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        (device, fence)
    }

    fn gpu_error(err: FramePipelineError) -> GpuError {
        match err {
            FramePipelineError::Graphics(e) => e,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_discard_rebinds_initial_pipeline() {
        let (device, fence) = setup();
        let (vs, ps) = crate::renderer::shaders::basic_shaders();
        let pipeline = Pipeline::create(&device, crate::renderer::pipeline::PipelineDesc::new("p", vs, ps)).unwrap();
        let mut recorder = CommandRecorder::new(&device, "main", 16).unwrap();

        recorder.reset(&fence, Some(&pipeline)).unwrap();
        recorder.set_viewport(Viewport::from_size(4, 4)).unwrap();
        recorder.discard().unwrap();
        assert_eq!(recorder.len(), 1);

        // 关闭后丢弃同样保留初始管线
        recorder.set_scissor(ScissorRect::from_size(4, 4)).unwrap();
        recorder.close().unwrap();
        recorder.discard().unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        recorder.close().unwrap();
        let recorded = recorder.recorded().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(recorded[0], Command::SetPipeline(_)));
    }

    #[test]
    fn test_recorder_state_machine() {
        let (device, fence) = setup();
        let mut recorder = CommandRecorder::new(&device, "main", 16).unwrap();
        assert_eq!(recorder.state(), RecorderState::Initial);

        // 未 reset 不能记录
        assert!(recorder.set_viewport(Viewport::from_size(4, 4)).is_err());

        recorder.reset(&fence, None).unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        recorder.set_viewport(Viewport::from_size(4, 4)).unwrap();
        recorder.set_scissor(ScissorRect::from_size(4, 4)).unwrap();
        recorder.close().unwrap();
        assert_eq!(recorder.state(), RecorderState::Closed);
        assert_eq!(recorder.len(), 2);

        // 关闭后记录
        let err = gpu_error(recorder.set_viewport(Viewport::from_size(4, 4)).unwrap_err());
        assert_eq!(
            err,
            GpuError::InvalidRecorderState {
                operation: "set_viewport",
                state: RecorderState::Closed
            }
        );

        // 重复关闭
        let err = gpu_error(recorder.close().unwrap_err());
        assert!(matches!(err, GpuError::InvalidRecorderState { operation: "close", .. }));
    }

    #[test]
    fn test_reset_before_retire_rejected() {
        let (device, fence) = setup();
        let mut recorder = CommandRecorder::new(&device, "main", 16).unwrap();
        recorder.reset(&fence, None).unwrap();
        recorder.close().unwrap();
        recorder.mark_submitted().unwrap();

        // 提交了但没有 fence 值
        let err = gpu_error(recorder.reset(&fence, None).unwrap_err());
        assert!(matches!(err, GpuError::ResetBeforeRetire { .. }));

        // fence 值 1 尚未完成
        recorder.retire_at(1);
        assert!(!recorder.is_retired(&fence));
        let err = gpu_error(recorder.reset(&fence, None).unwrap_err());
        assert_eq!(err, GpuError::ResetBeforeRetire { required: 1, completed: 0 });
    }

    #[test]
    fn test_out_of_command_memory() {
        let (device, fence) = setup();
        let mut recorder = CommandRecorder::new(&device, "tiny", 2).unwrap();
        recorder.reset(&fence, None).unwrap();
        recorder.set_primitive_topology(PrimitiveTopology::TriangleList).unwrap();
        recorder.set_viewport(Viewport::from_size(1, 1)).unwrap();
        let err = gpu_error(recorder.set_scissor(ScissorRect::from_size(1, 1)).unwrap_err());
        assert_eq!(err, GpuError::OutOfCommandMemory { limit: 2 });

        let mut empty = CommandRecorder::new(&device, "empty", 0).unwrap();
        let err = gpu_error(empty.reset(&fence, None).unwrap_err());
        assert_eq!(err, GpuError::OutOfCommandMemory { limit: 0 });
    }

    #[test]
    fn test_barrier_chain_checked_while_recording() {
        let (device, fence) = setup();
        let buffer = Resource::create(
            &device,
            ResourceDesc::buffer("dst", 64, crate::renderer::resource::HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();
        let mut recorder = CommandRecorder::new(&device, "main", 16)
            .unwrap()
            .with_barrier_validation(true);
        recorder.reset(&fence, None).unwrap();

        recorder
            .transition(&buffer, ResourceState::CopyDest, ResourceState::VertexAndConstantBuffer)
            .unwrap();
        let err = gpu_error(
            recorder
                .transition(&buffer, ResourceState::CopyDest, ResourceState::GenericRead)
                .unwrap_err(),
        );
        assert!(matches!(
            err,
            GpuError::ResourceStateMismatch {
                declared: ResourceState::CopyDest,
                tracked: ResourceState::VertexAndConstantBuffer,
                ..
            }
        ));
    }

    #[test]
    fn test_commands_hold_resources_until_reset() {
        let (device, fence) = setup();
        let buffer = Resource::create(&device, ResourceDesc::upload_buffer("vb", 48)).unwrap();
        let base = buffer.handle_count();

        let mut recorder = CommandRecorder::new(&device, "main", 16).unwrap();
        recorder.reset(&fence, None).unwrap();
        recorder.set_vertex_buffer(0, VertexBufferView::whole(&buffer, 12)).unwrap();
        recorder.close().unwrap();
        assert!(buffer.handle_count() > base);

        recorder.reset(&fence, None).unwrap();
        assert_eq!(buffer.handle_count(), base);
    }

    #[test]
    fn test_buffer_views() {
        let (device, _) = setup();
        let buffer = Resource::create(&device, ResourceDesc::upload_buffer("ib", 12)).unwrap();
        let view = IndexBufferView::whole(&buffer, IndexFormat::U16);
        assert_eq!(view.index_count(), 6);
        assert_eq!(view.location(), buffer.gpu_address());

        let vb = VertexBufferView::whole(&buffer, 12);
        assert_eq!(vb.vertex_count(), 1);
    }
}
