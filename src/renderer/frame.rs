//! 帧同步器
//!
//! 驱动一帧经过资源、命令记录、提交队列三层，并提供唯一的阻塞点。
//!
//! # 每帧流程
//!
//! ```text
//! acquire_target -> record_commands -> submit_and_signal -> wait_for_gpu
//!                -> reset_for_next_frame -> present
//! ```
//!
//! # 同步模式
//!
//! - **FullDrain**（默认）：一个命令记录器，每帧等待 fence 达到刚 signal 的值，
//!   CPU 与 GPU 完全串行
//! - **Pipelined**：每个后缓冲一个记录器和一个 fence 值，只等待下一个后缓冲
//!   上一次使用时的 fence 值，CPU 记录第 N+1 帧时 GPU 仍可执行第 N 帧
//!
//! 两种模式的步骤顺序相同，区别只在 `wait_for_gpu` 等待的值和
//! `reset_for_next_frame` 重置哪个记录器。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::SyncMode;
use crate::core::error::{GpuError, Result};
use crate::core::log;
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{CommandRecorder, RecorderState, ScissorRect, Viewport};
use crate::renderer::context::GpuContext;
use crate::renderer::descriptor::CpuDescriptorHandle;
use crate::renderer::pipeline::Pipeline;
use crate::renderer::resource::{FrameResourcePool, Resource, ResourceState};
use crate::renderer::swapchain::SwapChain;
use crate::renderer::sync::FenceWait;

/// 帧轨迹保留的事件数
const TRACE_CAPACITY: usize = 512;

/// 帧轨迹中的一个事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    Acquire { frame: u64, target: u32 },
    Submit { frame: u64, slot: usize, commands: usize },
    Signal { frame: u64, value: u64 },
    Wait { frame: u64, value: u64, completed: u64, blocked: bool },
    /// `required` 为记录器上一次提交的 fence 值
    Reset { frame: u64, slot: usize, required: Option<u64>, completed: u64 },
    Present { frame: u64, target: u32 },
    Abort { frame: u64 },
}

/// 最近若干帧的事件记录
#[derive(Debug, Default, Clone)]
pub struct FrameTrace {
    events: VecDeque<FrameEvent>,
}

impl FrameTrace {
    fn push(&mut self, event: FrameEvent) {
        if self.events.len() == TRACE_CAPACITY {
            self.events.pop_front();
        }
        tracing::trace!(?event, "Frame event");
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &FrameEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 每次重置时，记录器上一次提交的 fence 值都已完成
    pub fn check_reset_after_wait(&self) -> bool {
        self.events.iter().all(|event| match event {
            FrameEvent::Reset { required: Some(required), completed, .. } => completed >= required,
            _ => true,
        })
    }

    /// signal 的值严格递增
    pub fn signals_strictly_increase(&self) -> bool {
        let values: Vec<u64> = self
            .events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Signal { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        values.windows(2).all(|w| w[0] < w[1])
    }

    /// 每次等待结束时 fence 已达到等待的值
    pub fn waits_reached_target(&self) -> bool {
        self.events.iter().all(|event| match event {
            FrameEvent::Wait { value, completed, .. } => completed >= value,
            _ => true,
        })
    }
}

/// 一帧的结果
#[derive(Debug, Clone, Copy)]
pub struct FrameReport {
    pub frame_number: u64,
    pub target_index: u32,
    /// 本帧 signal 的 fence 值
    pub fence_value: u64,
    pub wait: FenceWait,
    /// 本帧命令列表中的命令数
    pub commands: usize,
    pub cpu_time: Duration,
}

/// 记录中的一帧
///
/// 由 [`FrameSynchronizer::record_commands`] 创建。后缓冲已经转换到
/// RENDER_TARGET 并绑定为渲染目标，视口与裁剪矩形覆盖整个后缓冲。
pub struct FrameRecording<'a, B: GpuDevice> {
    recorder: &'a mut CommandRecorder<B>,
    target: &'a Resource<B>,
    rtv: CpuDescriptorHandle,
    target_index: u32,
}

impl<'a, B: GpuDevice> FrameRecording<'a, B> {
    pub fn recorder(&mut self) -> &mut CommandRecorder<B> {
        self.recorder
    }

    pub fn target(&self) -> &Resource<B> {
        self.target
    }

    pub fn target_index(&self) -> u32 {
        self.target_index
    }

    pub fn rtv(&self) -> CpuDescriptorHandle {
        self.rtv
    }

    /// 清除当前后缓冲
    pub fn clear(&mut self, color: [f32; 4]) -> Result<()> {
        self.recorder.clear_render_target(self.rtv, color)
    }
}

/// 正在进行的帧
#[derive(Debug, Clone, Copy)]
struct InFlight {
    target: u32,
    slot: usize,
    fence_value: Option<u64>,
}

/// 帧同步器
pub struct FrameSynchronizer<B: GpuDevice> {
    context: Arc<GpuContext<B>>,
    swap_chain: SwapChain<B>,
    mode: SyncMode,
    recorders: Vec<CommandRecorder<B>>,
    frame_resources: FrameResourcePool,
    pipeline: Option<Arc<Pipeline<B>>>,
    sync_interval: u32,
    frame_number: u64,
    current: Option<InFlight>,
    trace: FrameTrace,
}

impl<B: GpuDevice> FrameSynchronizer<B> {
    /// 创建帧同步器
    ///
    /// FullDrain 模式只有一个记录器；Pipelined 模式每个后缓冲一个。
    pub fn new(context: Arc<GpuContext<B>>, swap_chain: SwapChain<B>, mode: SyncMode) -> Result<Self> {
        let count = match mode {
            SyncMode::FullDrain => 1,
            SyncMode::Pipelined => swap_chain.buffer_count() as usize,
        };
        let recorders = (0..count)
            .map(|i| context.create_recorder(format!("frame[{}]", i)))
            .collect::<Result<Vec<_>>>()?;

        crate::engine_info!(
            mode = ?mode,
            recorders = count,
            back_buffers = swap_chain.buffer_count(),
            "Frame synchronizer created"
        );

        Ok(Self {
            context,
            swap_chain,
            mode,
            recorders,
            frame_resources: FrameResourcePool::new(count),
            pipeline: None,
            sync_interval: 1,
            frame_number: 0,
            current: None,
            trace: FrameTrace::default(),
        })
    }

    /// 每次重置记录器时绑定的初始管线
    pub fn with_pipeline(mut self, pipeline: Arc<Pipeline<B>>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// present 的垂直同步间隔
    pub fn with_sync_interval(mut self, sync_interval: u32) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    pub fn context(&self) -> &Arc<GpuContext<B>> {
        &self.context
    }

    pub fn swap_chain(&self) -> &SwapChain<B> {
        &self.swap_chain
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// 已呈现的帧数
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn trace(&self) -> &FrameTrace {
        &self.trace
    }

    pub fn recorder_state(&self, slot: usize) -> Option<RecorderState> {
        self.recorders.get(slot).map(|r| r.state())
    }

    fn slot_for(&self, target: u32) -> usize {
        match self.mode {
            SyncMode::FullDrain => 0,
            SyncMode::Pipelined => target as usize % self.recorders.len(),
        }
    }

    fn in_flight(&self, operation: &'static str) -> std::result::Result<InFlight, GpuError> {
        self.current.ok_or(GpuError::InvalidRecorderState {
            operation,
            state: RecorderState::Initial,
        })
    }

    /// 读取当前后缓冲索引，不产生 GPU 工作
    pub fn acquire_target(&mut self) -> u32 {
        let target = self.swap_chain.current_index();
        self.trace.push(FrameEvent::Acquire {
            frame: self.frame_number,
            target,
        });
        target
    }

    /// 记录一帧
    ///
    /// 打开记录器，PRESENT -> RENDER_TARGET，绑定渲染目标、视口与裁剪矩形，
    /// 调用 `record` 记录清屏和绘制，再 RENDER_TARGET -> PRESENT 并关闭。
    /// 任何一步失败都会丢弃本帧已记录的命令。
    pub fn record_commands<F>(&mut self, target: u32, record: F) -> Result<()>
    where
        F: FnOnce(&mut FrameRecording<'_, B>) -> Result<()>,
    {
        let slot = self.slot_for(target);
        let result = self.record_into(slot, target, record);
        match result {
            Ok(()) => {
                self.current = Some(InFlight {
                    target,
                    slot,
                    fence_value: None,
                });
                Ok(())
            }
            Err(e) => {
                if let Err(discard) = self.recorders[slot].discard() {
                    crate::engine_warn!("Failed to discard frame commands: {}", discard);
                }
                Err(e)
            }
        }
    }

    fn record_into<F>(&mut self, slot: usize, target: u32, record: F) -> Result<()>
    where
        F: FnOnce(&mut FrameRecording<'_, B>) -> Result<()>,
    {
        let recorder = &mut self.recorders[slot];
        match recorder.state() {
            RecorderState::Recording => {}
            RecorderState::Closed => recorder.discard()?,
            RecorderState::Initial | RecorderState::Submitted => {
                recorder.reset(self.context.fence(), self.pipeline.as_ref())?
            }
        }

        let buffer = self.swap_chain.back_buffer(target)?;
        let rtv = self.swap_chain.rtv(target)?;
        let (width, height) = (self.swap_chain.width(), self.swap_chain.height());

        recorder.transition(buffer, ResourceState::Present, ResourceState::RenderTarget)?;
        recorder.set_render_target(rtv)?;
        recorder.set_viewport(Viewport::from_size(width, height))?;
        recorder.set_scissor(ScissorRect::from_size(width, height))?;

        let mut recording = FrameRecording {
            recorder: &mut *recorder,
            target: buffer,
            rtv,
            target_index: target,
        };
        record(&mut recording)?;

        recorder.transition(buffer, ResourceState::RenderTarget, ResourceState::Present)?;
        recorder.close()
    }

    /// 提交已关闭的记录器，并以下一个 fence 值 signal
    pub fn submit_and_signal(&mut self) -> Result<u64> {
        let mut current = self.in_flight("submit")?;
        let recorder = &mut self.recorders[current.slot];
        let commands = recorder.len();

        self.context.queue().submit(&mut [&mut *recorder])?;
        self.trace.push(FrameEvent::Submit {
            frame: self.frame_number,
            slot: current.slot,
            commands,
        });

        let value = self.context.queue().signal_next(self.context.fence())?;
        recorder.retire_at(value);
        if let Some(resource) = self.frame_resources.get_mut(current.slot) {
            resource.mark_in_use(value);
        }
        current.fence_value = Some(value);
        self.current = Some(current);

        self.trace.push(FrameEvent::Signal {
            frame: self.frame_number,
            value,
        });
        Ok(value)
    }

    /// 下一帧要使用的记录器槽位
    fn next_slot(&self, current: &InFlight) -> usize {
        match self.mode {
            SyncMode::FullDrain => 0,
            SyncMode::Pipelined => (current.slot + 1) % self.recorders.len(),
        }
    }

    /// 等待 GPU
    ///
    /// FullDrain 等待本帧的 fence 值；Pipelined 只等待下一个槽位上一次提交的值。
    /// 已完成时不阻塞。
    pub fn wait_for_gpu(&mut self) -> Result<FenceWait> {
        let current = self.in_flight("wait_for_gpu")?;
        let fence = self.context.fence();

        let value = match self.mode {
            SyncMode::FullDrain => fence.last_signaled(),
            SyncMode::Pipelined => {
                let next = self.next_slot(&current);
                self.frame_resources.get(next).map_or(0, |r| r.fence_value)
            }
        };

        let wait = fence.wait(value, self.context.options().fence_timeout)?;
        self.frame_resources.update_availability(wait.completed_after);
        self.trace.push(FrameEvent::Wait {
            frame: self.frame_number,
            value,
            completed: wait.completed_after,
            blocked: wait.blocked,
        });
        Ok(wait)
    }

    /// 重置下一帧的记录器
    ///
    /// 记录器上一次提交的工作未完成时返回 `ResetBeforeRetire`。
    pub fn reset_for_next_frame(&mut self) -> Result<()> {
        let current = self.in_flight("reset_for_next_frame")?;
        let slot = self.next_slot(&current);
        let fence = self.context.fence();
        let recorder = &mut self.recorders[slot];
        let required = recorder.retire_value();

        match recorder.state() {
            RecorderState::Recording => {}
            _ => recorder.reset(fence, self.pipeline.as_ref())?,
        }

        self.trace.push(FrameEvent::Reset {
            frame: self.frame_number,
            slot,
            required,
            completed: fence.completed_value(),
        });
        self.context.collect_retired();
        Ok(())
    }

    /// 呈现当前后缓冲
    pub fn present(&mut self) -> Result<()> {
        let current = self.in_flight("present")?;
        self.context.queue().present(&mut self.swap_chain, self.sync_interval)?;
        self.trace.push(FrameEvent::Present {
            frame: self.frame_number,
            target: current.target,
        });
        self.current = None;
        self.frame_number += 1;
        Ok(())
    }

    /// 完整的一帧
    ///
    /// 出错时放弃当前帧：未提交的命令被丢弃，错误原样返回，
    /// 由调用方根据 [`GpuError::severity`] 决定是否退出。
    pub fn render_frame<F>(&mut self, record: F) -> Result<FrameReport>
    where
        F: FnOnce(&mut FrameRecording<'_, B>) -> Result<()>,
    {
        let start = Instant::now();
        let span = log::frame_span(self.frame_number, self.swap_chain.current_index());
        let _entered = span.enter();
        let result = self.run_frame(record);
        match result {
            Ok((target, fence_value, wait, commands)) => {
                let report = FrameReport {
                    frame_number: self.frame_number,
                    target_index: target,
                    fence_value,
                    wait,
                    commands,
                    cpu_time: start.elapsed(),
                };
                tracing::trace!(
                    frame = report.frame_number,
                    target,
                    fence = fence_value,
                    blocked = wait.blocked,
                    "Frame complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.abort_frame();
                Err(e)
            }
        }
    }

    fn run_frame<F>(&mut self, record: F) -> Result<(u32, u64, FenceWait, usize)>
    where
        F: FnOnce(&mut FrameRecording<'_, B>) -> Result<()>,
    {
        let target = self.acquire_target();
        self.record_commands(target, record)?;
        let commands = self.current.map_or(0, |c| self.recorders[c.slot].len());
        let fence_value = self.submit_and_signal()?;
        let wait = self.wait_for_gpu()?;
        self.reset_for_next_frame()?;
        self.present()?;
        Ok((target, fence_value, wait, commands))
    }

    /// 放弃当前帧
    fn abort_frame(&mut self) {
        if let Some(current) = self.current.take() {
            let recorder = &mut self.recorders[current.slot];
            if recorder.state() == RecorderState::Closed {
                if let Err(e) = recorder.discard() {
                    crate::engine_warn!("Failed to discard aborted frame: {}", e);
                }
            }
        }
        self.trace.push(FrameEvent::Abort {
            frame: self.frame_number,
        });
        crate::engine_warn!(frame = self.frame_number, "Frame aborted");
    }

    /// 调整交换链大小
    ///
    /// 先排空 GPU，再重置所有已完成的记录器以释放后缓冲引用，最后重建后缓冲。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == self.swap_chain.width() && height == self.swap_chain.height() {
            return Ok(());
        }
        self.context.flush()?;

        let fence = self.context.fence();
        for recorder in &mut self.recorders {
            match recorder.state() {
                RecorderState::Submitted => recorder.reset(fence, self.pipeline.as_ref())?,
                RecorderState::Closed => recorder.discard()?,
                _ => {}
            }
        }
        self.frame_resources.update_availability(fence.completed_value());
        self.current = None;

        self.swap_chain.resize(self.context.queue(), width, height)
    }

    /// 等待所有在途帧完成
    pub fn flush(&mut self) -> Result<FenceWait> {
        let wait = self.context.flush()?;
        self.frame_resources.update_availability(wait.completed_after);
        Ok(wait)
    }
}

impl<B: GpuDevice> Drop for FrameSynchronizer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.context.flush() {
            crate::engine_error!("Failed to flush frames on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorSeverity;
    use crate::core::FramePipelineError;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::context::ContextOptions;
    use crate::renderer::swapchain::SwapChainDesc;

    const YELLOW: [f32; 4] = [1.0, 1.0, 0.0, 1.0];

    fn synchronizer(mode: SyncMode, buffers: u32) -> FrameSynchronizer<SoftwareDevice> {
        let options = ContextOptions {
            track_resource_states: true,
            fence_timeout: Some(Duration::from_secs(5)),
            ..ContextOptions::default()
        };
        let context = Arc::new(GpuContext::new(Arc::new(SoftwareDevice::new()), options).unwrap());
        let swap_chain = context.create_swap_chain(SwapChainDesc::new(8, 8, buffers), None).unwrap();
        FrameSynchronizer::new(context, swap_chain, mode).unwrap()
    }

    #[test]
    fn test_five_clear_frames() {
        let mut frames = synchronizer(SyncMode::FullDrain, 2);
        for k in 1..=5u64 {
            let report = frames.render_frame(|f| f.clear(YELLOW)).unwrap();
            assert_eq!(report.fence_value, k);
            assert!(report.wait.completed_after >= k);
        }

        let context = frames.context().clone();
        assert_eq!(context.fence().last_signaled(), 5);
        assert_eq!(context.fence().completed_value(), 5);
        assert_eq!(frames.frame_number(), 5);

        let device = context.device();
        let snapshot = device.snapshot();
        assert_eq!(snapshot.validation_errors(), 0, "{:?}", snapshot.messages);
        assert_eq!(snapshot.clears, 5);
        for index in 0..2 {
            let pixels = device.contents(frames.swap_chain().back_buffer(index).unwrap().raw());
            assert!(pixels.chunks(4).all(|p| p == [255, 255, 0, 255]));
        }
    }

    #[test]
    fn test_trace_properties_full_drain() {
        let mut frames = synchronizer(SyncMode::FullDrain, 2);
        for _ in 0..4 {
            frames.render_frame(|f| f.clear(YELLOW)).unwrap();
        }
        let trace = frames.trace();
        assert!(trace.check_reset_after_wait());
        assert!(trace.signals_strictly_increase());
        assert!(trace.waits_reached_target());
        // 全排空：每帧都等待本帧的值
        let waits: Vec<u64> = trace
            .events()
            .filter_map(|e| match e {
                FrameEvent::Wait { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pipelined_waits_for_previous_use_of_slot() {
        let mut frames = synchronizer(SyncMode::Pipelined, 2);
        let mut targets = Vec::new();
        for _ in 0..4 {
            targets.push(frames.render_frame(|f| f.clear(YELLOW)).unwrap().target_index);
        }
        assert_eq!(targets, vec![0, 1, 0, 1]);

        let waits: Vec<u64> = frames
            .trace()
            .events()
            .filter_map(|e| match e {
                FrameEvent::Wait { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        // 第 k 帧只等待第 k-1 帧的值
        assert_eq!(waits, vec![0, 1, 2, 3]);
        assert!(frames.trace().check_reset_after_wait());

        let wait = frames.flush().unwrap();
        assert!(wait.completed_after >= 4);
        assert_eq!(frames.context().device().snapshot().validation_errors(), 0);
    }

    #[test]
    fn test_record_error_discards_frame() {
        let mut frames = synchronizer(SyncMode::FullDrain, 2);
        let err = frames
            .render_frame(|_| Err(GpuError::SubmissionFailed("mesh missing".into()).into()))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(frames.trace().events().last(), Some(FrameEvent::Abort { .. })));
        assert_eq!(frames.recorder_state(0), Some(RecorderState::Recording));

        // 下一帧正常
        let report = frames.render_frame(|f| f.clear(YELLOW)).unwrap();
        assert_eq!(report.fence_value, 1);
        assert_eq!(report.target_index, 0);
    }

    #[test]
    fn test_device_removed_is_fatal() {
        let mut frames = synchronizer(SyncMode::FullDrain, 2);
        frames.render_frame(|f| f.clear(YELLOW)).unwrap();
        frames.context().device().simulate_device_removed("hung");

        let err = frames.render_frame(|f| f.clear(YELLOW)).unwrap_err();
        match err {
            FramePipelineError::Graphics(e) => assert_eq!(e.severity(), ErrorSeverity::Fatal),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_steps_out_of_order_rejected() {
        let mut frames = synchronizer(SyncMode::FullDrain, 2);
        assert!(frames.submit_and_signal().is_err());
        assert!(frames.present().is_err());
    }

    #[test]
    fn test_resize_recreates_targets() {
        let mut frames = synchronizer(SyncMode::Pipelined, 2);
        frames.render_frame(|f| f.clear(YELLOW)).unwrap();
        frames.render_frame(|f| f.clear(YELLOW)).unwrap();

        frames.resize(16, 4).unwrap();
        assert_eq!(frames.swap_chain().width(), 16);
        assert_eq!(frames.swap_chain().current_index(), 0);

        let report = frames.render_frame(|f| f.clear(YELLOW)).unwrap();
        assert_eq!(report.target_index, 0);
        assert_eq!(frames.context().device().snapshot().validation_errors(), 0);
    }
}
