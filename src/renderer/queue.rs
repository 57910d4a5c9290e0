//! 提交队列
//!
//! 单一的直接命令队列：按提交顺序执行已关闭的命令记录器，
//! 通过 fence 暴露 GPU 进度，并负责呈现。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{CommandRecorder, RecorderState};
use crate::renderer::resource::{Resource, ResourceId, ResourceState};
use crate::renderer::state::ResourceStateTracker;
use crate::renderer::swapchain::SwapChain;
use crate::renderer::sync::{Fence, FenceWait};

/// 提交队列
pub struct SubmissionQueue<B: GpuDevice> {
    raw: B::Queue,
    device: Arc<B>,
    /// 提交时检查屏障的前置状态
    tracker: Mutex<ResourceStateTracker<B>>,
}

impl<B: GpuDevice> fmt::Debug for SubmissionQueue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("backend", &self.device.backend_name())
            .field("track_resource_states", &self.tracker.lock().is_enabled())
            .finish()
    }
}

impl<B: GpuDevice> SubmissionQueue<B> {
    /// 创建直接命令队列
    pub fn new(device: &Arc<B>, track_resource_states: bool) -> Result<Self> {
        let raw = device.create_queue()?;
        Ok(Self {
            raw,
            device: Arc::clone(device),
            tracker: Mutex::new(ResourceStateTracker::new(track_resource_states)),
        })
    }

    pub fn raw(&self) -> &B::Queue {
        &self.raw
    }

    /// 按顺序提交已关闭的记录器
    ///
    /// 任何一个记录器不是 `Closed`，或者屏障声明与跟踪到的状态不符时，
    /// 整批都不提交。
    pub fn submit(&self, recorders: &mut [&mut CommandRecorder<B>]) -> Result<()> {
        for recorder in recorders.iter() {
            if recorder.state() != RecorderState::Closed {
                return Err(GpuError::InvalidRecorderState {
                    operation: "submit",
                    state: recorder.state(),
                }
                .into());
            }
        }

        // 先检查，执行成功后才写入跟踪状态
        let mut tracker = self.tracker.lock();
        let pending = tracker.validate_commands(
            recorders
                .iter()
                .filter_map(|r| r.recorded())
                .flat_map(|commands| commands.iter()),
        )?;

        let lists: Vec<&B::CommandList> = recorders.iter().map(|r| r.raw()).collect();
        self.device.execute(&self.raw, &lists)?;
        tracker.commit(pending);
        drop(tracker);

        for recorder in recorders.iter_mut() {
            recorder.mark_submitted()?;
        }

        tracing::trace!(lists = recorders.len(), "Command lists submitted");
        Ok(())
    }

    /// 在之前提交的所有工作之后排入 fence 信号
    pub fn signal(&self, fence: &Fence<B>, value: u64) -> Result<()> {
        fence.record_signal(value)?;
        self.device.signal(&self.raw, fence.raw(), value)?;
        tracing::trace!(fence = value, "Fence signal queued");
        Ok(())
    }

    /// 以 `last_signaled + 1` 排入 fence 信号，返回该值
    pub fn signal_next(&self, fence: &Fence<B>) -> Result<u64> {
        let value = fence.last_signaled() + 1;
        self.signal(fence, value)?;
        Ok(value)
    }

    /// 呈现交换链的当前后缓冲
    ///
    /// 不等待 GPU。跟踪开启时，后缓冲必须已经转换回 `Present`。
    pub fn present(&self, swap_chain: &mut SwapChain<B>, sync_interval: u32) -> Result<()> {
        let index = swap_chain.current_index();
        {
            let tracker = self.tracker.lock();
            if tracker.is_enabled() {
                let buffer = swap_chain.back_buffer(index)?;
                let tracked = tracker.state_of(buffer.id()).unwrap_or(buffer.initial_state());
                if tracked != ResourceState::Present {
                    return Err(GpuError::ResourceStateMismatch {
                        resource: buffer.name().to_string(),
                        declared: ResourceState::Present,
                        tracked,
                    }
                    .into());
                }
            }
        }

        self.device.present(&self.raw, swap_chain.raw_mut(), sync_interval)?;
        tracing::trace!(back_buffer = index, sync_interval, "Presented");
        Ok(())
    }

    /// 排入信号并等待 GPU 空闲
    pub fn flush(&self, fence: &Fence<B>, timeout: Option<Duration>) -> Result<FenceWait> {
        let value = self.signal_next(fence)?;
        fence.wait(value, timeout)
    }

    /// 登记资源的当前状态
    pub fn register_state(&self, resource: &Resource<B>, state: ResourceState) {
        self.tracker.lock().register(resource, state);
    }

    pub fn forget_state(&self, id: ResourceId) {
        self.tracker.lock().forget(id);
    }

    /// 跟踪到的资源状态
    pub fn tracked_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.tracker.lock().state_of(id)
    }

    /// 清除已释放资源后仍被跟踪的资源数量
    pub fn tracked_resources(&self) -> usize {
        let mut tracker = self.tracker.lock();
        tracker.prune();
        tracker.len()
    }

    pub fn tracks_resource_states(&self) -> bool {
        self.tracker.lock().is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FramePipelineError;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::resource::{HeapKind, ResourceDesc};

    fn setup() -> (Arc<SoftwareDevice>, SubmissionQueue<SoftwareDevice>, Fence<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        let fence = Fence::new(&device, 0).unwrap();
        (device, queue, fence)
    }

    #[test]
    fn test_submit_requires_closed_recorder() {
        let (device, queue, fence) = setup();
        let mut recorder = CommandRecorder::new(&device, "main", 8).unwrap();
        recorder.reset(&fence, None).unwrap();

        let err = queue.submit(&mut [&mut recorder]).unwrap_err();
        assert!(matches!(
            err,
            FramePipelineError::Graphics(GpuError::InvalidRecorderState {
                operation: "submit",
                state: RecorderState::Recording
            })
        ));
    }

    #[test]
    fn test_fifo_execution_and_fence_progress() {
        let (device, queue, fence) = setup();
        let src = Resource::create(&device, ResourceDesc::upload_buffer("src", 16)).unwrap();
        let dst = Resource::create(
            &device,
            ResourceDesc::buffer("dst", 16, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();
        let readback = Resource::create(&device, ResourceDesc::readback_buffer("readback", 16)).unwrap();
        src.upload(0, &[7u8; 16]).unwrap();

        // 两个列表：先复制进 dst，再从 dst 复制到回读缓冲
        let mut first = CommandRecorder::new(&device, "first", 8).unwrap();
        first.reset(&fence, None).unwrap();
        first.copy_buffer_region(&dst, 0, &src, 0, 16).unwrap();
        first.transition(&dst, ResourceState::CopyDest, ResourceState::CopySource).unwrap();
        first.close().unwrap();

        let mut second = CommandRecorder::new(&device, "second", 8).unwrap();
        second.reset(&fence, None).unwrap();
        second.copy_buffer_region(&readback, 0, &dst, 0, 16).unwrap();
        second.close().unwrap();

        queue.submit(&mut [&mut first, &mut second]).unwrap();
        let value = queue.signal_next(&fence).unwrap();
        first.retire_at(value);
        second.retire_at(value);
        assert_eq!(value, 1);

        let wait = fence.wait(value, None).unwrap();
        assert!(wait.completed_after >= value);
        assert_eq!(queue.tracked_state(dst.id()), Some(ResourceState::CopySource));

        let mapped = readback.map().unwrap();
        assert_eq!(mapped.to_vec().unwrap(), vec![7u8; 16]);
        drop(mapped);

        // 完成之后才可以 reset
        first.reset(&fence, None).unwrap();
        assert_eq!(device.snapshot().validation_errors(), 0);
    }

    #[test]
    fn test_mismatched_barrier_rejects_whole_batch() {
        let (device, queue, fence) = setup();
        let buffer = Resource::create(
            &device,
            ResourceDesc::buffer("dst", 16, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();

        let mut recorder = CommandRecorder::new(&device, "main", 8)
            .unwrap()
            .with_barrier_validation(false);
        recorder.reset(&fence, None).unwrap();
        recorder
            .transition(&buffer, ResourceState::GenericRead, ResourceState::CopySource)
            .unwrap();
        recorder.close().unwrap();

        let err = queue.submit(&mut [&mut recorder]).unwrap_err();
        assert!(matches!(
            err,
            FramePipelineError::Graphics(GpuError::ResourceStateMismatch {
                declared: ResourceState::GenericRead,
                tracked: ResourceState::CopyDest,
                ..
            })
        ));
        assert_eq!(recorder.state(), RecorderState::Closed);
    }

    #[test]
    fn test_failed_execute_leaves_tracked_state() {
        let (device, queue, fence) = setup();
        let buffer = Resource::create(
            &device,
            ResourceDesc::buffer("dst", 16, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();
        queue.register_state(&buffer, ResourceState::CopyDest);

        let mut recorder = CommandRecorder::new(&device, "main", 8).unwrap();
        recorder.reset(&fence, None).unwrap();
        recorder
            .transition(&buffer, ResourceState::CopyDest, ResourceState::CopySource)
            .unwrap();
        recorder.close().unwrap();

        device.simulate_device_removed("TDR");
        let err = queue.submit(&mut [&mut recorder]).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(queue.tracked_state(buffer.id()), Some(ResourceState::CopyDest));
        assert_eq!(recorder.state(), RecorderState::Closed);
    }

    #[test]
    fn test_released_resources_leave_tracker() {
        let (device, queue, fence) = setup();
        let mut ids = Vec::new();
        for _ in 0..8 {
            let buffer = Resource::create(
                &device,
                ResourceDesc::buffer("temp", 16, HeapKind::Default, ResourceState::CopyDest),
            )
            .unwrap();
            let mut recorder = CommandRecorder::new(&device, "main", 8).unwrap();
            recorder.reset(&fence, None).unwrap();
            recorder
                .transition(&buffer, ResourceState::CopyDest, ResourceState::GenericRead)
                .unwrap();
            recorder.close().unwrap();
            queue.submit(&mut [&mut recorder]).unwrap();
            let value = queue.signal_next(&fence).unwrap();
            recorder.retire_at(value);
            fence.wait(value, None).unwrap();
            ids.push(buffer.id());
        }

        // 时间线执行完后释放命令列表，资源的最后一个句柄随之释放
        queue.flush(&fence, None).unwrap();
        assert!(ids.iter().all(|id| queue.tracked_state(*id).is_none()));
        assert_eq!(queue.tracked_resources(), 0);
    }

    #[test]
    fn test_signal_must_increase() {
        let (_device, queue, fence) = setup();
        queue.signal(&fence, 3).unwrap();
        assert!(queue.signal(&fence, 3).is_err());
        assert_eq!(queue.signal_next(&fence).unwrap(), 4);
        let wait = queue.flush(&fence, None).unwrap();
        assert_eq!(wait.value, 5);
        assert!(fence.completed_value() >= 5);
    }
}
