//! GPU 同步机制模块
//!
//! 提供 CPU-GPU 同步原语：fence、fence 事件，以及按 fence 值延迟释放资源的队列。
//!
//! # 使用场景
//!
//! 1. **帧同步**：确保 GPU 完成前一帧才重置命令分配器
//! 2. **资源更新**：确保资源在 CPU 重写之前已不再被 GPU 读取
//! 3. **延迟释放**：被在途命令引用的资源等到 fence 完成后再释放

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for FenceValue {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 一次等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceWait {
    /// 等待的目标值
    pub value: u64,
    /// 开始等待前 GPU 已完成的值
    pub completed_before: u64,
    /// 等待之后的完成值
    pub completed_after: u64,
    /// 是否真的阻塞了线程
    pub blocked: bool,
}

/// Fence
///
/// 包装后端 fence 与一个复用的等待事件。CPU 侧记录最后一次 signal 的值。
pub struct Fence<B: GpuDevice> {
    raw: B::Fence,
    event: B::Event,
    last_signaled: AtomicU64,
    device: Arc<B>,
}

impl<B: GpuDevice> fmt::Debug for Fence<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("last_signaled", &self.last_signaled())
            .field("completed", &self.completed_value())
            .finish()
    }
}

impl<B: GpuDevice> Fence<B> {
    /// 创建 fence，初始值通常为 0
    pub fn new(device: &Arc<B>, initial_value: u64) -> Result<Self> {
        let raw = device.create_fence(initial_value)?;
        let event = device.create_event()?;
        Ok(Self {
            raw,
            event,
            last_signaled: AtomicU64::new(initial_value),
            device: Arc::clone(device),
        })
    }

    pub fn raw(&self) -> &B::Fence {
        &self.raw
    }

    /// GPU 已完成的值
    pub fn completed_value(&self) -> u64 {
        self.device.completed_value(&self.raw)
    }

    /// 最后一次排入队列的 signal 值
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled.load(Ordering::Acquire)
    }

    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// 记录新的 signal 值，必须严格递增
    pub(crate) fn record_signal(&self, value: u64) -> std::result::Result<(), GpuError> {
        let previous = self.last_signaled.fetch_max(value, Ordering::AcqRel);
        if value <= previous {
            return Err(GpuError::SubmissionFailed(format!(
                "fence value {} is not greater than previously signaled {}",
                value, previous
            )));
        }
        Ok(())
    }

    /// 阻塞直到 fence 达到 `value`
    ///
    /// 已经完成时不阻塞。`timeout` 为 None 时无限等待；超时返回 `FenceWaitTimeout`。
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<FenceWait> {
        let completed_before = self.completed_value();
        if completed_before >= value {
            return Ok(FenceWait {
                value,
                completed_before,
                completed_after: completed_before,
                blocked: false,
            });
        }

        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        let completed_after = loop {
            self.device.set_event_on_completion(&self.raw, value, &self.event)?;
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let signaled = self.device.wait_event(&self.event, remaining)?;
            let completed = self.completed_value();
            if completed >= value {
                break completed;
            }
            // 事件可能来自之前一次超时等待的残留信号
            if !signaled || deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(GpuError::FenceWaitTimeout {
                    value,
                    completed,
                    timeout_ms: timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
                }
                .into());
            }
        };

        tracing::debug!(
            fence = value,
            waited_us = start.elapsed().as_micros() as u64,
            "Waited for GPU fence"
        );

        Ok(FenceWait {
            value,
            completed_before,
            completed_after,
            blocked: true,
        })
    }

    /// 等待最后一次 signal 的值
    pub fn wait_for_last(&self, timeout: Option<Duration>) -> Result<FenceWait> {
        self.wait(self.last_signaled(), timeout)
    }
}

/// 延迟释放队列
///
/// 被在途命令列表引用的对象在 fence 达到指定值之后才真正释放。
#[derive(Default)]
pub struct DeferredDeletionQueue {
    pending: VecDeque<(u64, Box<dyn Any + Send>)>,
}

impl fmt::Debug for DeferredDeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDeletionQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl DeferredDeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 fence 达到 `fence_value` 之后释放 `item`
    pub fn retire<T: Send + 'static>(&mut self, fence_value: u64, item: T) {
        // fence 值单调递增，按值插入保持队列有序
        let position = self
            .pending
            .iter()
            .position(|(v, _)| *v > fence_value)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, (fence_value, Box::new(item)));
    }

    /// 释放所有已经安全的对象，返回释放数量
    pub fn collect(&mut self, completed_value: u64) -> usize {
        let mut released = 0;
        while let Some((value, _)) = self.pending.front() {
            if *value > completed_value {
                break;
            }
            self.pending.pop_front();
            released += 1;
        }
        if released > 0 {
            tracing::trace!(released, completed_value, "Retired deferred resources");
        }
        released
    }

    /// 无条件释放全部对象，只能在 GPU 空闲后调用
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareDevice;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fence_value() {
        let value = FenceValue::new(3);
        assert_eq!(value.next().value(), 4);
        assert!(FenceValue::from(2) < value);
        assert_eq!(value.to_string(), "3");
    }

    #[test]
    fn test_wait_on_completed_value_does_not_block() {
        let device = Arc::new(SoftwareDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        let wait = fence.wait(0, None).unwrap();
        assert!(!wait.blocked);
        assert_eq!(wait.completed_after, 0);
    }

    #[test]
    fn test_wait_timeout() {
        let device = Arc::new(SoftwareDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        // 值 7 永远不会被 signal
        let err = fence.wait(7, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(
            err,
            crate::core::FramePipelineError::Graphics(GpuError::FenceWaitTimeout {
                value: 7,
                completed: 0,
                timeout_ms: 10
            })
        ));
    }

    #[test]
    fn test_signal_values_must_increase() {
        let device = Arc::new(SoftwareDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        fence.record_signal(1).unwrap();
        fence.record_signal(2).unwrap();
        assert!(fence.record_signal(2).is_err());
        assert_eq!(fence.last_signaled(), 2);
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deferred_deletion() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut queue = DeferredDeletionQueue::new();
        queue.retire(2, DropCounter(drops.clone()));
        queue.retire(1, DropCounter(drops.clone()));
        queue.retire(3, DropCounter(drops.clone()));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.collect(0), 0);
        assert_eq!(queue.collect(2), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
