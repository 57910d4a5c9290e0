//! 交换链
//!
//! N 个可呈现后缓冲组成的环，当前索引由呈现推进。
//! 每个后缓冲在 RTV 堆中占一个槽位，创建时处于 `Present` 状态。

use std::fmt;
use std::sync::Arc;

use raw_window_handle::RawWindowHandle;

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{ScissorRect, Viewport};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorIncrements, ViewDesc};
use crate::renderer::queue::SubmissionQueue;
use crate::renderer::resource::{Format, HeapKind, Resource, ResourceDesc, ResourceState};

/// 交换链描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
}

impl SwapChainDesc {
    pub fn new(width: u32, height: u32, buffer_count: u32) -> Self {
        Self {
            width,
            height,
            format: Format::Rgba8Unorm,
            buffer_count,
        }
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), GpuError> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::AllocationFailed(format!(
                "swap chain size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !(2..=3).contains(&self.buffer_count) {
            return Err(GpuError::AllocationFailed(format!(
                "swap chain needs 2 or 3 buffers, got {}",
                self.buffer_count
            )));
        }
        Ok(())
    }

    pub(crate) fn back_buffer_desc(&self, index: u32) -> ResourceDesc {
        ResourceDesc::texture2d(
            format!("BackBuffer[{}]", index),
            self.width,
            self.height,
            self.format,
            HeapKind::Default,
            ResourceState::Present,
        )
        .with_render_target()
    }
}

/// 交换链
pub struct SwapChain<B: GpuDevice> {
    raw: B::SwapChain,
    desc: SwapChainDesc,
    back_buffers: Vec<Resource<B>>,
    rtv_heap: Arc<DescriptorHeap<B>>,
    device: Arc<B>,
}

impl<B: GpuDevice> fmt::Debug for SwapChain<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapChain")
            .field("desc", &self.desc)
            .field("current_index", &self.current_index())
            .finish()
    }
}

impl<B: GpuDevice> SwapChain<B> {
    /// 创建交换链、RTV 堆以及每个后缓冲的渲染目标视图
    pub fn create(
        device: &Arc<B>,
        queue: &SubmissionQueue<B>,
        increments: &DescriptorIncrements,
        desc: SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> Result<Self> {
        desc.validate()?;
        let raw = device.create_swap_chain(queue.raw(), &desc, window)?;
        let rtv_heap = DescriptorHeap::create(device, DescriptorHeapDesc::rtv(desc.buffer_count), increments)?;

        let mut swap_chain = Self {
            raw,
            desc,
            back_buffers: Vec::with_capacity(desc.buffer_count as usize),
            rtv_heap,
            device: Arc::clone(device),
        };
        swap_chain.create_back_buffers(queue)?;

        tracing::info!(
            width = desc.width,
            height = desc.height,
            buffers = desc.buffer_count,
            "Swap chain created"
        );
        Ok(swap_chain)
    }

    fn create_back_buffers(&mut self, queue: &SubmissionQueue<B>) -> Result<()> {
        for index in 0..self.desc.buffer_count {
            let raw = self.device.back_buffer(&self.raw, index)?;
            let buffer = Resource::from_raw(&self.device, self.desc.back_buffer_desc(index), raw);
            self.rtv_heap
                .write_view(index, &buffer, &ViewDesc::RenderTarget { format: self.desc.format })?;
            queue.register_state(&buffer, ResourceState::Present);
            self.back_buffers.push(buffer);
        }
        Ok(())
    }

    pub fn raw(&self) -> &B::SwapChain {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut B::SwapChain {
        &mut self.raw
    }

    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    /// 当前后缓冲索引（只读查询，不产生 GPU 工作）
    pub fn current_index(&self) -> u32 {
        self.device.current_back_buffer_index(&self.raw)
    }

    pub fn back_buffer(&self, index: u32) -> Result<&Resource<B>> {
        // 重建失败后没有可用的后缓冲，之后的每一帧都无法继续
        if self.back_buffers.len() as u32 != self.desc.buffer_count {
            return Err(GpuError::PresentFailed(format!(
                "swap chain holds {} of {} back buffers",
                self.back_buffers.len(),
                self.desc.buffer_count
            ))
            .into());
        }
        self.back_buffers.get(index as usize).ok_or_else(|| {
            GpuError::DescriptorOutOfRange {
                slot: index,
                capacity: self.desc.buffer_count,
            }
            .into()
        })
    }

    /// 后缓冲的 RTV 句柄
    pub fn rtv(&self, index: u32) -> Result<CpuDescriptorHandle> {
        self.rtv_heap.handle_at(index)
    }

    pub fn rtv_heap(&self) -> &Arc<DescriptorHeap<B>> {
        &self.rtv_heap
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::from_size(self.desc.width, self.desc.height)
    }

    pub fn scissor(&self) -> ScissorRect {
        ScissorRect::from_size(self.desc.width, self.desc.height)
    }

    /// 调整大小并重建后缓冲与 RTV
    ///
    /// 调用前 GPU 必须空闲，并且除交换链外没有其它地方持有后缓冲句柄。
    /// 后端调整失败时按原尺寸重新取回后缓冲；连原缓冲也取不回时返回致命错误。
    pub fn resize(&mut self, queue: &SubmissionQueue<B>, width: u32, height: u32) -> Result<()> {
        let desc = SwapChainDesc { width, height, ..self.desc };
        desc.validate()?;

        self.release_back_buffers(queue);

        if let Err(e) = self.device.resize_swap_chain(&mut self.raw, width, height) {
            crate::engine_warn!(width, height, error = %e, "Swap chain resize failed, restoring previous back buffers");
            self.rebuild_back_buffers(queue)?;
            return Err(e.into());
        }
        self.desc = desc;
        self.rebuild_back_buffers(queue)?;

        tracing::info!(width, height, "Swap chain resized");
        Ok(())
    }

    fn release_back_buffers(&mut self, queue: &SubmissionQueue<B>) {
        for buffer in self.back_buffers.drain(..) {
            queue.forget_state(buffer.id());
            if buffer.handle_count() > 2 {
                tracing::warn!(
                    buffer = %buffer.name(),
                    handles = buffer.handle_count(),
                    "Back buffer still referenced during resize"
                );
            }
        }
        self.rtv_heap.clear();
    }

    /// 按当前描述取回全部后缓冲，要么全部成功，要么一个不留
    fn rebuild_back_buffers(&mut self, queue: &SubmissionQueue<B>) -> Result<()> {
        if let Err(e) = self.create_back_buffers(queue) {
            self.release_back_buffers(queue);
            crate::engine_error!(error = %e, "Swap chain back buffers are unavailable");
            return Err(GpuError::PresentFailed(format!("failed to acquire swap chain back buffers: {}", e)).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareDevice;

    fn create(device: &Arc<SoftwareDevice>, queue: &SubmissionQueue<SoftwareDevice>, desc: SwapChainDesc) -> Result<SwapChain<SoftwareDevice>> {
        SwapChain::create(device, queue, &DescriptorIncrements::query(device.as_ref()), desc, None)
    }

    #[test]
    fn test_create_swap_chain() {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        let swap_chain = create(&device, &queue, SwapChainDesc::new(8, 4, 2)).unwrap();

        assert_eq!(swap_chain.current_index(), 0);
        assert_eq!(swap_chain.buffer_count(), 2);
        let buffer = swap_chain.back_buffer(1).unwrap();
        assert_eq!(queue.tracked_state(buffer.id()), Some(ResourceState::Present));
        assert!(swap_chain.back_buffer(2).is_err());

        let rtv0 = swap_chain.rtv(0).unwrap();
        let rtv1 = swap_chain.rtv(1).unwrap();
        assert_eq!(rtv1.ptr - rtv0.ptr, swap_chain.rtv_heap().increment() as usize);
        assert_eq!(swap_chain.viewport().width, 8.0);
        assert_eq!(swap_chain.scissor().bottom, 4);
    }

    #[test]
    fn test_invalid_desc() {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        assert!(create(&device, &queue, SwapChainDesc::new(0, 4, 2)).is_err());
        assert!(create(&device, &queue, SwapChainDesc::new(4, 4, 4)).is_err());
    }

    #[test]
    fn test_resize_recreates_buffers() {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        let mut swap_chain = create(&device, &queue, SwapChainDesc::new(8, 4, 2)).unwrap();
        let old_id = swap_chain.back_buffer(0).unwrap().id();

        swap_chain.resize(&queue, 16, 16).unwrap();
        let buffer = swap_chain.back_buffer(0).unwrap();
        assert_ne!(buffer.id(), old_id);
        assert_eq!(buffer.size_bytes(), 16 * 16 * 4);
        assert_eq!(queue.tracked_state(old_id), None);
        assert_eq!(queue.tracked_state(buffer.id()), Some(ResourceState::Present));
    }

    #[test]
    fn test_failed_resize_keeps_previous_buffers() {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        let mut swap_chain = create(&device, &queue, SwapChainDesc::new(8, 4, 2)).unwrap();

        device.simulate_device_removed("TDR");
        assert!(swap_chain.resize(&queue, 16, 16).is_err());

        assert_eq!(swap_chain.width(), 8);
        for index in 0..2 {
            let buffer = swap_chain.back_buffer(index).unwrap();
            assert_eq!(buffer.size_bytes(), 8 * 4 * 4);
            assert_eq!(queue.tracked_state(buffer.id()), Some(ResourceState::Present));
            assert!(swap_chain.rtv(index).is_ok());
        }
    }

    #[test]
    fn test_missing_back_buffers_are_fatal() {
        let device = Arc::new(SoftwareDevice::new());
        let queue = SubmissionQueue::new(&device, true).unwrap();
        let mut swap_chain = create(&device, &queue, SwapChainDesc::new(8, 4, 2)).unwrap();

        swap_chain.release_back_buffers(&queue);
        let err = swap_chain.back_buffer(0).unwrap_err();
        assert!(err.is_fatal());
    }
}
