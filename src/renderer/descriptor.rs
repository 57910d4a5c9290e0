//! 描述符管理模块
//!
//! 描述符堆是固定容量、单一类型的视图数组。槽位的句柄由
//! `起始句柄 + 槽位 × 增量` 计算，增量由设备按堆类型给出，
//! 创建后缓存，不要在热路径上反复查询。
//!
//! # DirectX 12 描述符类型
//!
//! - **RTV** (Render Target View)：渲染目标视图，用于渲染输出
//! - **DSV** (Depth Stencil View)：深度模板视图，用于深度测试
//! - **CBV** (Constant Buffer View)：常量缓冲视图，用于着色器常量
//! - **SRV** (Shader Resource View)：着色资源视图，用于着色器读取纹理/缓冲
//! - **UAV** (Unordered Access View)：无序访问视图，用于计算着色器读写
//!
//! CBV/SRV/UAV 共用同一种堆。只有 CBV/SRV/UAV 与采样器堆可以着色器可见。

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::resource::{Format, Resource, ResourceDimension, CONSTANT_BUFFER_ALIGNMENT};

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 渲染目标视图 (RTV)
    RenderTargetView,
    /// 深度模板视图 (DSV)
    DepthStencilView,
    /// 常量缓冲视图 (CBV)
    ConstantBufferView,
    /// 着色资源视图 (SRV)
    ShaderResourceView,
    /// 无序访问视图 (UAV)
    UnorderedAccessView,
    /// 采样器
    Sampler,
}

impl DescriptorType {
    /// 描述符类型是否可以放在着色器可见的堆中
    pub fn is_shader_visible(&self) -> bool {
        matches!(
            self,
            DescriptorType::ConstantBufferView
                | DescriptorType::ShaderResourceView
                | DescriptorType::UnorderedAccessView
                | DescriptorType::Sampler
        )
    }

    /// 获取描述符类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::RenderTargetView => "RTV",
            DescriptorType::DepthStencilView => "DSV",
            DescriptorType::ConstantBufferView => "CBV",
            DescriptorType::ShaderResourceView => "SRV",
            DescriptorType::UnorderedAccessView => "UAV",
            DescriptorType::Sampler => "Sampler",
        }
    }

    /// 描述符所在堆的类型
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self {
            DescriptorType::RenderTargetView => DescriptorHeapType::Rtv,
            DescriptorType::DepthStencilView => DescriptorHeapType::Dsv,
            DescriptorType::ConstantBufferView
            | DescriptorType::ShaderResourceView
            | DescriptorType::UnorderedAccessView => DescriptorHeapType::CbvSrvUav,
            DescriptorType::Sampler => DescriptorHeapType::Sampler,
        }
    }
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    Rtv,
    Dsv,
    CbvSrvUav,
    Sampler,
}

impl DescriptorHeapType {
    pub const ALL: [DescriptorHeapType; 4] = [
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
        DescriptorHeapType::CbvSrvUav,
        DescriptorHeapType::Sampler,
    ];

    /// 此类型的堆能否着色器可见
    pub fn can_be_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapDesc {
    /// 描述符类型
    pub descriptor_type: DescriptorType,
    /// 描述符数量
    pub num_descriptors: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDesc {
    /// 创建新的描述符堆描述
    pub fn new(descriptor_type: DescriptorType, num_descriptors: u32) -> Self {
        Self {
            descriptor_type,
            num_descriptors,
            shader_visible: false,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置着色器可见性
    pub fn with_shader_visible(mut self, visible: bool) -> Self {
        self.shader_visible = visible;
        self
    }

    /// 创建 RTV 堆描述
    pub fn rtv(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::RenderTargetView, num_descriptors).with_name("RTV Heap")
    }

    /// 创建 DSV 堆描述
    pub fn dsv(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::DepthStencilView, num_descriptors).with_name("DSV Heap")
    }

    /// 创建着色器可见的 SRV/CBV/UAV 堆描述
    pub fn srv_cbv_uav(num_descriptors: u32) -> Self {
        Self::new(DescriptorType::ShaderResourceView, num_descriptors)
            .with_shader_visible(true)
            .with_name("SRV/CBV/UAV Heap")
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.descriptor_type.heap_type()
    }

    fn validate(&self) -> std::result::Result<(), GpuError> {
        if self.num_descriptors == 0 {
            return Err(GpuError::AllocationFailed(
                "descriptor heap capacity must be greater than 0".into(),
            ));
        }
        if self.shader_visible && !self.heap_type().can_be_shader_visible() {
            return Err(GpuError::AllocationFailed(format!(
                "{} heaps cannot be shader visible",
                self.descriptor_type.name()
            )));
        }
        Ok(())
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
        }
    }
}

/// 资源视图描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDesc {
    /// 渲染目标视图
    RenderTarget { format: Format },
    /// 深度模板视图
    DepthStencil { format: Format },
    /// 2D 纹理的着色资源视图
    ShaderResource { format: Format },
    /// 常量缓冲视图，偏移和大小都按 256 字节对齐
    ConstantBuffer { offset: u64, size: u32 },
}

impl ViewDesc {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            ViewDesc::RenderTarget { .. } => DescriptorType::RenderTargetView,
            ViewDesc::DepthStencil { .. } => DescriptorType::DepthStencilView,
            ViewDesc::ShaderResource { .. } => DescriptorType::ShaderResourceView,
            ViewDesc::ConstantBuffer { .. } => DescriptorType::ConstantBufferView,
        }
    }

    /// 检查视图能否描述 `resource`
    fn check_resource<B: GpuDevice>(&self, resource: &Resource<B>) -> std::result::Result<(), GpuError> {
        let invalid = |reason: String| Err(GpuError::InvalidDescriptor(reason));
        let dimension = resource.desc().dimension;

        match (self, dimension) {
            (ViewDesc::RenderTarget { .. }, ResourceDimension::Texture2D { .. }) => {
                if !resource.desc().allow_render_target {
                    return invalid(format!("'{}' was not created as a render target", resource.name()));
                }
                Ok(())
            }
            (ViewDesc::DepthStencil { .. }, ResourceDimension::Texture2D { .. })
            | (ViewDesc::ShaderResource { .. }, ResourceDimension::Texture2D { .. }) => Ok(()),
            (ViewDesc::ConstantBuffer { offset, size }, ResourceDimension::Buffer { size: total }) => {
                if *size == 0
                    || *size as u64 % CONSTANT_BUFFER_ALIGNMENT != 0
                    || offset % CONSTANT_BUFFER_ALIGNMENT != 0
                {
                    return invalid(format!(
                        "constant buffer view ({} bytes at {}) must be 256-byte aligned",
                        size, offset
                    ));
                }
                if offset + *size as u64 > total {
                    return invalid(format!(
                        "constant buffer view exceeds '{}' ({} bytes)",
                        resource.name(),
                        total
                    ));
                }
                Ok(())
            }
            _ => invalid(format!(
                "{} view cannot describe '{}'",
                self.descriptor_type().name(),
                resource.name()
            )),
        }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    /// 描述符类型
    pub descriptor_type: DescriptorType,
    /// 总容量
    pub capacity: u32,
    /// 已写入视图的槽位数
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(descriptor_type: DescriptorType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            descriptor_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 启动时查询的描述符增量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorIncrements {
    pub rtv: u32,
    pub dsv: u32,
    pub cbv_srv_uav: u32,
    pub sampler: u32,
}

impl DescriptorIncrements {
    /// 向设备查询各类型堆的增量，只在启动时调用一次
    pub fn query<B: GpuDevice>(device: &B) -> Self {
        Self {
            rtv: device.descriptor_increment(DescriptorHeapType::Rtv),
            dsv: device.descriptor_increment(DescriptorHeapType::Dsv),
            cbv_srv_uav: device.descriptor_increment(DescriptorHeapType::CbvSrvUav),
            sampler: device.descriptor_increment(DescriptorHeapType::Sampler),
        }
    }

    pub fn get(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::Rtv => self.rtv,
            DescriptorHeapType::Dsv => self.dsv,
            DescriptorHeapType::CbvSrvUav => self.cbv_srv_uav,
            DescriptorHeapType::Sampler => self.sampler,
        }
    }
}

struct Slots<B: GpuDevice> {
    /// 每个槽位当前描述的资源，持有引用保证资源不先于描述符释放
    bound: Vec<Option<Resource<B>>>,
    /// 线性分配的下一个槽位
    next_free: u32,
}

/// 描述符堆
///
/// 写入视图只需要 `&self`，堆本身通常以 `Arc` 共享给命令记录器。
pub struct DescriptorHeap<B: GpuDevice> {
    raw: B::DescriptorHeap,
    desc: DescriptorHeapDesc,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    increment: u32,
    slots: Mutex<Slots<B>>,
    device: Arc<B>,
}

impl<B: GpuDevice> fmt::Debug for DescriptorHeap<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("type", &self.desc.descriptor_type)
            .field("capacity", &self.desc.num_descriptors)
            .field("shader_visible", &self.desc.shader_visible)
            .field("cpu_start", &self.cpu_start)
            .finish()
    }
}

impl<B: GpuDevice> DescriptorHeap<B> {
    /// 创建描述符堆，增量取自启动时缓存的值
    pub fn create(device: &Arc<B>, desc: DescriptorHeapDesc, increments: &DescriptorIncrements) -> Result<Arc<Self>> {
        desc.validate()?;
        let increment = increments.get(desc.heap_type());
        let raw = device.create_descriptor_heap(&desc)?;

        tracing::debug!(
            heap = desc.name.as_deref().unwrap_or("unnamed"),
            capacity = desc.num_descriptors,
            increment,
            "Descriptor heap created"
        );

        Ok(Arc::new(Self {
            raw: raw.heap,
            cpu_start: raw.cpu_start,
            gpu_start: raw.gpu_start,
            increment,
            slots: Mutex::new(Slots {
                bound: (0..desc.num_descriptors).map(|_| None).collect(),
                next_free: 0,
            }),
            desc,
            device: Arc::clone(device),
        }))
    }

    pub fn raw(&self) -> &B::DescriptorHeap {
        &self.raw
    }

    pub fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }

    pub fn capacity(&self) -> u32 {
        self.desc.num_descriptors
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.desc.heap_type()
    }

    pub fn is_shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    /// 描述符增量（创建时缓存）
    pub fn increment(&self) -> u32 {
        self.increment
    }

    fn check_slot(&self, slot: u32) -> std::result::Result<(), GpuError> {
        if slot >= self.capacity() {
            return Err(GpuError::DescriptorOutOfRange {
                slot,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// 槽位的 CPU 句柄
    pub fn handle_at(&self, slot: u32) -> Result<CpuDescriptorHandle> {
        self.check_slot(slot)?;
        Ok(self.cpu_start.offset(slot, self.increment))
    }

    /// 槽位的 GPU 句柄，仅着色器可见的堆可用
    pub fn gpu_handle_at(&self, slot: u32) -> Result<GpuDescriptorHandle> {
        self.check_slot(slot)?;
        let start = self.gpu_start.ok_or_else(|| {
            GpuError::InvalidDescriptor(format!(
                "{} heap is not shader visible",
                self.desc.descriptor_type.name()
            ))
        })?;
        Ok(start.offset(slot, self.increment))
    }

    /// 在槽位写入资源视图
    pub fn write_view(&self, slot: u32, resource: &Resource<B>, view: &ViewDesc) -> Result<CpuDescriptorHandle> {
        self.check_slot(slot)?;
        if view.descriptor_type().heap_type() != self.heap_type() {
            return Err(GpuError::InvalidDescriptor(format!(
                "{} view cannot be written into a {} heap",
                view.descriptor_type().name(),
                self.desc.descriptor_type.name()
            ))
            .into());
        }
        view.check_resource(resource)?;

        let handle = self.cpu_start.offset(slot, self.increment);
        self.device.write_descriptor(handle, resource.raw(), view);
        self.slots.lock().bound[slot as usize] = Some(resource.clone());
        Ok(handle)
    }

    /// 线性分配下一个空闲槽位
    pub fn allocate(&self) -> Result<u32> {
        let mut slots = self.slots.lock();
        if slots.next_free >= self.capacity() {
            return Err(GpuError::DescriptorOutOfRange {
                slot: slots.next_free,
                capacity: self.capacity(),
            }
            .into());
        }
        let slot = slots.next_free;
        slots.next_free += 1;
        Ok(slot)
    }

    /// 分配槽位并写入视图
    pub fn push_view(&self, resource: &Resource<B>, view: &ViewDesc) -> Result<u32> {
        let slot = self.allocate()?;
        self.write_view(slot, resource, view)?;
        Ok(slot)
    }

    /// 槽位当前描述的资源
    pub fn bound_resource(&self, slot: u32) -> Option<Resource<B>> {
        self.slots.lock().bound.get(slot as usize).cloned().flatten()
    }

    /// 释放所有槽位的资源引用，并把线性分配器复位
    ///
    /// 只能在引用此堆的命令全部完成之后调用。
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.bound.iter_mut().for_each(|b| *b = None);
        slots.next_free = 0;
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        let used = self.slots.lock().bound.iter().filter(|b| b.is_some()).count() as u32;
        DescriptorHeapStats::new(self.desc.descriptor_type, self.capacity(), used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::resource::{HeapKind, ResourceDesc, ResourceState};

    fn device() -> Arc<SoftwareDevice> {
        Arc::new(SoftwareDevice::new())
    }

    fn increments(device: &Arc<SoftwareDevice>) -> DescriptorIncrements {
        DescriptorIncrements::query(device.as_ref())
    }

    #[test]
    fn test_descriptor_type() {
        assert!(DescriptorType::ShaderResourceView.is_shader_visible());
        assert!(!DescriptorType::RenderTargetView.is_shader_visible());
        assert_eq!(DescriptorType::RenderTargetView.name(), "RTV");
        assert_eq!(DescriptorType::ConstantBufferView.heap_type(), DescriptorHeapType::CbvSrvUav);
    }

    #[test]
    fn test_descriptor_heap_desc() {
        let desc = DescriptorHeapDesc::rtv(100);
        assert_eq!(desc.descriptor_type, DescriptorType::RenderTargetView);
        assert_eq!(desc.num_descriptors, 100);
        assert!(!desc.shader_visible);
        assert_eq!(desc.name, Some("RTV Heap".to_string()));

        let desc = DescriptorHeapDesc::srv_cbv_uav(128);
        assert!(desc.shader_visible);

        assert!(DescriptorHeapDesc::rtv(4).with_shader_visible(true).validate().is_err());
        assert!(DescriptorHeapDesc::rtv(0).validate().is_err());
    }

    #[test]
    fn test_cpu_descriptor_handle_offset() {
        let handle = CpuDescriptorHandle::new(1000);
        assert_eq!(handle.offset(5, 32).ptr, 1160); // 1000 + 5 * 32
    }

    #[test]
    fn test_gpu_descriptor_handle_offset() {
        let handle = GpuDescriptorHandle::new(2000);
        assert_eq!(handle.offset(10, 32).ptr, 2320); // 2000 + 10 * 32
    }

    #[test]
    fn test_handle_arithmetic() {
        let device = device();
        let heap = DescriptorHeap::create(&device, DescriptorHeapDesc::rtv(2), &increments(&device)).unwrap();
        let increment = device.descriptor_increment(DescriptorHeapType::Rtv);
        assert_eq!(heap.increment(), increment);

        let h0 = heap.handle_at(0).unwrap();
        let h1 = heap.handle_at(1).unwrap();
        assert_eq!(h1.ptr - h0.ptr, increment as usize);

        let err = heap.handle_at(2).unwrap_err();
        assert!(matches!(
            err,
            crate::core::FramePipelineError::Graphics(GpuError::DescriptorOutOfRange { slot: 2, capacity: 2 })
        ));
    }

    #[test]
    fn test_every_slot_is_base_plus_index_times_increment() {
        let device = device();
        let increments = increments(&device);
        let descs = [
            DescriptorHeapDesc::rtv(3),
            DescriptorHeapDesc::dsv(2),
            DescriptorHeapDesc::srv_cbv_uav(64),
            DescriptorHeapDesc::new(DescriptorType::ConstantBufferView, 5),
            DescriptorHeapDesc::new(DescriptorType::Sampler, 16).with_shader_visible(true),
            DescriptorHeapDesc::new(DescriptorType::Sampler, 7),
        ];

        for desc in descs {
            let heap_type = desc.heap_type();
            let capacity = desc.num_descriptors;
            let heap = DescriptorHeap::create(&device, desc, &increments).unwrap();
            let increment = increments.get(heap_type);
            assert_eq!(heap.increment(), increment);
            assert_eq!(heap.increment(), device.descriptor_increment(heap_type));

            let base = heap.handle_at(0).unwrap().ptr;
            for i in 0..capacity {
                assert_eq!(
                    heap.handle_at(i).unwrap().ptr,
                    base + i as usize * increment as usize,
                    "{:?} slot {}",
                    heap_type,
                    i
                );
            }
            assert!(heap.handle_at(capacity).is_err());

            if heap.is_shader_visible() {
                let gpu_base = heap.gpu_handle_at(0).unwrap().ptr;
                for i in 0..capacity {
                    assert_eq!(
                        heap.gpu_handle_at(i).unwrap().ptr,
                        gpu_base + i as u64 * increment as u64,
                        "{:?} gpu slot {}",
                        heap_type,
                        i
                    );
                }
                assert!(heap.gpu_handle_at(capacity).is_err());
            } else {
                assert!(heap.gpu_handle_at(0).is_err());
            }
        }
    }

    #[test]
    fn test_gpu_handle_requires_shader_visible() {
        let device = device();
        let rtv = DescriptorHeap::create(&device, DescriptorHeapDesc::rtv(2), &increments(&device)).unwrap();
        assert!(rtv.gpu_handle_at(0).is_err());

        let srv = DescriptorHeap::create(&device, DescriptorHeapDesc::srv_cbv_uav(4), &increments(&device)).unwrap();
        let g0 = srv.gpu_handle_at(0).unwrap();
        let g3 = srv.gpu_handle_at(3).unwrap();
        assert_eq!(g3.ptr - g0.ptr, 3 * srv.increment() as u64);
    }

    #[test]
    fn test_write_view_keeps_resource_alive() {
        let device = device();
        let heap = DescriptorHeap::create(&device, DescriptorHeapDesc::srv_cbv_uav(4), &increments(&device)).unwrap();
        let cb = Resource::create(&device, ResourceDesc::constant_buffer("cb", 64)).unwrap();

        let before = cb.handle_count();
        let slot = heap
            .push_view(&cb, &ViewDesc::ConstantBuffer { offset: 0, size: 256 })
            .unwrap();
        assert_eq!(slot, 0);
        assert_eq!(cb.handle_count(), before + 1);
        assert_eq!(heap.stats().used, 1);

        heap.clear();
        assert_eq!(cb.handle_count(), before);
    }

    #[test]
    fn test_write_view_rejects_mismatches() {
        let device = device();
        let rtv_heap = DescriptorHeap::create(&device, DescriptorHeapDesc::rtv(1), &increments(&device)).unwrap();
        let srv_heap = DescriptorHeap::create(&device, DescriptorHeapDesc::srv_cbv_uav(1), &increments(&device)).unwrap();
        let texture = Resource::create(
            &device,
            ResourceDesc::texture2d("tex", 4, 4, Format::Rgba8Unorm, HeapKind::Default, ResourceState::CopyDest),
        )
        .unwrap();
        let cb = Resource::create(&device, ResourceDesc::constant_buffer("cb", 64)).unwrap();

        // SRV 写进 RTV 堆
        assert!(srv_heap
            .write_view(0, &texture, &ViewDesc::ShaderResource { format: Format::Rgba8Unorm })
            .is_ok());
        assert!(rtv_heap
            .write_view(0, &texture, &ViewDesc::ShaderResource { format: Format::Rgba8Unorm })
            .is_err());
        // 纹理没有 RT 标志
        assert!(rtv_heap
            .write_view(0, &texture, &ViewDesc::RenderTarget { format: Format::Rgba8Unorm })
            .is_err());
        // 未对齐的 CBV
        assert!(srv_heap
            .write_view(0, &cb, &ViewDesc::ConstantBuffer { offset: 0, size: 100 })
            .is_err());
        // 槽位越界
        assert!(srv_heap
            .write_view(1, &cb, &ViewDesc::ConstantBuffer { offset: 0, size: 256 })
            .is_err());
    }

    #[test]
    fn test_allocate_exhausts() {
        let device = device();
        let heap = DescriptorHeap::create(&device, DescriptorHeapDesc::srv_cbv_uav(2), &increments(&device)).unwrap();
        assert_eq!(heap.allocate().unwrap(), 0);
        assert_eq!(heap.allocate().unwrap(), 1);
        assert!(heap.allocate().is_err());
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorType::RenderTargetView, 100, 50);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.used, 50);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
