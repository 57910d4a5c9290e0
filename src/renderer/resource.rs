//! 资源管理模块
//!
//! 提供 GPU 资源（缓冲区、纹理）的句柄与访问约定。
//!
//! # 设计原则
//!
//! - **共享所有权**：`Resource` 是引用计数句柄，被命令列表或描述符引用时自动延长生命周期
//! - **状态外置**：资源本身不记录当前状态，状态由记录命令的一方通过屏障声明
//! - **作用域映射**：`map()` 返回 `MappedRange`，显式 `unmap()` 或离开作用域时解除映射
//! - **自动对齐**：常量缓冲区按 256 字节对齐，纹理上传按 256 字节行距对齐

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;

/// 常量缓冲区对齐（D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 纹理上传行距对齐（D3D12_TEXTURE_DATA_PITCH_ALIGNMENT）
pub const TEXTURE_PITCH_ALIGNMENT: u64 = 256;

/// 纹理上传起始偏移对齐（D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT）
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// 向上对齐到 `alignment`（必须为 2 的幂）
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// 资源所在堆的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// CPU 可写、GPU 可读（上传堆）
    Upload,
    /// GPU 本地内存，CPU 不可映射
    Default,
    /// GPU 可写、CPU 可读（回读堆）
    Readback,
    /// 自定义堆属性，按 GPU 本地处理
    Custom,
}

impl HeapKind {
    /// 是否允许 CPU 映射
    pub fn is_cpu_visible(&self) -> bool {
        matches!(self, HeapKind::Upload | HeapKind::Readback)
    }
}

/// 资源状态
///
/// GPU 只能以与当前声明状态一致的方式访问资源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    CopyDest,
    CopySource,
    PixelShaderResource,
    NonPixelShaderResource,
    VertexAndConstantBuffer,
    IndexBuffer,
    DepthWrite,
    GenericRead,
}

impl ResourceState {
    /// 可作为复制源
    pub fn allows_copy_source(&self) -> bool {
        matches!(self, ResourceState::CopySource | ResourceState::GenericRead)
    }

    /// 可作为顶点/常量缓冲读取
    pub fn allows_vertex_read(&self) -> bool {
        matches!(
            self,
            ResourceState::VertexAndConstantBuffer | ResourceState::GenericRead
        )
    }

    /// 可作为索引缓冲读取
    pub fn allows_index_read(&self) -> bool {
        matches!(self, ResourceState::IndexBuffer | ResourceState::GenericRead)
    }

    /// 可被像素着色器读取
    pub fn allows_pixel_shader_read(&self) -> bool {
        matches!(
            self,
            ResourceState::PixelShaderResource | ResourceState::GenericRead
        )
    }
}

/// 像素/元素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    R16Uint,
    R32Uint,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    D32Float,
}

impl Format {
    /// 每个元素（像素、顶点属性、索引）的字节数
    pub fn bytes_per_element(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R16Uint => 2,
            Format::Rgba8Unorm | Format::R32Uint | Format::R32Float | Format::D32Float => 4,
            Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    /// 将清屏颜色编码为此格式的一个像素
    pub fn encode_color(&self, color: [f32; 4]) -> Vec<u8> {
        match self {
            Format::Rgba8Unorm => color
                .iter()
                .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
            Format::Rgba32Float => bytemuck::cast_slice(&color).to_vec(),
            Format::R32Float | Format::D32Float => color[0].to_le_bytes().to_vec(),
            _ => vec![0; self.bytes_per_element() as usize],
        }
    }
}

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    /// 线性缓冲区
    Buffer { size: u64 },
    /// 2D 纹理（单 mip）
    Texture2D { width: u32, height: u32, format: Format },
}

/// 资源描述信息
#[derive(Debug, Clone)]
pub struct ResourceDesc {
    /// 调试名称
    pub name: String,
    /// 维度
    pub dimension: ResourceDimension,
    /// 所在堆
    pub heap: HeapKind,
    /// 创建时的状态
    pub initial_state: ResourceState,
    /// 是否可作为渲染目标
    pub allow_render_target: bool,
}

impl ResourceDesc {
    /// 创建缓冲区描述
    pub fn buffer(name: impl Into<String>, size: u64, heap: HeapKind, initial_state: ResourceState) -> Self {
        Self {
            name: name.into(),
            dimension: ResourceDimension::Buffer { size },
            heap,
            initial_state,
            allow_render_target: false,
        }
    }

    /// 上传堆缓冲区（初始状态固定为 GENERIC_READ）
    pub fn upload_buffer(name: impl Into<String>, size: u64) -> Self {
        Self::buffer(name, size, HeapKind::Upload, ResourceState::GenericRead)
    }

    /// 回读堆缓冲区（初始状态固定为 COPY_DEST）
    pub fn readback_buffer(name: impl Into<String>, size: u64) -> Self {
        Self::buffer(name, size, HeapKind::Readback, ResourceState::CopyDest)
    }

    /// 常量缓冲区，大小向上对齐到 256 字节
    pub fn constant_buffer(name: impl Into<String>, size: u64) -> Self {
        Self::upload_buffer(name, align_up(size.max(1), CONSTANT_BUFFER_ALIGNMENT))
    }

    /// 创建 2D 纹理描述
    pub fn texture2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: Format,
        heap: HeapKind,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            name: name.into(),
            dimension: ResourceDimension::Texture2D { width, height, format },
            heap,
            initial_state,
            allow_render_target: false,
        }
    }

    /// 允许作为渲染目标
    pub fn with_render_target(mut self) -> Self {
        self.allow_render_target = true;
        self
    }

    /// 资源占用的字节数
    pub fn size_bytes(&self) -> u64 {
        match self.dimension {
            ResourceDimension::Buffer { size } => size,
            ResourceDimension::Texture2D { width, height, format } => {
                width as u64 * height as u64 * format.bytes_per_element() as u64
            }
        }
    }

    /// 校验描述是否合法
    ///
    /// 与 D3D12 的约束一致：上传堆必须为 GENERIC_READ，回读堆必须为 COPY_DEST，
    /// 纹理只能放在 GPU 本地堆。
    pub fn validate(&self) -> std::result::Result<(), GpuError> {
        let fail = |reason: &str| {
            Err(GpuError::AllocationFailed(format!("'{}': {}", self.name, reason)))
        };

        if self.size_bytes() == 0 {
            return fail("resource size must be greater than 0");
        }

        match self.heap {
            HeapKind::Upload if self.initial_state != ResourceState::GenericRead => {
                return fail("upload heap resources must start in GENERIC_READ");
            }
            HeapKind::Readback if self.initial_state != ResourceState::CopyDest => {
                return fail("readback heap resources must start in COPY_DEST");
            }
            _ => {}
        }

        if let ResourceDimension::Texture2D { format, .. } = self.dimension {
            if self.heap.is_cpu_visible() {
                return fail("textures cannot be placed on CPU-visible heaps");
            }
            if format == Format::Unknown {
                return fail("texture format must be known");
            }
        } else if self.allow_render_target {
            return fail("buffers cannot be render targets");
        }

        Ok(())
    }
}

/// 资源唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

struct ResourceShared<B: GpuDevice> {
    id: ResourceId,
    desc: ResourceDesc,
    gpu_address: u64,
    map_count: AtomicU32,
    raw: B::Resource,
    device: Arc<B>,
}

/// 资源的弱引用，用于判断资源是否已经释放
pub struct WeakResource<B: GpuDevice> {
    shared: Weak<ResourceShared<B>>,
}

impl<B: GpuDevice> WeakResource<B> {
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<Resource<B>> {
        self.shared.upgrade().map(|shared| Resource { shared })
    }
}

/// GPU 资源句柄
///
/// 克隆句柄只增加引用计数。记录的命令与描述符会持有句柄，
/// 因此资源至少存活到引用它的命令分配器被重置为止。
pub struct Resource<B: GpuDevice> {
    shared: Arc<ResourceShared<B>>,
}

impl<B: GpuDevice> Clone for Resource<B> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<B: GpuDevice> fmt::Debug for Resource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.shared.id)
            .field("name", &self.shared.desc.name)
            .field("heap", &self.shared.desc.heap)
            .field("size", &self.size_bytes())
            .finish()
    }
}

impl<B: GpuDevice> Resource<B> {
    /// 在设备上创建资源
    pub fn create(device: &Arc<B>, desc: ResourceDesc) -> Result<Self> {
        desc.validate()?;
        let raw = device.create_resource(&desc)?;
        Ok(Self::from_raw(device, desc, raw))
    }

    /// 包装后端已经创建好的资源（例如交换链的后缓冲）
    pub(crate) fn from_raw(device: &Arc<B>, desc: ResourceDesc, raw: B::Resource) -> Self {
        let gpu_address = device.gpu_address(&raw);
        Self {
            shared: Arc::new(ResourceShared {
                id: ResourceId::next(),
                desc,
                gpu_address,
                map_count: AtomicU32::new(0),
                raw,
                device: Arc::clone(device),
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.desc.name
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.shared.desc
    }

    pub fn heap(&self) -> HeapKind {
        self.shared.desc.heap
    }

    pub fn size_bytes(&self) -> u64 {
        self.shared.desc.size_bytes()
    }

    /// 创建时的状态（状态跟踪器的起点）
    pub fn initial_state(&self) -> ResourceState {
        self.shared.desc.initial_state
    }

    /// GPU 虚拟地址
    pub fn gpu_address(&self) -> u64 {
        self.shared.gpu_address
    }

    /// 后端原生资源
    pub fn raw(&self) -> &B::Resource {
        &self.shared.raw
    }

    /// 当前句柄的引用计数（包括命令与描述符持有的引用）
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// 不延长生命周期的弱引用
    pub fn downgrade(&self) -> WeakResource<B> {
        WeakResource {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// 是否处于映射状态
    pub fn is_mapped(&self) -> bool {
        self.shared.map_count.load(Ordering::Acquire) > 0
    }

    /// 映射资源到 CPU 地址空间
    ///
    /// 只有上传堆和回读堆可以映射。映射可以嵌套，最后一次解除映射时
    /// 才真正调用后端的 unmap。在 GPU 读取资源之前必须解除映射。
    pub fn map(&self) -> Result<MappedRange<'_, B>> {
        if !self.heap().is_cpu_visible() {
            return Err(GpuError::InvalidMapTarget {
                name: self.name().to_string(),
                heap: self.heap(),
            }
            .into());
        }

        if self.shared.map_count.fetch_add(1, Ordering::AcqRel) == 0 {
            if let Err(e) = self.shared.device.map(&self.shared.raw) {
                self.shared.map_count.fetch_sub(1, Ordering::AcqRel);
                return Err(e.into());
            }
        }

        Ok(MappedRange { resource: self, released: false })
    }

    /// 映射、写入、解除映射
    pub fn upload(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mapped = self.map()?;
        mapped.write(offset, data)?;
        mapped.unmap();
        Ok(())
    }

    fn release_mapping(&self) {
        if self.shared.map_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.device.unmap(&self.shared.raw);
        }
    }
}

/// 映射后的 CPU 可见区域
///
/// 显式调用 [`MappedRange::unmap`] 或在离开作用域时解除映射。
pub struct MappedRange<'a, B: GpuDevice> {
    resource: &'a Resource<B>,
    released: bool,
}

impl<'a, B: GpuDevice> MappedRange<'a, B> {
    fn check_bounds(&self, offset: u64, len: usize) -> std::result::Result<(), GpuError> {
        let size = self.resource.size_bytes();
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(GpuError::MapOutOfBounds { offset, len: len as u64, size }),
        }
    }

    /// 映射区域大小
    pub fn len(&self) -> u64 {
        self.resource.size_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在偏移处写入字节
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len())?;
        self.resource.shared.device.write_mapped(&self.resource.shared.raw, offset, data);
        Ok(())
    }

    /// 写入 POD 元素数组（顶点、索引、常量）
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, data: &[T]) -> Result<()> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    /// 从偏移处读取字节
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, out.len())?;
        self.resource.shared.device.read_mapped(&self.resource.shared.raw, offset, out);
        Ok(())
    }

    /// 读取整个资源
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.len() as usize];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// 解除映射
    pub fn unmap(mut self) {
        self.released = true;
        self.resource.release_mapping();
    }
}

impl<'a, B: GpuDevice> Drop for MappedRange<'a, B> {
    fn drop(&mut self) {
        if !self.released {
            self.resource.release_mapping();
        }
    }
}

/// 纹理上传的行布局
///
/// 对应 D3D12_PLACED_SUBRESOURCE_FOOTPRINT：源缓冲中每行按 256 字节对齐。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFootprint {
    /// 在上传缓冲中的起始偏移
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// 对齐后的行距
    pub row_pitch: u32,
}

impl TextureFootprint {
    /// 计算纹理的上传布局
    pub fn for_texture(width: u32, height: u32, format: Format) -> Self {
        let tight = width as u64 * format.bytes_per_element() as u64;
        Self {
            offset: 0,
            width,
            height,
            format,
            row_pitch: align_up(tight, TEXTURE_PITCH_ALIGNMENT) as u32,
        }
    }

    /// 一行的有效字节数
    pub fn tight_row_bytes(&self) -> u64 {
        self.width as u64 * self.format.bytes_per_element() as u64
    }

    /// 上传缓冲需要的总字节数
    pub fn total_bytes(&self) -> u64 {
        self.offset + self.row_pitch as u64 * self.height.saturating_sub(1) as u64 + self.tight_row_bytes()
    }

    /// 同 [`total_bytes`](Self::total_bytes)，偏移来自外部时使用
    pub fn checked_total_bytes(&self) -> Option<u64> {
        (self.row_pitch as u64)
            .checked_mul(self.height.saturating_sub(1) as u64)
            .and_then(|rows| rows.checked_add(self.tight_row_bytes()))
            .and_then(|len| self.offset.checked_add(len))
    }
}

/// 外部加载器提供的像素数据
#[derive(Debug, Clone)]
pub struct PixelData<'a> {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// 源数据中每行的字节数
    pub row_pitch: usize,
    /// 源数据中每个切片的字节数
    pub slice_pitch: usize,
    pub bytes: &'a [u8],
}

impl<B: GpuDevice> Resource<B> {
    /// 按行写入像素数据到上传缓冲，使用 `footprint` 的对齐行距
    pub fn write_pixels(&self, footprint: &TextureFootprint, pixels: &PixelData<'_>) -> Result<()> {
        let row_bytes = footprint.tight_row_bytes() as usize;
        let required = pixels.row_pitch * footprint.height.saturating_sub(1) as usize + row_bytes;
        if pixels.row_pitch < row_bytes || pixels.bytes.len() < required || pixels.slice_pitch < required {
            return Err(GpuError::AllocationFailed(format!(
                "pixel data for '{}' is smaller than its declared pitch",
                self.name()
            ))
            .into());
        }

        let mapped = self.map()?;
        for row in 0..footprint.height as usize {
            let src = &pixels.bytes[row * pixels.row_pitch..row * pixels.row_pitch + row_bytes];
            let dst = footprint.offset + row as u64 * footprint.row_pitch as u64;
            mapped.write(dst, src)?;
        }
        mapped.unmap();
        Ok(())
    }
}

/// 帧资源
///
/// 流水线模式下每个后缓冲对应一组帧资源，记录最后一次使用它的 fence 值。
#[derive(Debug, Clone)]
pub struct FrameResource {
    /// 帧索引
    pub frame_index: usize,
    /// 最后一次提交的 fence 值
    pub fence_value: u64,
    /// 资源是否可用
    pub available: bool,
}

impl FrameResource {
    pub fn new(frame_index: usize) -> Self {
        Self {
            frame_index,
            fence_value: 0,
            available: true,
        }
    }

    /// 标记为不可用（GPU正在使用）
    pub fn mark_in_use(&mut self, fence_value: u64) {
        self.available = false;
        self.fence_value = fence_value;
    }

    /// 标记为可用
    pub fn mark_available(&mut self) {
        self.available = true;
    }
}

/// 帧资源池
///
/// 按后缓冲索引管理帧资源的可用性。
#[derive(Debug)]
pub struct FrameResourcePool {
    resources: Vec<FrameResource>,
}

impl FrameResourcePool {
    /// 创建新的帧资源池
    ///
    /// # 参数
    ///
    /// * `count` - 帧资源数量（通常为2或3）
    pub fn new(count: usize) -> Self {
        assert!(count >= 1, "At least 1 frame resource required");

        Self {
            resources: (0..count).map(FrameResource::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameResource> {
        self.resources.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FrameResource> {
        self.resources.get_mut(index)
    }

    /// 根据已完成的 Fence 值更新帧资源可用性
    pub fn update_availability(&mut self, completed_fence_value: u64) {
        for resource in &mut self.resources {
            if !resource.available && resource.fence_value <= completed_fence_value {
                resource.mark_available();
            }
        }
    }

    /// 使用该帧资源前需要等待的 fence 值
    pub fn pending_fence_value(&self, index: usize) -> Option<u64> {
        self.resources
            .get(index)
            .filter(|r| !r.available)
            .map(|r| r.fence_value)
    }
}
