//! 管线状态模块
//!
//! 描述一个图形管线状态对象：着色器字节码、顶点输入布局、根签名参数、
//! 渲染目标格式和图元拓扑类型。着色器字节码对帧管线是不透明的。

use std::fmt;
use std::sync::Arc;

use crate::core::error::{GpuError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::descriptor::DescriptorType;
use crate::renderer::resource::Format;

/// 不透明的着色器字节码（或后端能够编译的源码）
#[derive(Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    bytes: Arc<[u8]>,
    /// 入口函数名，仅当字节码为源码时使用
    pub entry_point: String,
}

impl ShaderBytecode {
    pub fn new(bytes: impl Into<Arc<[u8]>>, entry_point: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            entry_point: entry_point.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 是否为已编译的 DXBC 容器
    pub fn is_compiled(&self) -> bool {
        self.bytes.starts_with(b"DXBC")
    }
}

impl fmt::Debug for ShaderBytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBytecode")
            .field("len", &self.bytes.len())
            .field("entry_point", &self.entry_point)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// 顶点输入元素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    /// None 表示紧跟上一个元素（D3D12_APPEND_ALIGNED_ELEMENT）
    pub aligned_offset: Option<u32>,
}

impl InputElement {
    pub fn new(semantic: impl Into<String>, format: Format) -> Self {
        Self {
            semantic: semantic.into(),
            semantic_index: 0,
            format,
            input_slot: 0,
            aligned_offset: None,
        }
    }
}

/// 着色器可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

/// 描述符表中的一段连续范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    pub range_type: DescriptorType,
    pub count: u32,
    pub base_register: u32,
}

/// 根参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// 指向着色器可见堆中一段描述符的表
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    /// 单一范围的描述符表
    pub fn table(range_type: DescriptorType, count: u32, base_register: u32, visibility: ShaderVisibility) -> Self {
        RootParameter::DescriptorTable {
            ranges: vec![DescriptorRange { range_type, count, base_register }],
            visibility,
        }
    }
}

/// 纹理过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
}

/// 纹理寻址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

/// 静态采样器（烘焙进根签名）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSampler {
    pub register: u32,
    pub filter: Filter,
    pub address_mode: AddressMode,
    pub visibility: ShaderVisibility,
}

impl Default for StaticSampler {
    fn default() -> Self {
        Self {
            register: 0,
            filter: Filter::Linear,
            address_mode: AddressMode::Wrap,
            visibility: ShaderVisibility::Pixel,
        }
    }
}

/// 图元拓扑类型（管线状态的一部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopologyType {
    Point,
    Line,
    Triangle,
}

/// 图元拓扑（命令列表的状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn topology_type(&self) -> PrimitiveTopologyType {
        match self {
            PrimitiveTopology::PointList => PrimitiveTopologyType::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => PrimitiveTopologyType::Line,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => PrimitiveTopologyType::Triangle,
        }
    }
}

/// 管线状态描述
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub name: String,
    pub vertex_shader: ShaderBytecode,
    pub pixel_shader: ShaderBytecode,
    pub input_layout: Vec<InputElement>,
    pub root_parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub render_target_format: Format,
    pub topology_type: PrimitiveTopologyType,
}

impl PipelineDesc {
    /// 单渲染目标、三角形拓扑、空根签名的管线
    pub fn new(name: impl Into<String>, vertex_shader: ShaderBytecode, pixel_shader: ShaderBytecode) -> Self {
        Self {
            name: name.into(),
            vertex_shader,
            pixel_shader,
            input_layout: Vec::new(),
            root_parameters: Vec::new(),
            static_samplers: Vec::new(),
            render_target_format: Format::Rgba8Unorm,
            topology_type: PrimitiveTopologyType::Triangle,
        }
    }

    pub fn with_input(mut self, element: InputElement) -> Self {
        self.input_layout.push(element);
        self
    }

    pub fn with_root_parameter(mut self, parameter: RootParameter) -> Self {
        self.root_parameters.push(parameter);
        self
    }

    pub fn with_static_sampler(mut self, sampler: StaticSampler) -> Self {
        self.static_samplers.push(sampler);
        self
    }

    pub fn with_render_target_format(mut self, format: Format) -> Self {
        self.render_target_format = format;
        self
    }

    /// 每个输入元素解析后的字节偏移
    pub fn resolved_offsets(&self) -> Vec<u32> {
        let mut next_per_slot = std::collections::HashMap::<u32, u32>::new();
        self.input_layout
            .iter()
            .map(|element| {
                let next = next_per_slot.entry(element.input_slot).or_insert(0);
                let offset = element.aligned_offset.unwrap_or(*next);
                *next = offset + element.format.bytes_per_element();
                offset
            })
            .collect()
    }

    /// 某个输入槽的顶点步长
    pub fn vertex_stride(&self, slot: u32) -> u32 {
        self.input_layout
            .iter()
            .zip(self.resolved_offsets())
            .filter(|(e, _)| e.input_slot == slot)
            .map(|(e, offset)| offset + e.format.bytes_per_element())
            .max()
            .unwrap_or(0)
    }

    /// 校验管线描述
    pub fn validate(&self) -> std::result::Result<(), GpuError> {
        let fail = |reason: String| Err(GpuError::PipelineCreationFailed(format!("'{}': {}", self.name, reason)));

        if self.vertex_shader.is_empty() || self.pixel_shader.is_empty() {
            return fail("shader bytecode is empty".into());
        }
        if matches!(self.render_target_format, Format::Unknown | Format::D32Float) {
            return fail(format!("{:?} is not a color render target format", self.render_target_format));
        }
        for element in &self.input_layout {
            if element.format.bytes_per_element() == 0 || element.semantic.is_empty() {
                return fail(format!("invalid input element '{}'", element.semantic));
            }
        }
        for parameter in &self.root_parameters {
            let RootParameter::DescriptorTable { ranges, .. } = parameter;
            if ranges.is_empty() {
                return fail("descriptor table has no ranges".into());
            }
            for range in ranges {
                if range.count == 0 {
                    return fail("descriptor range is empty".into());
                }
                if !matches!(
                    range.range_type,
                    DescriptorType::ConstantBufferView
                        | DescriptorType::ShaderResourceView
                        | DescriptorType::UnorderedAccessView
                ) {
                    return fail(format!("{} cannot appear in a descriptor table", range.range_type.name()));
                }
            }
        }
        Ok(())
    }
}

/// 管线状态对象
pub struct Pipeline<B: GpuDevice> {
    raw: B::Pipeline,
    desc: PipelineDesc,
}

impl<B: GpuDevice> fmt::Debug for Pipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("name", &self.desc.name).finish()
    }
}

impl<B: GpuDevice> Pipeline<B> {
    /// 创建管线状态对象与根签名
    pub fn create(device: &Arc<B>, desc: PipelineDesc) -> Result<Arc<Self>> {
        desc.validate()?;
        let raw = device.create_pipeline(&desc)?;
        tracing::info!(
            pipeline = %desc.name,
            inputs = desc.input_layout.len(),
            root_parameters = desc.root_parameters.len(),
            "Pipeline state created"
        );
        Ok(Arc::new(Self { raw, desc }))
    }

    pub fn raw(&self) -> &B::Pipeline {
        &self.raw
    }

    pub fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader() -> ShaderBytecode {
        ShaderBytecode::new(vec![1u8, 2, 3], "main")
    }

    #[test]
    fn test_vertex_stride() {
        let desc = PipelineDesc::new("quad", shader(), shader())
            .with_input(InputElement::new("POSITION", Format::Rgb32Float));
        assert_eq!(desc.vertex_stride(0), 12);

        let desc = desc.with_input(InputElement::new("TEXCOORD", Format::Rg32Float));
        assert_eq!(desc.resolved_offsets(), vec![0, 12]);
        assert_eq!(desc.vertex_stride(0), 20);
        assert_eq!(desc.vertex_stride(1), 0);
    }

    #[test]
    fn test_validation() {
        assert!(PipelineDesc::new("ok", shader(), shader()).validate().is_ok());

        let empty = PipelineDesc::new("empty", ShaderBytecode::new(Vec::new(), "main"), shader());
        assert!(matches!(empty.validate(), Err(GpuError::PipelineCreationFailed(_))));

        let bad_table = PipelineDesc::new("table", shader(), shader()).with_root_parameter(RootParameter::table(
            DescriptorType::RenderTargetView,
            1,
            0,
            ShaderVisibility::Pixel,
        ));
        assert!(bad_table.validate().is_err());

        let depth_rt = PipelineDesc::new("depth", shader(), shader()).with_render_target_format(Format::D32Float);
        assert!(depth_rt.validate().is_err());
    }

    #[test]
    fn test_topology_type() {
        assert_eq!(PrimitiveTopology::TriangleList.topology_type(), PrimitiveTopologyType::Triangle);
        assert_eq!(PrimitiveTopology::LineStrip.topology_type(), PrimitiveTopologyType::Line);
    }

    #[test]
    fn test_compiled_detection() {
        assert!(ShaderBytecode::new(b"DXBC\0\0".to_vec(), "main").is_compiled());
        assert!(!ShaderBytecode::new(b"float4 main()".to_vec(), "main").is_compiled());
    }
}
