//! 顶点数据定义
//!
//! 帧管线本身把顶点与索引当作不透明的字节数组，这里只定义演示场景用到的
//! 顶点结构和对应的输入布局。
//!
//! # 设计说明
//!
//! - 使用 `#[repr(C)]` 确保内存布局与 HLSL 输入布局一致
//! - 实现 `Pod` 和 `Zeroable` trait 以支持直接写入映射后的上传缓冲

use bytemuck::{Pod, Zeroable};

use crate::renderer::pipeline::InputElement;
use crate::renderer::resource::Format;

/// 只有位置的顶点
///
/// # 内存布局
///
/// - `position`：12 字节（3 个 f32），对应 `POSITION` / `R32G32B32_FLOAT`
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    /// 顶点位置（裁剪空间）
    pub position: [f32; 3],
}

impl QuadVertex {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { position: [x, y, z] }
    }

    /// 输入布局
    pub fn input_layout() -> Vec<InputElement> {
        vec![InputElement::new("POSITION", Format::Rgb32Float)]
    }

    /// 顶点步长（字节）
    pub const fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }
}

/// 带纹理坐标的顶点
///
/// # 内存布局
///
/// - `position`：前 12 字节（3 个 f32）
/// - `uv`：后 8 字节（2 个 f32）
///
/// 总大小：20 字节
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl TexturedVertex {
    pub const fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }

    pub fn input_layout() -> Vec<InputElement> {
        vec![
            InputElement::new("POSITION", Format::Rgb32Float),
            InputElement::new("TEXCOORD", Format::Rg32Float),
        ]
    }

    pub const fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }
}

/// 矩形的四个顶点（三角形带顺序：左下、左上、右下、右上）
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex::new(-0.4, -0.7, 0.0),
    QuadVertex::new(-0.4, 0.7, 0.0),
    QuadVertex::new(0.4, -0.7, 0.0),
    QuadVertex::new(0.4, 0.7, 0.0),
];

/// 矩形的索引（两个三角形）
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

/// 带纹理坐标的矩形
pub const TEXTURED_QUAD_VERTICES: [TexturedVertex; 4] = [
    TexturedVertex::new([-0.4, -0.7, 0.0], [0.0, 1.0]),
    TexturedVertex::new([-0.4, 0.7, 0.0], [0.0, 0.0]),
    TexturedVertex::new([0.4, -0.7, 0.0], [1.0, 1.0]),
    TexturedVertex::new([0.4, 0.7, 0.0], [1.0, 0.0]),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::pipeline::{PipelineDesc, ShaderBytecode};

    #[test]
    fn test_vertex_size() {
        assert_eq!(QuadVertex::stride(), 12);
        assert_eq!(TexturedVertex::stride(), 20);
        assert_eq!(bytemuck::cast_slice::<QuadVertex, u8>(&QUAD_VERTICES).len(), 48);
    }

    #[test]
    fn test_layout_matches_struct() {
        let shader = || ShaderBytecode::new(vec![1u8], "main");
        let mut desc = PipelineDesc::new("textured", shader(), shader());
        desc.input_layout = TexturedVertex::input_layout();
        assert_eq!(desc.vertex_stride(0), TexturedVertex::stride());
        assert_eq!(desc.resolved_offsets(), vec![0, 12]);
    }

    #[test]
    fn test_quad_indices_in_range() {
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }
}
