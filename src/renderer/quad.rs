//! 矩形场景
//!
//! 一个管线、一个顶点缓冲、一个索引缓冲，每帧清屏后画一次
//! `DrawIndexedInstanced(6, 1, 0, 0, 0)`。

use std::sync::Arc;

use crate::core::config::GraphicsConfig;
use crate::core::error::Result;
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{IndexBufferView, IndexFormat, VertexBufferView};
use crate::renderer::context::GpuContext;
use crate::renderer::frame::FrameRecording;
use crate::renderer::pipeline::{Pipeline, PipelineDesc, PrimitiveTopology, ShaderBytecode};
use crate::renderer::resource::{Format, Resource};
use crate::renderer::shaders::{self, BASIC_PS_ENTRY, BASIC_VS_ENTRY};
use crate::renderer::vertex::{QuadVertex, QUAD_INDICES, QUAD_VERTICES};

pub struct QuadScene<B: GpuDevice> {
    pipeline: Arc<Pipeline<B>>,
    vertex_buffer: Resource<B>,
    index_buffer: Resource<B>,
    clear_color: [f32; 4],
}

impl<B: GpuDevice> QuadScene<B> {
    /// 用给定的着色器创建场景
    pub fn new(
        context: &GpuContext<B>,
        vertex_shader: ShaderBytecode,
        pixel_shader: ShaderBytecode,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let mut desc = PipelineDesc::new("quad", vertex_shader, pixel_shader)
            .with_render_target_format(Format::Rgba8Unorm);
        desc.input_layout = QuadVertex::input_layout();
        let pipeline = Pipeline::create(context.device(), desc)?;

        let vertex_buffer = context.upload_buffer("quad.vertices", &QUAD_VERTICES)?;
        let index_buffer = context.upload_buffer("quad.indices", &QUAD_INDICES)?;

        crate::engine_info!(
            vertices = QUAD_VERTICES.len(),
            indices = QUAD_INDICES.len(),
            "Quad scene created"
        );

        Ok(Self {
            pipeline,
            vertex_buffer,
            index_buffer,
            clear_color,
        })
    }

    /// 按配置创建：给出字节码路径时加载预编译着色器，否则使用内置 HLSL
    pub fn from_config(context: &GpuContext<B>, config: &GraphicsConfig) -> Result<Self> {
        let (vs, ps) = match (&config.vertex_shader, &config.pixel_shader) {
            (Some(vs), Some(ps)) => (
                shaders::load_bytecode(vs, BASIC_VS_ENTRY)?,
                shaders::load_bytecode(ps, BASIC_PS_ENTRY)?,
            ),
            _ => shaders::basic_shaders(),
        };
        Self::new(context, vs, ps, config.clear_color)
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<B>> {
        &self.pipeline
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// 清屏并绘制矩形
    ///
    /// 管线由记录器重置时绑定。
    pub fn record(&self, frame: &mut FrameRecording<'_, B>) -> Result<()> {
        frame.clear(self.clear_color)?;

        let recorder = frame.recorder();
        recorder.set_primitive_topology(PrimitiveTopology::TriangleList)?;
        recorder.set_vertex_buffer(0, VertexBufferView::whole(&self.vertex_buffer, QuadVertex::stride()))?;
        recorder.set_index_buffer(IndexBufferView::whole(&self.index_buffer, IndexFormat::U16))?;
        recorder.draw_indexed_instanced(QUAD_INDICES.len() as u32, 1, 0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SyncMode;
    use crate::core::error::GpuError;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::context::ContextOptions;
    use crate::renderer::frame::FrameSynchronizer;
    use crate::renderer::swapchain::SwapChainDesc;

    fn context() -> Arc<GpuContext<SoftwareDevice>> {
        let options = ContextOptions {
            track_resource_states: true,
            ..ContextOptions::default()
        };
        Arc::new(GpuContext::new(Arc::new(SoftwareDevice::new()), options).unwrap())
    }

    #[test]
    fn test_quad_frames_validate() {
        let ctx = context();
        let scene = QuadScene::from_config(&ctx, &GraphicsConfig::default()).unwrap();
        let swap_chain = ctx.create_swap_chain(SwapChainDesc::new(16, 16, 2), None).unwrap();
        let mut frames = FrameSynchronizer::new(ctx.clone(), swap_chain, SyncMode::FullDrain)
            .unwrap()
            .with_pipeline(scene.pipeline().clone());

        for k in 1..=3u64 {
            let report = frames.render_frame(|f| scene.record(f)).unwrap();
            assert_eq!(report.fence_value, k);
        }

        let snapshot = ctx.device().snapshot();
        assert_eq!(snapshot.validation_errors(), 0, "{:?}", snapshot.messages);
        assert_eq!(snapshot.draws, 3);
        assert_eq!(snapshot.clears, 3);
    }

    #[test]
    fn test_aborted_frame_keeps_pipeline_for_next_frame() {
        let ctx = context();
        let scene = QuadScene::from_config(&ctx, &GraphicsConfig::default()).unwrap();
        let swap_chain = ctx.create_swap_chain(SwapChainDesc::new(16, 16, 2), None).unwrap();
        let mut frames = FrameSynchronizer::new(ctx.clone(), swap_chain, SyncMode::FullDrain)
            .unwrap()
            .with_pipeline(scene.pipeline().clone());

        frames.render_frame(|f| scene.record(f)).unwrap();
        let err = frames
            .render_frame(|f| {
                scene.record(f)?;
                Err(GpuError::SubmissionFailed("late failure".into()).into())
            })
            .unwrap_err();
        assert!(!err.is_fatal());
        let report = frames.render_frame(|f| scene.record(f)).unwrap();
        assert_eq!(report.fence_value, 2);

        let snapshot = ctx.device().snapshot();
        assert_eq!(snapshot.validation_errors(), 0, "{:?}", snapshot.messages);
        assert_eq!(snapshot.draws, 2);
    }

    #[test]
    fn test_missing_pipeline_binding_reported() {
        let ctx = context();
        let scene = QuadScene::from_config(&ctx, &GraphicsConfig::default()).unwrap();
        let swap_chain = ctx.create_swap_chain(SwapChainDesc::new(4, 4, 2), None).unwrap();
        let mut frames = FrameSynchronizer::new(ctx.clone(), swap_chain, SyncMode::FullDrain).unwrap();

        frames.render_frame(|f| scene.record(f)).unwrap();
        assert!(ctx.device().snapshot().validation_errors() > 0);
    }

    #[test]
    fn test_shader_paths_must_exist() {
        let ctx = context();
        let config = GraphicsConfig {
            vertex_shader: Some("missing_vs.cso".into()),
            pixel_shader: Some("missing_ps.cso".into()),
            ..GraphicsConfig::default()
        };
        assert!(QuadScene::from_config(&ctx, &config).is_err());
    }
}
