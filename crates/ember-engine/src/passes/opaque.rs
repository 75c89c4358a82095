use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command::CommandStream;
use crate::gpu::resource::Format;
use crate::gpu::state::ResourceState;
use crate::pipeline::{CullMode, DepthFunc, DepthState, GraphicsPipeline, GraphicsPipelineDesc};
use crate::scene::Vertex;
use crate::targets::{CLEAR_COLOR, CLEAR_DEPTH};

use super::{not_set_up, FrameContext, RenderPass, SetupContext};

/// Clears the intermediate target and depth buffer, then draws every lit object.
#[derive(Default)]
pub struct OpaquePass {
    pipeline: Option<Arc<GraphicsPipeline>>,
}

impl OpaquePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for OpaquePass {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        ctx.layout.validate(ctx.views)?;
        let pipeline = ctx
            .device
            .create_graphics_pipeline(GraphicsPipelineDesc {
                name: "opaque".into(),
                layout: ctx.layout.clone(),
                vertex_shader: ctx.shaders.transform_vs.clone(),
                pixel_shader: ctx.shaders.textured_ps.clone(),
                input_layout: Vertex::input_layout(),
                cull: CullMode::Back,
                depth: Some(DepthState {
                    func: DepthFunc::Less,
                    write: true,
                }),
                color_format: Format::Rgba8Unorm,
                depth_format: Some(Format::D32Float),
            })
            .context("opaque pass setup failed")?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn execute(&self, stream: &mut CommandStream, frame: &FrameContext<'_>) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| not_set_up(self.name()))?;

        frame
            .targets
            .emplace(stream, frame.pool, ResourceState::RenderTarget)?;
        stream.flush_barriers();

        let rtv = frame.targets.intermediate_rtv(frame.views);
        let dsv = frame.targets.depth_dsv(frame.views);
        stream.set_pipeline_state(pipeline);
        stream.set_viewports(frame.camera.viewport());
        stream.set_scissor_rects(frame.camera.scissor());
        stream.set_render_targets(Some(&rtv), Some(&dsv));
        stream.clear_render_target(&rtv, CLEAR_COLOR);
        stream.clear_depth(&dsv, CLEAR_DEPTH);

        frame.scene.bind_frame_tables(stream, frame.views);
        frame.scene.draw_objects(stream, frame.views);
        Ok(())
    }
}
