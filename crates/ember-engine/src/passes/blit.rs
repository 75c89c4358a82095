use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command::CommandStream;
use crate::gpu::resource::Format;
use crate::gpu::state::ResourceState;
use crate::pipeline::{CullMode, GraphicsPipeline, GraphicsPipelineDesc};
use crate::scene::Vertex;
use crate::views::ViewKind;

use super::{not_set_up, FrameContext, RenderPass, SetupContext};

/// Copies the intermediate target into the back buffer with a full-screen quad.
#[derive(Default)]
pub struct BlitPass {
    pipeline: Option<Arc<GraphicsPipeline>>,
}

impl BlitPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for BlitPass {
    fn name(&self) -> &'static str {
        "blit"
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        ctx.layout.validate(ctx.views)?;
        let pipeline = ctx
            .device
            .create_graphics_pipeline(GraphicsPipelineDesc {
                name: "blit".into(),
                layout: ctx.layout.clone(),
                vertex_shader: ctx.shaders.full_screen_vs.clone(),
                pixel_shader: ctx.shaders.blit_ps.clone(),
                input_layout: Vertex::input_layout(),
                cull: CullMode::None,
                depth: None,
                color_format: Format::Rgba8Unorm,
                depth_format: None,
            })
            .context("blit pass setup failed")?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn execute(&self, stream: &mut CommandStream, frame: &FrameContext<'_>) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| not_set_up(self.name()))?;

        frame
            .targets
            .emplace(stream, frame.pool, ResourceState::ShaderResource)?;
        stream.flush_barriers();

        stream.set_pipeline_state(pipeline);
        stream.set_viewports(frame.camera.viewport());
        stream.set_scissor_rects(frame.camera.scissor());
        stream.set_render_targets(Some(&frame.back_buffer_rtv), None);

        frame.views.bind_views_for_draw(
            stream,
            ViewKind::GlobalSrv,
            frame.targets.intermediate_srv_slot(),
        );
        frame.scene.bind_frame_tables(stream, frame.views);
        frame.scene.draw_full_screen_quad(stream);
        Ok(())
    }
}
