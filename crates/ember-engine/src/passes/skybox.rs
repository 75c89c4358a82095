use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command::CommandStream;
use crate::gpu::resource::Format;
use crate::gpu::state::ResourceState;
use crate::pipeline::{CullMode, DepthFunc, DepthState, GraphicsPipeline, GraphicsPipelineDesc};
use crate::scene::Vertex;

use super::{not_set_up, FrameContext, RenderPass, SetupContext};

/// Draws the inside of the skybox cube behind everything already rendered.
#[derive(Default)]
pub struct SkyboxPass {
    pipeline: Option<Arc<GraphicsPipeline>>,
}

impl SkyboxPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for SkyboxPass {
    fn name(&self) -> &'static str {
        "skybox"
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        ctx.layout.validate(ctx.views)?;
        let pipeline = ctx
            .device
            .create_graphics_pipeline(GraphicsPipelineDesc {
                name: "skybox".into(),
                layout: ctx.layout.clone(),
                vertex_shader: ctx.shaders.transform_vs.clone(),
                pixel_shader: ctx.shaders.textured_ps.clone(),
                input_layout: Vertex::input_layout(),
                // The camera sits inside the cube.
                cull: CullMode::Front,
                depth: Some(DepthState {
                    func: DepthFunc::LessEqual,
                    write: false,
                }),
                color_format: Format::Rgba8Unorm,
                depth_format: Some(Format::D32Float),
            })
            .context("skybox pass setup failed")?;
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

        frame.scene.bind_frame_tables(stream, frame.views);
        frame.scene.draw_skybox(stream, frame.views);
        Ok(())
    }
}
