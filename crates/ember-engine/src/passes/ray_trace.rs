use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command::{CommandStream, DispatchRays};
use crate::pipeline::PipelineLayout;
use crate::raytracing::{
    HitGroupDesc, RaytracingPipeline, RaytracingPipelineDesc, ShaderIdentifier, ShaderRecord,
    ShaderTable,
};
use crate::views::ViewKind;

use super::shaders::{
    AO_CLOSEST_HIT_SHADER, AO_HIT_GROUP, AO_MISS_SHADER, CLOSEST_HIT_SHADER, HIT_GROUP,
    MISS_SHADER, RAYGEN_SHADER,
};
use super::{not_set_up, FrameContext, RenderPass, SetupContext};

const MAX_PAYLOAD_SIZE: u32 = 16;
const MAX_ATTRIBUTE_SIZE: u32 = 8;
/// Primary rays plus the occlusion rays their hits trace.
const MAX_RECURSION_DEPTH: u32 = 2;

struct Built {
    pipeline: Arc<RaytracingPipeline>,
    ray_generation: ShaderTable,
    miss: ShaderTable,
    hit_group: ShaderTable,
}

/// Traces the scene into the ray-tracing output image.
///
/// Owns the state object and its three shader tables. The hit-group table
/// holds one record per ray type for every instance, in instance order.
#[derive(Default)]
pub struct RayTracePass {
    built: Option<Built>,
}

impl RayTracePass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader_tables(&self) -> Option<[&ShaderTable; 3]> {
        self.built
            .as_ref()
            .map(|b| [&b.ray_generation, &b.miss, &b.hit_group])
    }
}

fn identifier(pipeline: &RaytracingPipeline, name: &str) -> Result<ShaderIdentifier> {
    pipeline
        .shader_identifier(name)
        .with_context(|| format!("state object '{}' has no export '{name}'", pipeline.name()))
}

impl RenderPass for RayTracePass {
    fn name(&self) -> &'static str {
        "ray trace"
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        let global_layout = Arc::new(PipelineLayout::ray_tracing_global());
        global_layout.validate(ctx.views)?;
        let local_layout = Arc::new(PipelineLayout::ray_tracing_local());

        let pipeline = ctx.device.create_raytracing_pipeline(RaytracingPipelineDesc {
            name: "ray tracing".into(),
            library: ctx.shaders.ray_tracing.clone(),
            exports: [
                RAYGEN_SHADER,
                CLOSEST_HIT_SHADER,
                MISS_SHADER,
                AO_CLOSEST_HIT_SHADER,
                AO_MISS_SHADER,
            ]
            .map(String::from)
            .to_vec(),
            hit_groups: vec![
                HitGroupDesc {
                    name: HIT_GROUP.into(),
                    closest_hit: CLOSEST_HIT_SHADER.into(),
                },
                HitGroupDesc {
                    name: AO_HIT_GROUP.into(),
                    closest_hit: AO_CLOSEST_HIT_SHADER.into(),
                },
            ],
            global_layout,
            local_layout: local_layout.clone(),
            local_associations: vec![HIT_GROUP.into(), AO_HIT_GROUP.into()],
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_attribute_size: MAX_ATTRIBUTE_SIZE,
            max_recursion_depth: MAX_RECURSION_DEPTH,
        })?;

        let ray_generation = ShaderTable::build(
            ctx.device,
            "ray generation table",
            &[ShaderRecord::new(identifier(&pipeline, RAYGEN_SHADER)?)],
        )?;
        let miss = ShaderTable::build(
            ctx.device,
            "miss table",
            &[
                ShaderRecord::new(identifier(&pipeline, MISS_SHADER)?),
                ShaderRecord::new(identifier(&pipeline, AO_MISS_SHADER)?),
            ],
        )?;

        let shade = identifier(&pipeline, HIT_GROUP)?;
        let occlusion = identifier(&pipeline, AO_HIT_GROUP)?;
        let mut records = Vec::new();
        for albedo in ctx.scene.instance_albedos() {
            let arguments = bytemuck::bytes_of(&albedo);
            debug_assert_eq!(arguments.len(), local_layout.local_argument_size());
            records.push(ShaderRecord::with_arguments(shade, arguments));
            records.push(ShaderRecord::with_arguments(occlusion, arguments));
        }
        let hit_group = ShaderTable::build(ctx.device, "hit group table", &records)?;

        log::debug!(
            "ray tracing pass ready: {} hit-group records of {} bytes",
            hit_group.record_count(),
            hit_group.stride()
        );
        self.built = Some(Built {
            pipeline,
            ray_generation,
            miss,
            hit_group,
        });
        Ok(())
    }

    fn execute(&self, stream: &mut CommandStream, frame: &FrameContext<'_>) -> Result<()> {
        let built = self.built.as_ref().ok_or_else(|| not_set_up(self.name()))?;

        stream.set_raytracing_state(&built.pipeline);
        frame
            .views
            .bind_views_for_draw(stream, ViewKind::GlobalSrv, frame.scene.tlas_slot());
        frame
            .views
            .bind_views_for_draw(stream, ViewKind::Uav, frame.targets.output_uav_slot());
        frame
            .views
            .bind_views_for_draw(stream, ViewKind::GlobalCbv, frame.scene.global_cbv_slot());

        stream.dispatch_rays(&DispatchRays {
            ray_generation: &built.ray_generation,
            miss: &built.miss,
            hit_group: &built.hit_group,
            width: frame.targets.width(),
            height: frame.targets.height(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SHADER_IDENTIFIER_SIZE;
    use crate::testing::{two_cube_scene, RayTraceRig, BLUE, RED};

    fn record(table: &ShaderTable, index: u32) -> Vec<u8> {
        table
            .buffer()
            .read_bytes(index as u64 * table.stride(), table.stride() as usize)
    }

    #[test]
    fn hit_groups_hold_one_record_per_ray_type_per_instance() {
        let rig = RayTraceRig::new(8, 8, two_cube_scene);
        let [ray_generation, miss, hit_group] = rig.pass.shader_tables().unwrap();
        let pipeline = &rig.pass.built.as_ref().unwrap().pipeline;
        let id = |name: &str| pipeline.shader_identifier(name).unwrap();

        assert_eq!(ray_generation.record_count(), 1);
        assert_eq!(miss.record_count(), 2);
        assert_eq!(hit_group.record_count(), 4);

        assert_eq!(record(miss, 0)[..SHADER_IDENTIFIER_SIZE], id(MISS_SHADER));
        assert_eq!(record(miss, 1)[..SHADER_IDENTIFIER_SIZE], id(AO_MISS_SHADER));

        for (i, albedo) in [RED, BLUE].into_iter().enumerate() {
            let arguments = bytemuck::bytes_of(&albedo);
            let end = SHADER_IDENTIFIER_SIZE + arguments.len();

            let shade = record(hit_group, 2 * i as u32);
            assert_eq!(shade[..SHADER_IDENTIFIER_SIZE], id(HIT_GROUP));
            assert_eq!(&shade[SHADER_IDENTIFIER_SIZE..end], arguments);

            let occlusion = record(hit_group, 2 * i as u32 + 1);
            assert_eq!(occlusion[..SHADER_IDENTIFIER_SIZE], id(AO_HIT_GROUP));
            assert_eq!(&occlusion[SHADER_IDENTIFIER_SIZE..end], arguments);
        }
    }

    #[test]
    fn tables_exist_only_after_setup() {
        let rig = RayTraceRig::new(4, 4, two_cube_scene);
        assert!(RayTracePass::new().shader_tables().is_none());
        assert!(rig.pass.shader_tables().is_some());
    }
}
