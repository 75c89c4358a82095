use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, ensure, Context, Result};

use crate::config::SHADER_IDENTIFIER_SIZE;
use crate::pipeline::{PipelineLayout, Program, ShaderBlob, ShaderStage};
use crate::views::ViewKind;

/// Opaque handle a shader record uses to name a program in a state object.
pub type ShaderIdentifier = [u8; SHADER_IDENTIFIER_SIZE];

static NEXT_STATE_OBJECT: AtomicU64 = AtomicU64::new(1);

/// Pairs a closest-hit export with a hit-group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub name: String,
    pub closest_hit: String,
}

#[derive(Debug, Clone)]
pub struct RaytracingPipelineDesc {
    pub name: String,
    pub library: ShaderBlob,
    /// Library exports the state object includes.
    pub exports: Vec<String>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub global_layout: Arc<PipelineLayout>,
    pub local_layout: Arc<PipelineLayout>,
    /// Exports and hit groups whose records carry `local_layout` arguments.
    pub local_associations: Vec<String>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

/// A program reachable from a shader record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedProgram {
    pub program: Program,
    /// Size of the local root arguments following the identifier.
    pub local_arguments: usize,
}

/// A built ray-tracing state object.
#[derive(Debug)]
pub struct RaytracingPipeline {
    name: String,
    global_layout: Arc<PipelineLayout>,
    max_recursion_depth: u32,
    identifiers: HashMap<String, ShaderIdentifier>,
    programs: HashMap<ShaderIdentifier, ResolvedProgram>,
}

/// Depth a shading hit group needs: the primary ray plus one occlusion ray.
const SHADE_RECURSION_DEPTH: u32 = 2;

impl RaytracingPipeline {
    pub(crate) fn build(desc: RaytracingPipelineDesc) -> Result<Self> {
        let name = desc.name.clone();
        Self::build_inner(desc)
            .with_context(|| format!("failed to build ray-tracing state object '{name}'"))
    }

    fn build_inner(desc: RaytracingPipelineDesc) -> Result<Self> {
        ensure!(
            desc.library.stage() == ShaderStage::Library,
            "'{}' is not a shader library",
            desc.library.source()
        );
        ensure!(!desc.global_layout.is_local(), "global layout is a local layout");
        ensure!(desc.local_layout.is_local(), "local layout is not a local layout");
        for kind in [ViewKind::GlobalSrv, ViewKind::Uav, ViewKind::GlobalCbv] {
            ensure!(
                desc.global_layout.root_index_of(kind).is_some(),
                "global layout '{}' has no {kind:?} table",
                desc.global_layout.name()
            );
        }
        ensure!(
            (1..=31).contains(&desc.max_recursion_depth),
            "max recursion depth {} outside 1..=31",
            desc.max_recursion_depth
        );
        ensure!(desc.max_payload_size > 0, "zero payload size");
        ensure!(desc.max_attribute_size <= 32, "attributes exceed 32 bytes");

        let library: HashMap<String, Program> = desc
            .library
            .entries()?
            .into_iter()
            .map(|e| (e.name, e.program))
            .collect();

        let uid = NEXT_STATE_OBJECT.fetch_add(1, Ordering::Relaxed);
        let mut pipeline = Self {
            name: desc.name.clone(),
            global_layout: desc.global_layout.clone(),
            max_recursion_depth: desc.max_recursion_depth,
            identifiers: HashMap::new(),
            programs: HashMap::new(),
        };

        let local_size = |name: &str| {
            if desc.local_associations.iter().any(|a| a == name) {
                desc.local_layout.local_argument_size()
            } else {
                0
            }
        };

        for export in &desc.exports {
            let Some(&program) = library.get(export) else {
                bail!("export '{export}' not found in '{}'", desc.library.source());
            };
            if program.is_closest_hit() {
                // Closest-hit shaders are only reachable through a hit group.
                continue;
            }
            pipeline.register(uid, export, program, local_size(export))?;
        }

        for group in &desc.hit_groups {
            ensure!(
                desc.exports.contains(&group.closest_hit),
                "hit group '{}' references unexported '{}'",
                group.name,
                group.closest_hit
            );
            let program = library[&group.closest_hit];
            ensure!(
                program.is_closest_hit(),
                "hit group '{}': '{}' is a {program:?} program, not a closest-hit shader",
                group.name,
                group.closest_hit
            );
            if program == Program::ShadeClosestHit {
                ensure!(
                    desc.max_recursion_depth >= SHADE_RECURSION_DEPTH,
                    "hit group '{}' traces occlusion rays but max recursion depth is {}",
                    group.name,
                    desc.max_recursion_depth
                );
            }
            pipeline.register(uid, &group.name, program, local_size(&group.name))?;
        }

        for assoc in &desc.local_associations {
            ensure!(
                pipeline.identifiers.contains_key(assoc),
                "local layout associated with unknown '{assoc}'"
            );
        }
        ensure!(
            pipeline
                .programs
                .values()
                .any(|p| p.program.is_ray_generation()),
            "no ray-generation shader exported"
        );

        log::debug!(
            "built ray-tracing state object '{}' with {} shader identifiers",
            pipeline.name,
            pipeline.identifiers.len()
        );
        Ok(pipeline)
    }

    fn register(&mut self, uid: u64, name: &str, program: Program, local_arguments: usize) -> Result<()> {
        ensure!(
            !self.identifiers.contains_key(name),
            "'{name}' is declared more than once"
        );
        let mut id = [0u8; SHADER_IDENTIFIER_SIZE];
        id[..8].copy_from_slice(&uid.to_le_bytes());
        id[8..12].copy_from_slice(&(self.identifiers.len() as u32 + 1).to_le_bytes());

        self.identifiers.insert(name.to_string(), id);
        self.programs.insert(
            id,
            ResolvedProgram {
                program,
                local_arguments,
            },
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_layout(&self) -> &Arc<PipelineLayout> {
        &self.global_layout
    }

    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }

    /// Identifier of a ray-generation or miss export, or of a hit group.
    pub fn shader_identifier(&self, name: &str) -> Option<ShaderIdentifier> {
        self.identifiers.get(name).copied()
    }

    pub(crate) fn resolve(&self, identifier: &[u8]) -> Option<ResolvedProgram> {
        let id: ShaderIdentifier = identifier.try_into().ok()?;
        self.programs.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> ShaderBlob {
        ShaderBlob::compile_library(
            "raytracing.hlsl",
            &[
                ("RaygenShader", Program::PrimaryRayGen),
                ("ClosestHitShader", Program::ShadeClosestHit),
                ("MissShader", Program::SkyMiss),
                ("AOClosestHitShader", Program::OcclusionClosestHit),
                ("AOMissShader", Program::OcclusionMiss),
            ],
        )
    }

    fn desc() -> RaytracingPipelineDesc {
        RaytracingPipelineDesc {
            name: "ray tracing".into(),
            library: library(),
            exports: ["RaygenShader", "ClosestHitShader", "MissShader", "AOClosestHitShader", "AOMissShader"]
                .map(String::from)
                .to_vec(),
            hit_groups: vec![
                HitGroupDesc {
                    name: "HitGroup".into(),
                    closest_hit: "ClosestHitShader".into(),
                },
                HitGroupDesc {
                    name: "AOHitGroup".into(),
                    closest_hit: "AOClosestHitShader".into(),
                },
            ],
            global_layout: Arc::new(PipelineLayout::ray_tracing_global()),
            local_layout: Arc::new(PipelineLayout::ray_tracing_local()),
            local_associations: vec!["HitGroup".into(), "AOHitGroup".into()],
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 2,
        }
    }

    #[test]
    fn identifiers_resolve_to_programs() {
        let rt = RaytracingPipeline::build(desc()).unwrap();
        let hit = rt.shader_identifier("HitGroup").unwrap();
        let resolved = rt.resolve(&hit).unwrap();

        assert_eq!(resolved.program, Program::ShadeClosestHit);
        assert_eq!(resolved.local_arguments, 16);
        assert!(rt.shader_identifier("ClosestHitShader").is_none());
        assert_ne!(rt.shader_identifier("MissShader"), rt.shader_identifier("AOMissShader"));
    }

    #[test]
    fn identifiers_differ_between_state_objects() {
        let a = RaytracingPipeline::build(desc()).unwrap();
        let b = RaytracingPipeline::build(desc()).unwrap();
        let id = a.shader_identifier("RaygenShader").unwrap();
        assert!(b.resolve(&id).is_none());
    }

    #[test]
    fn occlusion_rays_need_recursion_depth_two() {
        let mut d = desc();
        d.max_recursion_depth = 1;
        assert!(RaytracingPipeline::build(d).is_err());
    }

    #[test]
    fn hit_group_must_name_a_closest_hit_export() {
        let mut d = desc();
        d.hit_groups[1].closest_hit = "AOMissShader".into();
        assert!(RaytracingPipeline::build(d).is_err());
    }

    #[test]
    fn missing_export_fails() {
        let mut d = desc();
        d.exports.push("ShadowMiss".into());
        assert!(RaytracingPipeline::build(d).is_err());
    }

    #[test]
    fn local_layout_must_be_local() {
        let mut d = desc();
        d.local_layout = Arc::new(PipelineLayout::raster());
        assert!(RaytracingPipeline::build(d).is_err());
    }
}
