use crate::pipeline::{Program, ShaderBlob};

/// Export names in the ray-tracing library.
pub(crate) const RAYGEN_SHADER: &str = "RaygenShader";
pub(crate) const CLOSEST_HIT_SHADER: &str = "ClosestHitShader";
pub(crate) const MISS_SHADER: &str = "MissShader";
pub(crate) const AO_CLOSEST_HIT_SHADER: &str = "AOClosestHitShader";
pub(crate) const AO_MISS_SHADER: &str = "AOMissShader";
pub(crate) const HIT_GROUP: &str = "HitGroup";
pub(crate) const AO_HIT_GROUP: &str = "AOHitGroup";

/// Compiled shader artifacts the passes build their pipelines from.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub transform_vs: ShaderBlob,
    pub textured_ps: ShaderBlob,
    pub full_screen_vs: ShaderBlob,
    pub blit_ps: ShaderBlob,
    pub ray_tracing: ShaderBlob,
}

impl ShaderSet {
    /// The artifacts shipped with the renderer.
    pub fn builtin() -> Self {
        Self {
            transform_vs: ShaderBlob::compile("shaders.hlsl", "VSMain", Program::TransformVertex),
            textured_ps: ShaderBlob::compile("shaders.hlsl", "PSMain", Program::TexturedPixel),
            full_screen_vs: ShaderBlob::compile("blit.hlsl", "VSMain", Program::FullScreenVertex),
            blit_ps: ShaderBlob::compile("blit.hlsl", "PSMain", Program::BlitPixel),
            ray_tracing: ShaderBlob::compile_library(
                "raytracing.hlsl",
                &[
                    (RAYGEN_SHADER, Program::PrimaryRayGen),
                    (CLOSEST_HIT_SHADER, Program::ShadeClosestHit),
                    (MISS_SHADER, Program::SkyMiss),
                    (AO_CLOSEST_HIT_SHADER, Program::OcclusionClosestHit),
                    (AO_MISS_SHADER, Program::OcclusionMiss),
                ],
            ),
        }
    }
}

impl Default for ShaderSet {
    fn default() -> Self {
        Self::builtin()
    }
}
