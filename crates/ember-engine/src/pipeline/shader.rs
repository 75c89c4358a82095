//! Compiled shader artifacts.
//!
//! Passes treat blobs as opaque. The reference adapter reads a small header:
//!
//! ```text
//! "EMBR" | stage: u8 | entry count: u8 | { program: u8 | name len: u8 | name bytes }*
//! ```
//!
//! Vertex and pixel blobs carry exactly one entry; library blobs carry one per export.

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};

const MAGIC: &[u8; 4] = b"EMBR";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Library,
}

impl ShaderStage {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ShaderStage::Vertex,
            1 => ShaderStage::Pixel,
            2 => ShaderStage::Library,
            _ => return None,
        })
    }
}

/// Programs understood by the reference adapter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Program {
    /// Object space to clip space through the world and view-projection constants.
    TransformVertex,
    /// Position is already in clip space.
    FullScreenVertex,
    /// Per-object texture modulated by vertex colour.
    TexturedPixel,
    /// Samples the global shader-resource table.
    BlitPixel,
    PrimaryRayGen,
    /// Lit surface with ambient occlusion; reads its albedo from local arguments.
    ShadeClosestHit,
    SkyMiss,
    OcclusionClosestHit,
    OcclusionMiss,
}

impl Program {
    const ALL: [Program; 9] = [
        Program::TransformVertex,
        Program::FullScreenVertex,
        Program::TexturedPixel,
        Program::BlitPixel,
        Program::PrimaryRayGen,
        Program::ShadeClosestHit,
        Program::SkyMiss,
        Program::OcclusionClosestHit,
        Program::OcclusionMiss,
    ];

    pub fn stage(self) -> ShaderStage {
        match self {
            Program::TransformVertex | Program::FullScreenVertex => ShaderStage::Vertex,
            Program::TexturedPixel | Program::BlitPixel => ShaderStage::Pixel,
            _ => ShaderStage::Library,
        }
    }

    pub fn is_ray_generation(self) -> bool {
        self == Program::PrimaryRayGen
    }

    pub fn is_closest_hit(self) -> bool {
        matches!(self, Program::ShadeClosestHit | Program::OcclusionClosestHit)
    }

    pub fn is_miss(self) -> bool {
        matches!(self, Program::SkyMiss | Program::OcclusionMiss)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEntry {
    pub name: String,
    pub program: Program,
}

/// An immutable compiled shader.
#[derive(Clone, PartialEq, Eq)]
pub struct ShaderBlob {
    source: String,
    stage: ShaderStage,
    bytes: Arc<[u8]>,
}

impl ShaderBlob {
    /// Wraps compiled bytes produced for `stage` from `source`.
    pub fn from_bytes(source: impl Into<String>, stage: ShaderStage, bytes: Vec<u8>) -> Self {
        Self {
            source: source.into(),
            stage,
            bytes: bytes.into(),
        }
    }

    /// Compiles a single-entry vertex or pixel blob for the reference adapter.
    pub fn compile(source: &str, entry: &str, program: Program) -> Self {
        Self::from_bytes(source, program.stage(), encode(program.stage(), &[(entry, program)]))
    }

    /// Compiles a ray-tracing library exporting `exports`.
    pub fn compile_library(source: &str, exports: &[(&str, Program)]) -> Self {
        Self::from_bytes(source, ShaderStage::Library, encode(ShaderStage::Library, exports))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parses the blob header and checks it against the declared stage.
    pub fn entries(&self) -> Result<Vec<ShaderEntry>> {
        let entries = parse(&self.bytes)
            .with_context(|| format!("malformed shader blob '{}'", self.source))?;

        for entry in &entries {
            ensure!(
                entry.program.stage() == self.stage,
                "shader '{}' entry '{}' is a {:?} program in a {:?} blob",
                self.source,
                entry.name,
                entry.program.stage(),
                self.stage
            );
        }
        if self.stage != ShaderStage::Library {
            ensure!(
                entries.len() == 1,
                "{:?} shader '{}' must have exactly one entry point",
                self.stage,
                self.source
            );
        }
        Ok(entries)
    }

    /// The single entry of a vertex or pixel blob.
    pub fn entry(&self) -> Result<ShaderEntry> {
        let mut entries = self.entries()?;
        ensure!(
            self.stage != ShaderStage::Library,
            "library '{}' has no single entry point",
            self.source
        );
        Ok(entries.remove(0))
    }
}

impl std::fmt::Debug for ShaderBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderBlob")
            .field("source", &self.source)
            .field("stage", &self.stage)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn encode(stage: ShaderStage, entries: &[(&str, Program)]) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.push(stage as u8);
    out.push(entries.len() as u8);
    for (name, program) in entries {
        out.push(*program as u8);
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }
    out
}

fn parse(bytes: &[u8]) -> Result<Vec<ShaderEntry>> {
    ensure!(bytes.len() >= 6 && &bytes[..4] == MAGIC, "missing header");
    let stage = ShaderStage::from_u8(bytes[4]).context("unknown stage")?;
    let count = bytes[5] as usize;

    let mut entries = Vec::with_capacity(count);
    let mut at = 6;
    for _ in 0..count {
        let (program, len) = match bytes.get(at..at + 2) {
            Some(&[program, len]) => (program, len),
            _ => bail!("truncated entry table"),
        };
        let program = Program::ALL
            .get(program as usize)
            .copied()
            .context("unknown program")?;
        let name = bytes
            .get(at + 2..at + 2 + len as usize)
            .context("truncated entry name")?;
        let name = std::str::from_utf8(name).context("entry name is not UTF-8")?;
        ensure!(
            program.stage() == stage,
            "entry '{name}' does not match header stage {stage:?}"
        );
        entries.push(ShaderEntry {
            name: name.to_string(),
            program,
        });
        at += 2 + len as usize;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_blob_exposes_its_entry() {
        let vs = ShaderBlob::compile("shaders.hlsl", "VSMain", Program::TransformVertex);
        let entry = vs.entry().unwrap();

        assert_eq!(vs.stage(), ShaderStage::Vertex);
        assert_eq!(entry.name, "VSMain");
        assert_eq!(entry.program, Program::TransformVertex);
    }

    #[test]
    fn stage_mismatch_is_malformed() {
        let pixel_bytes = ShaderBlob::compile("ps.hlsl", "PSMain", Program::TexturedPixel)
            .bytes()
            .to_vec();
        let mislabeled = ShaderBlob::from_bytes("ps.hlsl", ShaderStage::Vertex, pixel_bytes);

        assert!(mislabeled.entries().is_err());
    }

    #[test]
    fn garbage_is_malformed() {
        let blob = ShaderBlob::from_bytes("x", ShaderStage::Pixel, vec![1, 2, 3]);
        assert!(blob.entry().is_err());
    }

    #[test]
    fn library_lists_every_export() {
        let lib = ShaderBlob::compile_library(
            "raytracing.hlsl",
            &[("RaygenShader", Program::PrimaryRayGen), ("MissShader", Program::SkyMiss)],
        );
        let names: Vec<_> = lib.entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["RaygenShader", "MissShader"]);
        assert!(lib.entry().is_err());
    }
}
