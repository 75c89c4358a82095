use std::sync::Arc;

use anyhow::{ensure, Context, Result};

use crate::gpu::resource::Format;
use crate::views::ViewKind;

use super::layout::PipelineLayout;
use super::shader::{Program, ShaderBlob, ShaderStage};

/// Vertex attribute semantics the input assembler understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position,
    Texcoord,
    Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
}

impl VertexFormat {
    pub fn components(self) -> usize {
        match self {
            VertexFormat::Float2 => 2,
            VertexFormat::Float3 => 3,
            VertexFormat::Float4 => 4,
        }
    }

    pub fn size(self) -> u32 {
        self.components() as u32 * 4
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: Semantic,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DepthFunc {
    Less,
    LessEqual,
    Always,
}

impl DepthFunc {
    pub(crate) fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            DepthFunc::Less => incoming < stored,
            DepthFunc::LessEqual => incoming <= stored,
            DepthFunc::Always => true,
        }
    }
}

/// Which faces are discarded. Counter-clockwise triangles are front faces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DepthState {
    pub func: DepthFunc,
    pub write: bool,
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub name: String,
    pub layout: Arc<PipelineLayout>,
    pub vertex_shader: ShaderBlob,
    pub pixel_shader: ShaderBlob,
    pub input_layout: Vec<InputElement>,
    pub cull: CullMode,
    /// `None` disables depth testing and writing.
    pub depth: Option<DepthState>,
    pub color_format: Format,
    pub depth_format: Option<Format>,
}

/// A built rasterization pipeline state.
#[derive(Debug)]
pub struct GraphicsPipeline {
    name: String,
    layout: Arc<PipelineLayout>,
    vertex: Program,
    pixel: Program,
    input_layout: Vec<InputElement>,
    cull: CullMode,
    depth: Option<DepthState>,
    color_format: Format,
}

impl GraphicsPipeline {
    pub(crate) fn build(desc: GraphicsPipelineDesc) -> Result<Self> {
        let context = || format!("failed to build pipeline '{}'", desc.name);

        ensure!(!desc.layout.is_local(), "pipeline '{}' uses a local layout", desc.name);
        ensure!(
            desc.vertex_shader.stage() == ShaderStage::Vertex,
            "pipeline '{}': vertex shader is a {:?} blob",
            desc.name,
            desc.vertex_shader.stage()
        );
        ensure!(
            desc.pixel_shader.stage() == ShaderStage::Pixel,
            "pipeline '{}': pixel shader is a {:?} blob",
            desc.name,
            desc.pixel_shader.stage()
        );
        let vertex = desc.vertex_shader.entry().with_context(context)?.program;
        let pixel = desc.pixel_shader.entry().with_context(context)?.program;

        ensure!(
            desc.input_layout
                .iter()
                .any(|e| e.semantic == Semantic::Position && e.format != VertexFormat::Float2),
            "pipeline '{}' has no 3- or 4-component POSITION input",
            desc.name
        );
        for (i, a) in desc.input_layout.iter().enumerate() {
            ensure!(
                desc.input_layout[..i].iter().all(|b| b.semantic != a.semantic),
                "pipeline '{}' declares {:?} twice",
                desc.name,
                a.semantic
            );
        }
        ensure!(
            desc.color_format == Format::Rgba8Unorm,
            "pipeline '{}': unsupported render target format {:?}",
            desc.name,
            desc.color_format
        );
        if desc.depth.is_some() {
            ensure!(
                desc.depth_format == Some(Format::D32Float),
                "pipeline '{}' tests depth without a D32 depth format",
                desc.name
            );
        }
        if vertex == Program::TransformVertex {
            ensure!(
                desc.layout.root_index_of(ViewKind::GlobalCbv).is_some()
                    && desc.layout.root_index_of(ViewKind::PerObjectCbv).is_some(),
                "pipeline '{}': transform vertex shader needs global and per-object constant tables",
                desc.name
            );
        }

        log::debug!("built graphics pipeline '{}' ({vertex:?}, {pixel:?})", desc.name);

        Ok(Self {
            name: desc.name,
            layout: desc.layout,
            vertex,
            pixel,
            input_layout: desc.input_layout,
            cull: desc.cull,
            depth: desc.depth,
            color_format: desc.color_format,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    pub fn color_format(&self) -> Format {
        self.color_format
    }

    pub(crate) fn vertex_program(&self) -> Program {
        self.vertex
    }

    pub(crate) fn pixel_program(&self) -> Program {
        self.pixel
    }

    pub(crate) fn input_element(&self, semantic: Semantic) -> Option<InputElement> {
        self.input_layout.iter().copied().find(|e| e.semantic == semantic)
    }

    pub(crate) fn cull(&self) -> CullMode {
        self.cull
    }

    pub(crate) fn depth(&self) -> Option<DepthState> {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            name: "opaque".into(),
            layout: Arc::new(PipelineLayout::raster()),
            vertex_shader: ShaderBlob::compile("shaders.hlsl", "VSMain", Program::TransformVertex),
            pixel_shader: ShaderBlob::compile("shaders.hlsl", "PSMain", Program::TexturedPixel),
            input_layout: vec![InputElement {
                semantic: Semantic::Position,
                format: VertexFormat::Float3,
                offset: 0,
            }],
            cull: CullMode::Back,
            depth: Some(DepthState {
                func: DepthFunc::Less,
                write: true,
            }),
            color_format: Format::Rgba8Unorm,
            depth_format: Some(Format::D32Float),
        }
    }

    #[test]
    fn valid_desc_builds() {
        let pipeline = GraphicsPipeline::build(desc()).unwrap();
        assert_eq!(pipeline.vertex_program(), Program::TransformVertex);
        assert!(pipeline.input_element(Semantic::Color).is_none());
    }

    #[test]
    fn swapped_stages_fail() {
        let mut d = desc();
        std::mem::swap(&mut d.vertex_shader, &mut d.pixel_shader);
        assert!(GraphicsPipeline::build(d).is_err());
    }

    #[test]
    fn missing_position_fails() {
        let mut d = desc();
        d.input_layout[0].semantic = Semantic::Color;
        assert!(GraphicsPipeline::build(d).is_err());
    }

    #[test]
    fn depth_test_requires_depth_format() {
        let mut d = desc();
        d.depth_format = None;
        assert!(GraphicsPipeline::build(d).is_err());
    }
}
