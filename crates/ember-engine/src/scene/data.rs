use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::pipeline::{InputElement, Semantic, VertexFormat};

/// Interleaved vertex shared by every mesh the renderer draws.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn new(position: [f32; 3], texcoord: [f32; 2], color: [f32; 4]) -> Self {
        Self {
            position,
            texcoord,
            color,
        }
    }

    /// Input layout matching the field order above.
    pub fn input_layout() -> Vec<InputElement> {
        vec![
            InputElement {
                semantic: Semantic::Position,
                format: VertexFormat::Float3,
                offset: 0,
            },
            InputElement {
                semantic: Semantic::Texcoord,
                format: VertexFormat::Float2,
                offset: 12,
            },
            InputElement {
                semantic: Semantic::Color,
                format: VertexFormat::Float4,
                offset: 20,
            },
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// RGBA8 pixel data, one tightly packed image per mip level.
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mips: Vec<Vec<u8>>,
}

impl TextureImage {
    pub fn subresource_count(&self) -> u32 {
        self.mips.len() as u32
    }
}

/// Surface description. Textures are referenced by id, not owned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Material {
    Lit { albedo: Vec4, texture: Option<u32> },
    Skybox { texture: u32 },
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub id: u32,
    pub name: String,
    pub mesh: MeshData,
    pub material: Material,
    pub transform: Mat4,
}

/// Everything a scene loader produces.
#[derive(Debug, Clone)]
pub struct SceneData {
    pub objects: Vec<SceneObject>,
    pub skybox: SceneObject,
    pub textures: Vec<TextureImage>,
}

impl SceneData {
    pub fn texture(&self, id: u32) -> Option<&TextureImage> {
        self.textures.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_layout_matches_vertex_fields() {
        assert_eq!(Vertex::STRIDE, 36);
        let layout = Vertex::input_layout();
        assert_eq!(layout[1].offset as usize, std::mem::offset_of!(Vertex, texcoord));
        assert_eq!(layout[2].offset as usize, std::mem::offset_of!(Vertex, color));
    }
}
