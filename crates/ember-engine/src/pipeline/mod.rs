//! Pipeline binding layouts, shader artifacts and rasterization pipeline states.

mod graphics;
mod layout;
mod shader;

pub use graphics::{
    CullMode, DepthFunc, DepthState, GraphicsPipeline, GraphicsPipelineDesc, InputElement,
    Semantic, VertexFormat,
};
pub use layout::{PipelineLayout, RootParameter};
pub use shader::{Program, ShaderBlob, ShaderEntry, ShaderStage};
