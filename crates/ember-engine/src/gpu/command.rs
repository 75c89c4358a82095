//! Recorded command representation consumed by the GPU timeline.

use std::sync::Arc;

use glam::Mat4;

use crate::pipeline::GraphicsPipeline;
use crate::raytracing::RaytracingPipeline;

use super::descriptor::DescriptorHandle;
use super::resource::{ResourceCell, SubresourceFootprint};
use super::state::ResourceState;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexBufferView {
    pub(crate) buffer: Arc<ResourceCell>,
    pub stride: u32,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct IndexBufferView {
    pub(crate) buffer: Arc<ResourceCell>,
    pub format: IndexFormat,
    pub size: u64,
}

/// Contiguous range of shader records inside a shader-table buffer.
#[derive(Debug, Clone)]
pub(crate) struct ShaderTableRange {
    pub buffer: Arc<ResourceCell>,
    pub offset: u64,
    pub size: u64,
    pub stride: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct DispatchRaysDesc {
    pub ray_generation: ShaderTableRange,
    pub miss: ShaderTableRange,
    pub hit_group: ShaderTableRange,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Transition {
    pub resource: Arc<ResourceCell>,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Clone)]
pub(crate) struct TopLevelInstance {
    pub blas: Arc<ResourceCell>,
    pub transform: Mat4,
    pub instance_id: u32,
    pub hit_group_offset: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum Command {
    Barrier(Vec<Transition>),
    CopyBufferRegion {
        dst: Arc<ResourceCell>,
        dst_offset: u64,
        src: Arc<ResourceCell>,
        src_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        dst: Arc<ResourceCell>,
        subresource: u32,
        src: Arc<ResourceCell>,
        footprint: SubresourceFootprint,
    },
    CopyResource {
        dst: Arc<ResourceCell>,
        src: Arc<ResourceCell>,
    },
    ClearRenderTarget {
        target: DescriptorHandle,
        color: [f32; 4],
    },
    ClearDepth {
        target: DescriptorHandle,
        depth: f32,
    },
    SetPipelineState(Arc<GraphicsPipeline>),
    SetRaytracingState(Arc<RaytracingPipeline>),
    SetDescriptorTable {
        root_index: u32,
        base: DescriptorHandle,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRenderTargets {
        color: Option<DescriptorHandle>,
        depth: Option<DescriptorHandle>,
    },
    SetVertexBuffer(VertexBufferView),
    SetIndexBuffer(IndexBufferView),
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
    BuildBottomLevel {
        dest: Arc<ResourceCell>,
        vertices: VertexBufferView,
        indices: IndexBufferView,
    },
    BuildTopLevel {
        dest: Arc<ResourceCell>,
        instances: Vec<TopLevelInstance>,
    },
    DispatchRays(DispatchRaysDesc),
}

/// A closed, submittable command list.
#[derive(Debug)]
pub struct CommandList {
    pub(crate) commands: Vec<Command>,
}

impl CommandList {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
