//! Command list execution for the software reference adapter.
//!
//! Runs on the GPU timeline thread. Every error removes the device.

mod raster;
mod raytrace;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use glam::{Mat4, Vec3, Vec4};

use crate::pipeline::{GraphicsPipeline, PipelineLayout};
use crate::raytracing::RaytracingPipeline;
use crate::views::ViewKind;

use super::accel::{AccelData, BottomLevel, WorldInstance};
use super::command::{
    Command, CommandList, IndexBufferView, IndexFormat, ScissorRect, TopLevelInstance,
    Transition, VertexBufferView, Viewport,
};
use super::descriptor::{Descriptor, DescriptorHandle, SamplerDesc, SrvDimension, ViewDesc};
use super::resource::{rgba8, Format, ResourceCell, SubresourceFootprint};
use super::state::ResourceState;

/// Pipeline and binding state. Command lists do not inherit it from each other.
#[derive(Default)]
struct Bindings {
    graphics: Option<Arc<GraphicsPipeline>>,
    raytracing: Option<Arc<RaytracingPipeline>>,
    layout: Option<Arc<PipelineLayout>>,
    tables: HashMap<u32, DescriptorHandle>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    color: Option<DescriptorHandle>,
    depth: Option<DescriptorHandle>,
    vertex: Option<VertexBufferView>,
    index: Option<IndexBufferView>,
}

pub(crate) struct Executor {
    validation: bool,
    bindings: Bindings,
}

impl Executor {
    pub(crate) fn new(validation: bool) -> Self {
        Self {
            validation,
            bindings: Bindings::default(),
        }
    }

    pub(crate) fn execute(&mut self, list: &CommandList) -> Result<()> {
        self.bindings = Bindings::default();
        for (index, command) in list.commands.iter().enumerate() {
            self.run(command)
                .with_context(|| format!("command {index} of {}", list.len()))?;
        }
        Ok(())
    }

    fn run(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Barrier(transitions) => self.barrier(transitions),
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => self.copy_buffer_region(dst, *dst_offset, src, *src_offset, *size),
            Command::CopyTextureRegion {
                dst,
                subresource,
                src,
                footprint,
            } => self.copy_texture_region(dst, *subresource, src, footprint),
            Command::CopyResource { dst, src } => self.copy_resource(dst, src),
            Command::ClearRenderTarget { target, color } => {
                let cell = self.view_target(target, ViewDesc::RenderTarget)?;
                self.check_state(&cell, |s| s == ResourceState::RenderTarget, "render target clear")?;
                let texel = rgba8(*color);
                fill(&cell, &texel);
                Ok(())
            }
            Command::ClearDepth { target, depth } => {
                let cell = self.view_target(target, ViewDesc::DepthStencil)?;
                self.check_state(&cell, |s| s == ResourceState::DepthWrite, "depth clear")?;
                fill(&cell, &depth.to_le_bytes());
                Ok(())
            }
            Command::SetPipelineState(pipeline) => {
                self.bind_layout(pipeline.layout());
                self.bindings.graphics = Some(pipeline.clone());
                Ok(())
            }
            Command::SetRaytracingState(pipeline) => {
                self.bind_layout(pipeline.global_layout());
                self.bindings.raytracing = Some(pipeline.clone());
                Ok(())
            }
            Command::SetDescriptorTable { root_index, base } => {
                let layout = self
                    .bindings
                    .layout
                    .as_ref()
                    .context("descriptor table set before any layout")?;
                ensure!(
                    layout.root_index_of(base.kind()) == Some(*root_index),
                    "{:?} table bound to root index {root_index} of layout '{}'",
                    base.kind(),
                    layout.name()
                );
                self.bindings.tables.insert(*root_index, base.clone());
                Ok(())
            }
            Command::SetViewport(viewport) => {
                self.bindings.viewport = Some(*viewport);
                Ok(())
            }
            Command::SetScissor(rect) => {
                self.bindings.scissor = Some(*rect);
                Ok(())
            }
            Command::SetRenderTargets { color, depth } => {
                self.bindings.color = color.clone();
                self.bindings.depth = depth.clone();
                Ok(())
            }
            Command::SetVertexBuffer(view) => {
                self.bindings.vertex = Some(view.clone());
                Ok(())
            }
            Command::SetIndexBuffer(view) => {
                self.bindings.index = Some(view.clone());
                Ok(())
            }
            Command::DrawIndexedInstanced {
                index_count,
                instance_count,
                start_index,
                base_vertex,
            } => raster::draw(
                self,
                raster::DrawArgs {
                    index_count: *index_count,
                    instance_count: *instance_count,
                    start_index: *start_index,
                    base_vertex: *base_vertex,
                },
            ),
            Command::BuildBottomLevel {
                dest,
                vertices,
                indices,
            } => self.build_bottom_level(dest, vertices, indices),
            Command::BuildTopLevel { dest, instances } => self.build_top_level(dest, instances),
            Command::DispatchRays(desc) => raytrace::dispatch(self, desc),
        }
    }

    fn bind_layout(&mut self, layout: &Arc<PipelineLayout>) {
        if self.bindings.layout.as_deref() != Some(layout.as_ref()) {
            self.bindings.tables.clear();
            self.bindings.layout = Some(layout.clone());
        }
    }

    fn check_live(&self, cell: &ResourceCell) -> Result<()> {
        ensure!(
            !cell.is_released(),
            "use of released resource {} '{}'",
            cell.id(),
            cell.name()
        );
        Ok(())
    }

    /// Checks that `cell` is alive and, with validation on, in an accepted state.
    fn check_state(
        &self,
        cell: &ResourceCell,
        accepted: impl Fn(ResourceState) -> bool,
        usage: &str,
    ) -> Result<()> {
        self.check_live(cell)?;
        if self.validation {
            let actual = cell.actual_state();
            ensure!(
                accepted(actual),
                "'{}' used for {usage} in state {actual}",
                cell.name()
            );
        }
        Ok(())
    }

    fn barrier(&self, transitions: &[Transition]) -> Result<()> {
        for t in transitions {
            self.check_live(&t.resource)?;
            let actual = t.resource.actual_state();
            if self.validation {
                ensure!(
                    actual == t.before,
                    "barrier on '{}' expects {} but the resource is in {actual}",
                    t.resource.name(),
                    t.before
                );
            }
            t.resource.set_actual_state(t.after);
        }
        Ok(())
    }

    fn copy_buffer_region(
        &self,
        dst: &ResourceCell,
        dst_offset: u64,
        src: &ResourceCell,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.check_state(src, ResourceState::is_copy_readable, "copy source")?;
        self.check_state(dst, |s| s == ResourceState::CopyDest, "copy destination")?;
        ensure!(
            !src.desc().is_texture() && !dst.desc().is_texture(),
            "buffer copy between '{}' and '{}' involves a texture",
            src.name(),
            dst.name()
        );
        ensure!(
            src_offset + size <= src.desc().byte_size() && dst_offset + size <= dst.desc().byte_size(),
            "buffer copy of {size} bytes out of bounds ('{}' -> '{}')",
            src.name(),
            dst.name()
        );

        let bytes = src.data()[src_offset as usize..(src_offset + size) as usize].to_vec();
        dst.data()[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&bytes);
        Ok(())
    }

    fn copy_texture_region(
        &self,
        dst: &ResourceCell,
        subresource: u32,
        src: &ResourceCell,
        footprint: &SubresourceFootprint,
    ) -> Result<()> {
        self.check_state(src, ResourceState::is_copy_readable, "texture copy source")?;
        self.check_state(dst, |s| s == ResourceState::CopyDest, "texture copy destination")?;
        let desc = dst.desc();
        let format = desc.format().context("texture copy into a buffer")?;
        ensure!(
            subresource < desc.subresource_count(),
            "subresource {subresource} out of range for '{}'",
            dst.name()
        );
        ensure!(
            desc.extent(subresource) == (footprint.width, footprint.height),
            "footprint {}x{} does not match subresource {subresource} of '{}'",
            footprint.width,
            footprint.height,
            dst.name()
        );
        ensure!(
            footprint.row_size == footprint.width as u64 * format.bytes_per_pixel()
                && footprint.row_pitch >= footprint.row_size,
            "inconsistent footprint for '{}'",
            dst.name()
        );
        ensure!(
            footprint.offset + footprint.total_bytes() <= src.desc().byte_size(),
            "footprint overruns '{}'",
            src.name()
        );

        let staged = src.data().clone();
        let mut texels = dst.data();
        let base = desc.storage_offset(subresource) as usize;
        let row = footprint.row_size as usize;
        for y in 0..footprint.height as usize {
            let from = (footprint.offset + y as u64 * footprint.row_pitch) as usize;
            let to = base + y * row;
            texels[to..to + row].copy_from_slice(&staged[from..from + row]);
        }
        Ok(())
    }

    fn copy_resource(&self, dst: &ResourceCell, src: &ResourceCell) -> Result<()> {
        self.check_state(src, |s| s == ResourceState::CopySource, "copy source")?;
        self.check_state(dst, |s| s == ResourceState::CopyDest, "copy destination")?;
        ensure!(
            src.desc() == dst.desc(),
            "copy between mismatched resources '{}' and '{}'",
            src.name(),
            dst.name()
        );
        let bytes = src.data().clone();
        dst.data().copy_from_slice(&bytes);
        Ok(())
    }

    fn build_bottom_level(
        &self,
        dest: &ResourceCell,
        vertices: &VertexBufferView,
        indices: &IndexBufferView,
    ) -> Result<()> {
        self.check_state(dest, |s| s == ResourceState::AccelerationStructure, "acceleration structure")?;
        self.check_state(&vertices.buffer, ResourceState::is_shader_readable, "build vertices")?;
        self.check_state(
            &indices.buffer,
            |s| s == ResourceState::IndexBuffer || s.is_shader_readable(),
            "build indices",
        )?;

        let positions = read_positions(vertices)?;
        let indices = read_indices(indices, 0, (indices.size / indices.format.size()) as u32)?;
        ensure!(indices.len() % 3 == 0, "index count is not a multiple of 3");

        let mut triangles = Vec::with_capacity(indices.len() / 3);
        for tri in indices.chunks_exact(3) {
            let mut corners = [Vec3::ZERO; 3];
            for (corner, &i) in corners.iter_mut().zip(tri) {
                *corner = *positions
                    .get(i as usize)
                    .with_context(|| format!("index {i} outside {} vertices", positions.len()))?;
            }
            triangles.push(corners);
        }

        dest.set_accel(AccelData::Bottom(BottomLevel { triangles }));
        Ok(())
    }

    fn build_top_level(&self, dest: &ResourceCell, instances: &[TopLevelInstance]) -> Result<()> {
        self.check_state(dest, |s| s == ResourceState::AccelerationStructure, "acceleration structure")?;

        let mut world = Vec::with_capacity(instances.len());
        for instance in instances {
            self.check_state(
                &instance.blas,
                |s| s == ResourceState::AccelerationStructure,
                "bottom-level instance",
            )?;
            let Some(accel) = instance.blas.accel() else {
                bail!("'{}' has not been built", instance.blas.name());
            };
            let AccelData::Bottom(blas) = accel.as_ref() else {
                bail!("'{}' is not a bottom-level structure", instance.blas.name());
            };
            world.push(WorldInstance::new(
                blas,
                instance.transform,
                instance.instance_id,
                instance.hit_group_offset,
            ));
        }

        dest.set_accel(AccelData::Top(world));
        Ok(())
    }

    /// Resolves a render-target or depth-stencil handle to its resource.
    fn view_target(&self, handle: &DescriptorHandle, expected: ViewDesc) -> Result<Arc<ResourceCell>> {
        let descriptor = handle
            .read()
            .with_context(|| format!("empty descriptor {handle:?}"))?;
        let (cell, view) = descriptor
            .resource()
            .with_context(|| format!("{handle:?} holds a sampler"))?;
        ensure!(view == expected, "{handle:?} is {view:?}, expected {expected:?}");
        Ok(cell.clone())
    }

    /// Descriptor at the base of the table bound for `kind`, if any.
    fn bound(&self, layout: &PipelineLayout, kind: ViewKind) -> Option<Descriptor> {
        let root_index = layout.root_index_of(kind)?;
        self.bindings.tables.get(&root_index)?.read()
    }

    /// Bytes of the constant buffer bound for `kind`.
    fn constants(&self, layout: &PipelineLayout, kind: ViewKind) -> Result<Vec<u8>> {
        let descriptor = self
            .bound(layout, kind)
            .with_context(|| format!("no {kind:?} constant buffer bound"))?;
        let Some((cell, ViewDesc::ConstantBuffer { offset, size })) = descriptor.resource() else {
            bail!("{kind:?} table does not hold a constant buffer view");
        };
        self.check_state(cell, ResourceState::is_shader_readable, "constant buffer")?;
        let data = cell.data();
        let bytes = data
            .get(offset as usize..(offset + size) as usize)
            .map(<[u8]>::to_vec)
            .with_context(|| format!("constant view overruns '{}'", cell.name()))?;
        Ok(bytes)
    }

    fn sampler(&self, layout: &PipelineLayout) -> SamplerDesc {
        match self.bound(layout, ViewKind::Sampler) {
            Some(Descriptor::Sampler(desc)) => desc,
            _ => SamplerDesc::default(),
        }
    }

    /// Mip 0 of the texture bound for `kind`, if any.
    fn texture(&self, layout: &PipelineLayout, kind: ViewKind) -> Result<Option<raster::Texture>> {
        let Some(descriptor) = self.bound(layout, kind) else {
            return Ok(None);
        };
        let Some((cell, ViewDesc::ShaderResource(SrvDimension::Texture2D))) = descriptor.resource()
        else {
            bail!("{kind:?} table does not hold a texture view");
        };
        self.check_state(cell, ResourceState::is_shader_readable, "texture")?;
        ensure!(
            cell.desc().format() == Some(Format::Rgba8Unorm),
            "'{}' is not an RGBA8 texture",
            cell.name()
        );
        let (width, height) = cell.desc().extent(0);
        let len = cell.desc().subresource_size(0) as usize;
        let texels = cell.data()[..len].to_vec();
        Ok(Some(raster::Texture {
            width,
            height,
            texels,
        }))
    }
}

fn fill(cell: &ResourceCell, texel: &[u8]) {
    let mut data = cell.data();
    for chunk in data.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

pub(super) fn read_mat4(bytes: &[u8], offset: usize) -> Result<Mat4> {
    let raw = bytes
        .get(offset..offset + 64)
        .context("constant buffer too small for a matrix")?;
    Ok(Mat4::from_cols_array(&bytemuck::pod_read_unaligned(raw)))
}

pub(super) fn read_vec4(bytes: &[u8], offset: usize) -> Result<Vec4> {
    let raw = bytes
        .get(offset..offset + 16)
        .context("buffer too small for a vector")?;
    Ok(Vec4::from_array(bytemuck::pod_read_unaligned(raw)))
}

/// Positions, taken as the first three floats of each vertex.
fn read_positions(view: &VertexBufferView) -> Result<Vec<Vec3>> {
    ensure!(view.stride >= 12, "vertex stride {} is too small", view.stride);
    let data = view.buffer.data();
    let count = (view.size.min(data.len() as u64) / view.stride as u64) as usize;
    Ok((0..count)
        .map(|i| {
            let at = i * view.stride as usize;
            Vec3::from_array(bytemuck::pod_read_unaligned(&data[at..at + 12]))
        })
        .collect())
}

fn read_indices(view: &IndexBufferView, start: u32, count: u32) -> Result<Vec<u32>> {
    let data = view.buffer.data();
    let size = view.format.size() as usize;
    let begin = start as usize * size;
    let end = begin + count as usize * size;
    ensure!(
        end as u64 <= view.size.min(data.len() as u64),
        "indices {start}..{} overrun '{}'",
        start + count,
        view.buffer.name()
    );
    Ok(data[begin..end]
        .chunks_exact(size)
        .map(|c| match view.format {
            IndexFormat::U16 => u16::from_le_bytes([c[0], c[1]]) as u32,
            IndexFormat::U32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
        })
        .collect())
}
