//! Fixed-function triangle rasterizer.

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use glam::{Mat4, Vec2, Vec4};

use crate::pipeline::{CullMode, InputElement, Program, Semantic};
use crate::views::ViewKind;

use super::super::command::{IndexBufferView, Viewport};
use super::super::descriptor::{AddressMode, Filter, SamplerDesc, ViewDesc};
use super::super::state::ResourceState;
use super::{read_indices, read_mat4, Executor};

pub(super) struct DrawArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
}

/// Snapshot of mip 0 of an RGBA8 texture.
pub(super) struct Texture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

impl Texture {
    fn fetch(&self, x: i64, y: i64, address: AddressMode) -> Vec4 {
        let (w, h) = (self.width as i64, self.height as i64);
        let (x, y) = match address {
            AddressMode::Wrap => (x.rem_euclid(w), y.rem_euclid(h)),
            AddressMode::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
        };
        let at = ((y * w + x) * 4) as usize;
        let t = &self.texels[at..at + 4];
        Vec4::new(t[0] as f32, t[1] as f32, t[2] as f32, t[3] as f32) / 255.0
    }

    pub(super) fn sample(&self, uv: Vec2, sampler: SamplerDesc) -> Vec4 {
        let x = uv.x * self.width as f32;
        let y = uv.y * self.height as f32;
        match sampler.filter {
            Filter::Point => self.fetch(x.floor() as i64, y.floor() as i64, sampler.address),
            Filter::Linear => {
                let (fx, fy) = (x - 0.5, y - 0.5);
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let a = sampler.address;
                let top = self.fetch(x0, y0, a).lerp(self.fetch(x0 + 1, y0, a), tx);
                let bottom = self.fetch(x0, y0 + 1, a).lerp(self.fetch(x0 + 1, y0 + 1, a), tx);
                top.lerp(bottom, ty)
            }
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
struct ClipVertex {
    position: Vec4,
    uv: Vec2,
    color: Vec4,
}

impl ClipVertex {
    fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            uv: self.uv.lerp(other.uv, t),
            color: self.color.lerp(other.color, t),
        }
    }
}

/// Post-divide vertex; attributes are pre-multiplied by `inv_w`.
#[derive(Debug, Copy, Clone)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    uv: Vec2,
    color: Vec4,
}

struct Stage {
    transform: Mat4,
    position: InputElement,
    texcoord: Option<InputElement>,
    color: Option<InputElement>,
    stride: usize,
}

impl Stage {
    fn fetch(&self, vertices: &[u8], index: usize) -> Result<ClipVertex> {
        let base = index * self.stride;
        let read = |element: InputElement| -> Result<Vec4> {
            let at = base + element.offset as usize;
            let n = element.format.components();
            let raw = vertices
                .get(at..at + n * 4)
                .with_context(|| format!("vertex {index} outside the vertex buffer"))?;
            let mut v = Vec4::new(0.0, 0.0, 0.0, 1.0);
            for (i, c) in raw.chunks_exact(4).enumerate() {
                v[i] = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            }
            Ok(v)
        };

        let object = read(self.position)?;
        Ok(ClipVertex {
            position: self.transform * object.truncate().extend(1.0),
            uv: match self.texcoord {
                Some(e) => read(e)?.truncate().truncate(),
                None => Vec2::ZERO,
            },
            color: match self.color {
                Some(e) => read(e)?,
                None => Vec4::ONE,
            },
        })
    }
}

pub(super) fn draw(exec: &Executor, args: DrawArgs) -> Result<()> {
    let b = &exec.bindings;
    let pipeline = b.graphics.as_ref().context("draw without a pipeline state")?;
    let layout = pipeline.layout();
    let viewport = b.viewport.context("draw without a viewport")?;
    let scissor = b.scissor.context("draw without a scissor rect")?;

    let color_handle = b.color.as_ref().context("draw without a render target")?;
    let target = exec.view_target(color_handle, ViewDesc::RenderTarget)?;
    exec.check_state(&target, |s| s == ResourceState::RenderTarget, "render target")?;
    let (width, height) = target.desc().extent(0);

    let depth = match (pipeline.depth(), &b.depth) {
        (Some(state), Some(handle)) => {
            let cell = exec.view_target(handle, ViewDesc::DepthStencil)?;
            exec.check_state(
                &cell,
                |s| s == ResourceState::DepthWrite || (!state.write && s == ResourceState::DepthRead),
                "depth target",
            )?;
            ensure!(
                cell.desc().extent(0) == (width, height),
                "depth target '{}' does not match render target '{}'",
                cell.name(),
                target.name()
            );
            ensure!(
                !Arc::ptr_eq(&cell, &target),
                "'{}' bound as both render and depth target",
                cell.name()
            );
            Some((state, cell))
        }
        (Some(_), None) => bail!("pipeline '{}' tests depth without a depth target", pipeline.name()),
        (None, _) => None,
    };

    let vertex = b.vertex.as_ref().context("draw without a vertex buffer")?;
    let index = b.index.as_ref().context("draw without an index buffer")?;
    exec.check_state(&vertex.buffer, ResourceState::is_shader_readable, "vertex buffer")?;
    exec.check_state(
        &index.buffer,
        |s| s == ResourceState::IndexBuffer || s == ResourceState::GenericRead,
        "index buffer",
    )?;

    let transform = match pipeline.vertex_program() {
        Program::TransformVertex => {
            let camera = exec.constants(layout, ViewKind::GlobalCbv)?;
            let object = exec.constants(layout, ViewKind::PerObjectCbv)?;
            read_mat4(&camera, 0)? * read_mat4(&object, 0)?
        }
        _ => Mat4::IDENTITY,
    };
    let texture = match pipeline.pixel_program() {
        Program::TexturedPixel => exec.texture(layout, ViewKind::PerObjectSrv)?,
        Program::BlitPixel => Some(
            exec.texture(layout, ViewKind::GlobalSrv)?
                .context("blit without a source texture")?,
        ),
        other => bail!("{other:?} is not a pixel program"),
    };
    let sampler = exec.sampler(layout);

    let stage = Stage {
        transform,
        position: pipeline
            .input_element(Semantic::Position)
            .context("pipeline has no position input")?,
        texcoord: pipeline.input_element(Semantic::Texcoord),
        color: pipeline.input_element(Semantic::Color),
        stride: vertex.stride as usize,
    };
    let indices = fetch_indices(index, &args)?;
    let vertices = vertex.buffer.data()[..vertex.size as usize].to_vec();

    let mut triangles = Vec::with_capacity(indices.len() / 3);
    for tri in indices.chunks_exact(3) {
        let mut corners = [ClipVertex::default(); 3];
        for (corner, &i) in corners.iter_mut().zip(tri) {
            let vi = i as i64 + args.base_vertex as i64;
            ensure!(vi >= 0, "negative vertex index {vi}");
            *corner = stage.fetch(&vertices, vi as usize)?;
        }
        triangles.push(corners);
    }

    let bounds = Bounds {
        min_x: (scissor.left.max(0) as f32).max(viewport.x.floor()) as i64,
        min_y: (scissor.top.max(0) as f32).max(viewport.y.floor()) as i64,
        max_x: (scissor.right as f32).min(viewport.x + viewport.width).min(width as f32) as i64,
        max_y: (scissor.bottom as f32).min(viewport.y + viewport.height).min(height as f32) as i64,
    };

    let mut color_data = target.data();
    let mut depth_data = depth.as_ref().map(|(state, cell)| (*state, cell.data()));

    let shade = |uv: Vec2, vertex_color: Vec4| -> Vec4 {
        match (pipeline.pixel_program(), &texture) {
            (Program::TexturedPixel, Some(t)) => t.sample(uv, sampler) * vertex_color,
            (Program::TexturedPixel, None) => vertex_color,
            (_, Some(t)) => t.sample(uv, sampler),
            (_, None) => Vec4::ONE,
        }
    };

    let vt = viewport_transform(&viewport);
    for _ in 0..args.instance_count {
        for tri in &triangles {
            for screen in clip_to_screen(tri, &vt) {
                let area = edge(&screen[0], &screen[1], screen[2].x, screen[2].y);
                if area == 0.0 {
                    continue;
                }
                // Screen y points down, so counter-clockwise faces have negative area.
                let front = area < 0.0;
                let culled = match pipeline.cull() {
                    CullMode::None => false,
                    CullMode::Back => !front,
                    CullMode::Front => front,
                };
                if culled {
                    continue;
                }

                let min_x = screen.iter().map(|v| v.x).fold(f32::INFINITY, f32::min).floor() as i64;
                let max_x = screen.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max).ceil() as i64;
                let min_y = screen.iter().map(|v| v.y).fold(f32::INFINITY, f32::min).floor() as i64;
                let max_y = screen.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max).ceil() as i64;

                for y in min_y.max(bounds.min_y)..max_y.min(bounds.max_y) {
                    for x in min_x.max(bounds.min_x)..max_x.min(bounds.max_x) {
                        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                        let w0 = edge(&screen[1], &screen[2], px, py) / area;
                        let w1 = edge(&screen[2], &screen[0], px, py) / area;
                        let w2 = edge(&screen[0], &screen[1], px, py) / area;
                        if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                            continue;
                        }

                        let z = w0 * screen[0].z + w1 * screen[1].z + w2 * screen[2].z;
                        if z > viewport.max_depth {
                            continue;
                        }
                        let pixel = (y as usize * width as usize) + x as usize;

                        if let Some((state, data)) = depth_data.as_mut() {
                            let at = pixel * 4;
                            let stored = f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
                            if !state.func.passes(z, stored) {
                                continue;
                            }
                            if state.write {
                                data[at..at + 4].copy_from_slice(&z.to_le_bytes());
                            }
                        }

                        let inv_w = w0 * screen[0].inv_w + w1 * screen[1].inv_w + w2 * screen[2].inv_w;
                        let uv = (screen[0].uv * w0 + screen[1].uv * w1 + screen[2].uv * w2) / inv_w;
                        let vc = (screen[0].color * w0 + screen[1].color * w1 + screen[2].color * w2) / inv_w;

                        let rgba = shade(uv, vc).clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + 0.5;
                        let at = pixel * 4;
                        color_data[at..at + 4].copy_from_slice(&[
                            rgba.x as u8,
                            rgba.y as u8,
                            rgba.z as u8,
                            rgba.w as u8,
                        ]);
                    }
                }
            }
        }
    }
    Ok(())
}

struct Bounds {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

fn fetch_indices(view: &IndexBufferView, args: &DrawArgs) -> Result<Vec<u32>> {
    ensure!(
        args.index_count % 3 == 0,
        "index count {} is not a triangle list",
        args.index_count
    );
    read_indices(view, args.start_index, args.index_count)
}

/// Signed doubled area of (a, b, p).
fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

struct ViewportTransform {
    origin: Vec2,
    half: Vec2,
    min_depth: f32,
    depth_range: f32,
}

fn viewport_transform(vp: &Viewport) -> ViewportTransform {
    ViewportTransform {
        origin: Vec2::new(vp.x, vp.y),
        half: Vec2::new(vp.width, vp.height) * 0.5,
        min_depth: vp.min_depth,
        depth_range: vp.max_depth - vp.min_depth,
    }
}

const MIN_W: f32 = 1e-6;

/// Clips against the near plane (`z >= 0`) and projects to the viewport.
///
/// Returns the resulting fan as zero to two triangles.
fn clip_to_screen(tri: &[ClipVertex; 3], vt: &ViewportTransform) -> Vec<[ScreenVertex; 3]> {
    let mut polygon = Vec::with_capacity(4);
    for i in 0..3 {
        let a = tri[i];
        let b = tri[(i + 1) % 3];
        let (da, db) = (a.position.z, b.position.z);
        if da >= 0.0 {
            polygon.push(a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            polygon.push(a.lerp(b, da / (da - db)));
        }
    }
    if polygon.len() < 3 || polygon.iter().any(|v| v.position.w <= MIN_W) {
        return Vec::new();
    }

    let project = |v: &ClipVertex| {
        let inv_w = 1.0 / v.position.w;
        let ndc = v.position.truncate() * inv_w;
        ScreenVertex {
            x: vt.origin.x + (ndc.x + 1.0) * vt.half.x,
            y: vt.origin.y + (1.0 - ndc.y) * vt.half.y,
            z: vt.min_depth + ndc.z * vt.depth_range,
            inv_w,
            uv: v.uv * inv_w,
            color: v.color * inv_w,
        }
    };
    let screen: Vec<ScreenVertex> = polygon.iter().map(project).collect();
    (1..screen.len() - 1)
        .map(|i| [screen[0], screen[i], screen[i + 1]])
        .collect()
}
