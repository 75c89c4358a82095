//! Ray dispatch against a top-level acceleration structure.

use anyhow::{bail, ensure, Context, Result};
use glam::{Vec3, Vec4};

use crate::config::{SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT};
use crate::pipeline::Program;
use crate::raytracing::RaytracingPipeline;
use crate::views::ViewKind;

use super::super::accel::{AccelData, WorldInstance};
use super::super::command::{DispatchRaysDesc, ShaderTableRange};
use super::super::descriptor::{SrvDimension, ViewDesc};
use super::super::resource::Format;
use super::super::state::ResourceState;
use super::{read_mat4, read_vec4, Executor};

const PRIMARY_RAY: u32 = 0;
const OCCLUSION_RAY: u32 = 1;

const AO_RAY_COUNT: usize = 4;
const AO_RADIUS: f32 = 2.0;
const RAY_EPSILON: f32 = 1e-3;
const PRIMARY_T_MAX: f32 = 10_000.0;

/// Offsets of the camera block in the global constant buffer.
const INV_VIEW_PROJ_OFFSET: usize = 64;
const CAMERA_POSITION_OFFSET: usize = 128;

/// Copy of a shader table range taken at dispatch time.
struct RecordTable {
    name: String,
    bytes: Vec<u8>,
    stride: usize,
}

impl RecordTable {
    fn snapshot(exec: &Executor, range: &ShaderTableRange, role: &str) -> Result<Self> {
        let name = range.buffer.name().to_string();
        exec.check_state(&range.buffer, ResourceState::is_shader_readable, role)?;
        ensure!(
            range.offset % SHADER_TABLE_ALIGNMENT == 0,
            "{role} table '{name}' starts at unaligned offset {}",
            range.offset
        );
        ensure!(
            range.stride % SHADER_RECORD_ALIGNMENT as u64 == 0
                && range.stride >= SHADER_IDENTIFIER_SIZE as u64,
            "{role} table '{name}' has invalid stride {}",
            range.stride
        );
        let end = range.offset + range.size;
        ensure!(
            end <= range.buffer.desc().byte_size(),
            "{role} table '{name}' range ends past the buffer"
        );
        let bytes = range.buffer.data()[range.offset as usize..end as usize].to_vec();
        Ok(Self {
            name,
            bytes,
            stride: range.stride as usize,
        })
    }

    fn record(&self, index: u32) -> Result<&[u8]> {
        let at = index as usize * self.stride;
        self.bytes
            .get(at..at + self.stride)
            .with_context(|| format!("record {index} is outside shader table '{}'", self.name))
    }
}

struct Hit<'a> {
    t: f32,
    instance: &'a WorldInstance,
    normal: Vec3,
}

struct Tracer<'a> {
    pipeline: &'a RaytracingPipeline,
    instances: &'a [WorldInstance],
    miss: RecordTable,
    hit_group: RecordTable,
}

impl Tracer<'_> {
    fn closest_hit(&self, origin: Vec3, dir: Vec3, t_max: f32) -> Option<Hit<'_>> {
        let inv_dir = dir.recip();
        let mut best: Option<Hit<'_>> = None;
        for instance in self.instances {
            if !instance.bounds.hit(origin, inv_dir, t_max) {
                continue;
            }
            for tri in &instance.triangles {
                let limit = best.as_ref().map_or(t_max, |h| h.t);
                if let Some(t) = intersect(origin, dir, tri, limit) {
                    let normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize_or_zero();
                    best = Some(Hit {
                        t,
                        instance,
                        normal,
                    });
                }
            }
        }
        best
    }

    /// Traces one ray and returns the payload written by its hit or miss program.
    fn trace(&self, origin: Vec3, dir: Vec3, t_max: f32, ray_type: u32, depth: u32) -> Result<Vec4> {
        ensure!(
            depth <= self.pipeline.max_recursion_depth(),
            "trace at depth {depth} exceeds the recursion limit of '{}'",
            self.pipeline.name()
        );

        match self.closest_hit(origin, dir, t_max) {
            Some(hit) => {
                let index = ray_type + hit.instance.hit_group_offset;
                let record = self.hit_group.record(index)?;
                let resolved = self.resolve(record, &self.hit_group)?;
                match resolved {
                    Program::ShadeClosestHit => {
                        let albedo = read_vec4(record, SHADER_IDENTIFIER_SIZE)
                            .with_context(|| format!("hit record {index} has no albedo"))?;
                        let normal = if hit.normal.dot(dir) > 0.0 {
                            -hit.normal
                        } else {
                            hit.normal
                        };
                        let point = origin + dir * hit.t;
                        self.shade(point, normal, albedo, depth)
                    }
                    Program::OcclusionClosestHit => Ok(Vec4::ZERO),
                    other => bail!("{other:?} bound as a closest-hit program"),
                }
            }
            None => {
                let record = self.miss.record(ray_type)?;
                match self.resolve(record, &self.miss)? {
                    Program::SkyMiss => Ok(sky(dir)),
                    Program::OcclusionMiss => Ok(Vec4::ONE),
                    other => bail!("{other:?} bound as a miss program"),
                }
            }
        }
    }

    fn resolve(&self, record: &[u8], table: &RecordTable) -> Result<Program> {
        let resolved = self
            .pipeline
            .resolve(&record[..SHADER_IDENTIFIER_SIZE])
            .with_context(|| {
                format!(
                    "unknown shader identifier in '{}' for state object '{}'",
                    table.name,
                    self.pipeline.name()
                )
            })?;
        ensure!(
            SHADER_IDENTIFIER_SIZE + resolved.local_arguments <= table.stride,
            "'{}' records are too small for their local arguments",
            table.name
        );
        Ok(resolved.program)
    }

    fn shade(&self, point: Vec3, normal: Vec3, albedo: Vec4, depth: u32) -> Result<Vec4> {
        let light = Vec3::new(0.5, 1.0, 0.3).normalize();
        let diffuse = normal.dot(light).max(0.0);

        let origin = point + normal * RAY_EPSILON;
        let mut visible = 0.0;
        for dir in hemisphere(normal) {
            visible += self.trace(origin, dir, AO_RADIUS, OCCLUSION_RAY, depth + 1)?.x;
        }
        let ao = visible / AO_RAY_COUNT as f32;

        let rgb = albedo.truncate() * (0.3 + 0.7 * diffuse) * (0.4 + 0.6 * ao);
        Ok(rgb.extend(1.0))
    }
}

pub(super) fn dispatch(exec: &Executor, desc: &DispatchRaysDesc) -> Result<()> {
    let pipeline = exec
        .bindings
        .raytracing
        .as_ref()
        .context("rays dispatched without a ray-tracing state")?;
    let layout = pipeline.global_layout();

    let raygen = RecordTable::snapshot(exec, &desc.ray_generation, "ray-generation")?;
    let record = raygen.record(0)?;
    let program = pipeline
        .resolve(&record[..SHADER_IDENTIFIER_SIZE])
        .context("unknown ray-generation identifier")?
        .program;
    ensure!(
        program == Program::PrimaryRayGen,
        "{program:?} bound as the ray-generation program"
    );

    let tlas = match exec.bound(layout, ViewKind::GlobalSrv) {
        Some(descriptor) => match descriptor.resource() {
            Some((cell, ViewDesc::ShaderResource(SrvDimension::AccelerationStructure))) => {
                cell.clone()
            }
            _ => bail!("global shader-resource table does not hold an acceleration structure"),
        },
        None => bail!("no acceleration structure bound"),
    };
    exec.check_state(&tlas, |s| s == ResourceState::AccelerationStructure, "scene")?;
    let accel = tlas
        .accel()
        .with_context(|| format!("'{}' has not been built", tlas.name()))?;
    let AccelData::Top(instances) = accel.as_ref() else {
        bail!("'{}' is not a top-level structure", tlas.name());
    };

    let output = match exec.bound(layout, ViewKind::Uav) {
        Some(descriptor) => match descriptor.resource() {
            Some((cell, ViewDesc::UnorderedAccess)) => cell.clone(),
            _ => bail!("unordered-access table does not hold a writable view"),
        },
        None => bail!("no ray-tracing output bound"),
    };
    exec.check_state(&output, |s| s == ResourceState::UnorderedAccess, "ray-tracing output")?;
    ensure!(
        output.desc().format() == Some(Format::Rgba8Unorm),
        "ray-tracing output '{}' is not RGBA8",
        output.name()
    );
    let (out_width, out_height) = output.desc().extent(0);
    ensure!(
        desc.width <= out_width && desc.height <= out_height,
        "dispatch {}x{} exceeds output '{}' ({out_width}x{out_height})",
        desc.width,
        desc.height,
        output.name()
    );

    let camera = exec.constants(layout, ViewKind::GlobalCbv)?;
    let inv_view_proj = read_mat4(&camera, INV_VIEW_PROJ_OFFSET)?;
    let eye = read_vec4(&camera, CAMERA_POSITION_OFFSET)?.truncate();

    let tracer = Tracer {
        pipeline,
        instances,
        miss: RecordTable::snapshot(exec, &desc.miss, "miss")?,
        hit_group: RecordTable::snapshot(exec, &desc.hit_group, "hit-group")?,
    };

    let mut pixels = vec![0u8; desc.width as usize * desc.height as usize * 4];
    for y in 0..desc.height {
        for x in 0..desc.width {
            let ndc_x = (x as f32 + 0.5) / desc.width as f32 * 2.0 - 1.0;
            let ndc_y = 1.0 - (y as f32 + 0.5) / desc.height as f32 * 2.0;
            let target = inv_view_proj * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
            let dir = (target.truncate() / target.w - eye).normalize_or_zero();

            let color = tracer.trace(eye, dir, PRIMARY_T_MAX, PRIMARY_RAY, 1)?;
            let rgba = color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + 0.5;
            let at = (y as usize * desc.width as usize + x as usize) * 4;
            pixels[at..at + 4].copy_from_slice(&[rgba.x as u8, rgba.y as u8, rgba.z as u8, rgba.w as u8]);
        }
    }

    let mut data = output.data();
    let row = desc.width as usize * 4;
    for y in 0..desc.height as usize {
        let to = y * out_width as usize * 4;
        data[to..to + row].copy_from_slice(&pixels[y * row..(y + 1) * row]);
    }
    Ok(())
}

/// Möller–Trumbore; returns the hit distance in `(RAY_EPSILON, t_max)`.
fn intersect(origin: Vec3, dir: Vec3, tri: &[Vec3; 3], t_max: f32) -> Option<f32> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > RAY_EPSILON && t < t_max).then_some(t)
}

/// Fixed occlusion directions around `normal`: the normal and three tilted rays.
fn hemisphere(normal: Vec3) -> [Vec3; AO_RAY_COUNT] {
    let (tangent, bitangent) = normal.any_orthonormal_pair();
    let tilt = |a: f32| (normal + (tangent * a.cos() + bitangent * a.sin()) * 0.8).normalize();
    [
        normal,
        tilt(0.0),
        tilt(std::f32::consts::TAU / 3.0),
        tilt(2.0 * std::f32::consts::TAU / 3.0),
    ]
}

fn sky(dir: Vec3) -> Vec4 {
    let t = 0.5 * (dir.y + 1.0);
    Vec3::ONE.lerp(Vec3::new(0.5, 0.7, 1.0), t).extend(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::FlyCamera;
    use crate::testing::{texel, two_cube_scene, RayTraceRig};

    #[test]
    fn ray_hits_triangle_in_front() {
        let tri = [Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)];
        let t = intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, &tri, 100.0);
        assert!((t.unwrap() - 5.0).abs() < 1e-5);
        assert!(intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::Z, &tri, 100.0).is_none());
        assert!(intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, &tri, 4.0).is_none());
    }

    #[test]
    fn occlusion_rays_stay_in_the_upper_hemisphere() {
        let n = Vec3::new(0.0, 1.0, 0.0);
        for dir in hemisphere(n) {
            assert!(dir.dot(n) > 0.5);
            assert!((dir.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn each_instance_shades_with_its_own_hit_record() {
        let (width, height) = (32, 24);
        let mut rig = RayTraceRig::new(width, height, two_cube_scene);
        let pixels = rig.trace(&FlyCamera::new(width, height));

        // The red cube covers the left third of the view, the blue one the right third.
        let [r, g, b, a] = texel(&pixels, width, 8, 12);
        assert!(r > 0 && g == 0 && b == 0, "left cube shaded {:?}", [r, g, b]);
        assert_eq!(a, 255);

        let [r, g, b, _] = texel(&pixels, width, 23, 12);
        assert!(r == 0 && g == 0 && b > 0, "right cube shaded {:?}", [r, g, b]);

        // Misses fall through to the sky gradient.
        let [r, g, b, _] = texel(&pixels, width, 16, 0);
        assert!(r > 0 && g > 0 && b > 0);
    }
}
