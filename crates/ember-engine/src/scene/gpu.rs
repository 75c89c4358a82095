use std::collections::HashMap;

use anyhow::{bail, ensure, Context, Result};
use glam::{Mat4, Vec3, Vec4};

use crate::buffers::{BufferPool, ResourceKey};
use crate::command::CommandStream;
use crate::config::{align_up, CONSTANT_BUFFER_SIZE, RAY_TYPE_COUNT};
use crate::gpu::command::{IndexBufferView, IndexFormat, VertexBufferView};
use crate::gpu::descriptor::{AddressMode, Filter, SamplerDesc, SrvDimension, ViewDesc};
use crate::gpu::resource::{copyable_footprints, Format, ResourceDesc};
use crate::gpu::state::ResourceState;
use crate::raytracing::AccelInstance;
use crate::views::{ViewKind, ViewTableManager};

use super::camera::Camera;
use super::constants::{CameraConstants, ObjectConstants};
use super::data::{Material, MeshData, SceneData, SceneObject, TextureImage, Vertex};
use super::procedural::full_screen_quad;
use super::session::SceneSession;

/// Skybox cube half-size in world units; stays inside the camera's far plane.
const SKYBOX_SCALE: f32 = 50.0;

#[derive(Debug, Clone)]
struct GpuMesh {
    id: u32,
    vertices: VertexBufferView,
    indices: IndexBufferView,
    index_count: u32,
}

#[derive(Debug, Clone)]
struct GpuObject {
    id: u32,
    mesh: GpuMesh,
    cbv: u32,
    srv: u32,
    transform: Mat4,
    albedo: Vec4,
}

/// Scene content resident in GPU memory, plus the view-table slots naming it.
///
/// Pool entries are keyed by object and texture id; this type only keeps
/// views and slot numbers, never ownership.
#[derive(Debug)]
pub struct GpuScene {
    objects: Vec<GpuObject>,
    skybox: GpuObject,
    quad: GpuMesh,
    textures: HashMap<u32, u32>,
    global_cbv: u32,
    sampler: u32,
    tlas_srv: u32,
}

struct PendingMesh<'a> {
    id: u32,
    name: &'a str,
    mesh: &'a MeshData,
}

impl GpuScene {
    /// Records the upload of `scene` into `stream`.
    ///
    /// Staging memory comes from the scratch-upload pool, so the caller must
    /// submit, wait for the GPU and only then release scratch allocations.
    pub fn upload(
        scene: &SceneData,
        session: &mut SceneSession,
        pool: &mut BufferPool,
        views: &mut ViewTableManager,
        stream: &mut CommandStream,
    ) -> Result<Self> {
        let quad_mesh = full_screen_quad();
        let quad_id = session.next_object_id();
        let white = TextureImage {
            id: session.next_texture_id(),
            name: "white".into(),
            width: 1,
            height: 1,
            mips: vec![vec![255; 4]],
        };

        let mut meshes: Vec<PendingMesh<'_>> = scene
            .objects
            .iter()
            .chain(std::iter::once(&scene.skybox))
            .map(|o| PendingMesh {
                id: o.id,
                name: &o.name,
                mesh: &o.mesh,
            })
            .collect();
        meshes.push(PendingMesh {
            id: quad_id,
            name: "full-screen quad",
            mesh: &quad_mesh,
        });
        let textures: Vec<&TextureImage> = scene.textures.iter().chain(std::iter::once(&white)).collect();

        // Copies first, then one batch of transitions out of CopyDest.
        for pending in &meshes {
            stage_buffer(pool, stream, ResourceKey::Vertices(pending.id), pending.name, pending.mesh.vertex_bytes())?;
            stage_buffer(pool, stream, ResourceKey::Indices(pending.id), pending.name, pending.mesh.index_bytes())?;
        }
        for texture in &textures {
            stage_texture(pool, stream, texture)?;
        }
        for pending in &meshes {
            transition(pool, stream, ResourceKey::Vertices(pending.id), ResourceState::VertexAndConstantBuffer)?;
            transition(pool, stream, ResourceKey::Indices(pending.id), ResourceState::IndexBuffer)?;
        }
        for texture in &textures {
            transition(pool, stream, ResourceKey::Texture(texture.id), ResourceState::ShaderResource)?;
        }
        stream.flush_barriers();

        let mut texture_slots = HashMap::new();
        for texture in &textures {
            let slot = views.allocate(ViewKind::PerObjectSrv);
            let resource = pool
                .default_resource(ResourceKey::Texture(texture.id))
                .context("texture was not uploaded")?;
            views.create_view(
                ViewKind::PerObjectSrv,
                slot,
                resource,
                ViewDesc::ShaderResource(SrvDimension::Texture2D),
            );
            texture_slots.insert(texture.id, slot);
        }

        let sampler = views.allocate(ViewKind::Sampler);
        views.create_sampler(
            sampler,
            SamplerDesc {
                filter: Filter::Linear,
                address: AddressMode::Wrap,
            },
        );

        pool.allocate_global_constant()?;
        let global_cbv = views.allocate(ViewKind::GlobalCbv);
        let resource = pool.global_constant().context("global constants missing")?;
        views.create_view(ViewKind::GlobalCbv, global_cbv, resource, constant_view());

        let white_slot = texture_slots[&white.id];
        let mut objects = Vec::with_capacity(scene.objects.len());
        for object in &scene.objects {
            let Material::Lit { albedo, texture } = object.material else {
                bail!("object '{}' uses a skybox material", object.name);
            };
            let srv = match texture {
                Some(id) => *texture_slots
                    .get(&id)
                    .with_context(|| format!("'{}' references unknown texture {id}", object.name))?,
                None => white_slot,
            };
            objects.push(gpu_object(object, pool, views, srv, albedo)?);
        }

        let Material::Skybox { texture } = scene.skybox.material else {
            bail!("skybox '{}' does not use a skybox material", scene.skybox.name);
        };
        let sky_srv = *texture_slots
            .get(&texture)
            .with_context(|| format!("skybox references unknown texture {texture}"))?;
        let skybox = gpu_object(&scene.skybox, pool, views, sky_srv, Vec4::ONE)?;

        let quad = gpu_mesh(pool, quad_id, &quad_mesh)?;
        let tlas_srv = build_acceleration_structures(&objects, pool, views, stream)?;

        log::debug!(
            "scene upload recorded: {} objects, {} textures",
            objects.len(),
            textures.len()
        );
        Ok(Self {
            objects,
            skybox,
            quad,
            textures: texture_slots,
            global_cbv,
            sampler,
            tlas_srv,
        })
    }

    /// Rewrites camera and per-object constants in place.
    ///
    /// Only valid while no frame that reads them is in flight.
    pub fn update_constants(&self, pool: &BufferPool, camera: &dyn Camera) -> Result<()> {
        let global = pool.global_constant().context("global constants missing")?;
        global.write_pod(0, &CameraConstants::new(camera.view_proj(), camera.position()));

        for object in &self.objects {
            write_object(pool, object.id, object.transform)?;
        }
        let sky = Mat4::from_translation(camera.position()) * Mat4::from_scale(Vec3::splat(SKYBOX_SCALE));
        write_object(pool, self.skybox.id, sky)
    }

    /// Binds the tables shared by every raster draw: camera constants and sampler.
    pub fn bind_frame_tables(&self, stream: &mut CommandStream, views: &ViewTableManager) {
        views.bind_views_for_draw(stream, ViewKind::GlobalCbv, self.global_cbv);
        views.bind_samplers(stream, self.sampler);
    }

    pub fn draw_objects(&self, stream: &mut CommandStream, views: &ViewTableManager) {
        for object in &self.objects {
            draw_object(object, stream, views);
        }
    }

    pub fn draw_skybox(&self, stream: &mut CommandStream, views: &ViewTableManager) {
        draw_object(&self.skybox, stream, views);
    }

    pub fn draw_full_screen_quad(&self, stream: &mut CommandStream) {
        draw_mesh(&self.quad, stream);
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn global_cbv_slot(&self) -> u32 {
        self.global_cbv
    }

    /// Global shader-resource slot of the top-level acceleration structure.
    pub fn tlas_slot(&self) -> u32 {
        self.tlas_srv
    }

    /// Albedo of each ray-traced instance, in instance order.
    pub fn instance_albedos(&self) -> impl Iterator<Item = Vec4> + '_ {
        self.objects.iter().map(|o| o.albedo)
    }

    /// Releases the scene's pooled memory and restarts the session's ids.
    ///
    /// View-table slots are not reclaimed. The caller must have waited for the GPU.
    pub fn unload(self, pool: &mut BufferPool, session: &mut SceneSession) {
        let ids = self
            .objects
            .iter()
            .map(|o| o.id)
            .chain([self.skybox.id, self.quad.id]);
        for id in ids {
            pool.release_default(ResourceKey::Vertices(id));
            pool.release_default(ResourceKey::Indices(id));
            pool.release_default(ResourceKey::BottomLevel(id));
        }
        for id in self.textures.keys() {
            pool.release_default(ResourceKey::Texture(*id));
        }
        pool.release_default(ResourceKey::TopLevel);
        pool.release_object_constants();
        session.reset();
        log::debug!("scene unloaded");
    }
}

fn constant_view() -> ViewDesc {
    ViewDesc::ConstantBuffer {
        offset: 0,
        size: CONSTANT_BUFFER_SIZE,
    }
}

fn stage_buffer(
    pool: &mut BufferPool,
    stream: &mut CommandStream,
    key: ResourceKey,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let size = bytes.len() as u64;
    let staging = pool.allocate_scratch_upload(size, &format!("{name} staging"))?;
    pool.resource(staging).write_bytes(0, bytes);
    pool.allocate_default(
        key,
        ResourceDesc::buffer(size),
        ResourceState::CopyDest,
        &format!("{name} {key:?}"),
        None,
    )?;

    let dst = pool.default_resource(key).context("default buffer missing")?;
    stream.copy_buffer_region(dst, 0, pool.resource(staging), 0, size);
    Ok(())
}

/// Uploads every mip through one scratch buffer laid out by copyable footprints.
fn stage_texture(pool: &mut BufferPool, stream: &mut CommandStream, texture: &TextureImage) -> Result<()> {
    ensure!(!texture.mips.is_empty(), "texture '{}' has no mip levels", texture.name);
    let desc = ResourceDesc::texture_2d(
        texture.width,
        texture.height,
        texture.subresource_count(),
        Format::Rgba8Unorm,
    );
    let (footprints, total) = copyable_footprints(&desc, 0, texture.subresource_count());

    let staging = pool.allocate_scratch_upload(total, &format!("{} staging", texture.name))?;
    let upload = pool.resource(staging);
    for (fp, pixels) in footprints.iter().zip(&texture.mips) {
        ensure!(
            pixels.len() as u64 == fp.row_size * fp.height as u64,
            "mip of '{}' has {} bytes, expected {}",
            texture.name,
            pixels.len(),
            fp.row_size * fp.height as u64
        );
        for (y, row) in pixels.chunks_exact(fp.row_size as usize).enumerate() {
            upload.write_bytes(fp.offset + y as u64 * fp.row_pitch, row);
        }
    }

    let key = ResourceKey::Texture(texture.id);
    pool.allocate_default(key, desc, ResourceState::CopyDest, &texture.name, None)?;
    let dst = pool.default_resource(key).context("texture missing")?;
    let src = pool.resource(staging);
    for (mip, fp) in footprints.into_iter().enumerate() {
        stream.copy_texture_region(dst, mip as u32, src, fp);
    }
    Ok(())
}

fn transition(pool: &BufferPool, stream: &mut CommandStream, key: ResourceKey, to: ResourceState) -> Result<()> {
    let resource = pool
        .default_resource(key)
        .with_context(|| format!("{key:?} was not uploaded"))?;
    stream.add_transition_barrier(resource, ResourceState::CopyDest, to);
    Ok(())
}

fn gpu_mesh(pool: &BufferPool, id: u32, mesh: &MeshData) -> Result<GpuMesh> {
    let vertices = pool
        .default_resource(ResourceKey::Vertices(id))
        .context("vertex buffer missing")?;
    let indices = pool
        .default_resource(ResourceKey::Indices(id))
        .context("index buffer missing")?;
    Ok(GpuMesh {
        id,
        vertices: vertices.vertex_buffer_view(Vertex::STRIDE),
        indices: indices.index_buffer_view(IndexFormat::U16),
        index_count: mesh.index_count(),
    })
}

fn gpu_object(
    object: &SceneObject,
    pool: &mut BufferPool,
    views: &mut ViewTableManager,
    srv: u32,
    albedo: Vec4,
) -> Result<GpuObject> {
    pool.allocate_per_object_constant(object.id)?;
    let cbv = views.allocate(ViewKind::PerObjectCbv);
    let constants = pool
        .per_object_constant(object.id)
        .context("object constants missing")?;
    views.create_view(ViewKind::PerObjectCbv, cbv, constants, constant_view());

    Ok(GpuObject {
        id: object.id,
        mesh: gpu_mesh(pool, object.id, &object.mesh)?,
        cbv,
        srv,
        transform: object.transform,
        albedo,
    })
}

/// Records one bottom-level build per object and the top-level build over them.
///
/// Instance `i` uses hit-group records `i * RAY_TYPE_COUNT ..`.
fn build_acceleration_structures(
    objects: &[GpuObject],
    pool: &mut BufferPool,
    views: &mut ViewTableManager,
    stream: &mut CommandStream,
) -> Result<u32> {
    for object in objects {
        let size = align_up(object.mesh.index_count as u64 * 36, 256);
        let blas = pool.allocate_default(
            ResourceKey::BottomLevel(object.id),
            ResourceDesc::buffer(size),
            ResourceState::AccelerationStructure,
            &format!("object {} blas", object.id),
            None,
        )?;
        stream.build_bottom_level(blas, object.mesh.vertices.clone(), object.mesh.indices.clone());
    }

    let size = align_up((objects.len().max(1) * 64) as u64, 256);
    pool.allocate_default(
        ResourceKey::TopLevel,
        ResourceDesc::buffer(size),
        ResourceState::AccelerationStructure,
        "scene tlas",
        None,
    )?;

    let mut instances = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        let blas = pool
            .default_resource(ResourceKey::BottomLevel(object.id))
            .context("blas missing")?;
        instances.push(AccelInstance {
            blas,
            transform: object.transform,
            instance_id: i as u32,
            hit_group_offset: i as u32 * RAY_TYPE_COUNT,
        });
    }
    let tlas = pool
        .default_resource(ResourceKey::TopLevel)
        .context("tlas missing")?;
    stream.build_top_level(tlas, &instances);

    let slot = views.allocate(ViewKind::GlobalSrv);
    views.create_view(
        ViewKind::GlobalSrv,
        slot,
        tlas,
        ViewDesc::ShaderResource(SrvDimension::AccelerationStructure),
    );
    Ok(slot)
}

fn write_object(pool: &BufferPool, id: u32, world: Mat4) -> Result<()> {
    let constants = pool
        .per_object_constant(id)
        .with_context(|| format!("constants of object {id} missing"))?;
    constants.write_pod(0, &ObjectConstants { world });
    Ok(())
}

fn draw_object(object: &GpuObject, stream: &mut CommandStream, views: &ViewTableManager) {
    views.bind_views_for_draw(stream, ViewKind::PerObjectCbv, object.cbv);
    views.bind_views_for_draw(stream, ViewKind::PerObjectSrv, object.srv);
    draw_mesh(&object.mesh, stream);
}

fn draw_mesh(mesh: &GpuMesh, stream: &mut CommandStream) {
    stream.set_vertex_buffer(mesh.vertices.clone());
    stream.set_index_buffer(mesh.indices.clone());
    stream.draw_indexed_instanced(mesh.index_count, 1, 0, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolCapacities, ViewCapacities};
    use crate::device::{Device, DeviceInit};
    use crate::testing::two_cube_scene;

    #[test]
    fn texture_without_mips_is_rejected() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let mut pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        let allocator = device.create_command_allocator("upload");
        let mut stream = device.create_command_stream();

        let mut session = SceneSession::new();
        let mut data = two_cube_scene(&mut session);
        data.textures[0].mips.clear();
        let key = ResourceKey::Texture(data.textures[0].id);

        stream.reset(&allocator);
        let err = GpuScene::upload(&data, &mut session, &mut pool, &mut views, &mut stream).unwrap_err();
        assert!(err.to_string().contains("has no mip levels"), "{err:#}");
        assert!(pool.default_resource(key).is_none());
    }
}
