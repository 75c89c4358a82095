//! Built-in demo content used when no scene loader is wired up.

use glam::{Mat4, Vec3, Vec4};

use super::data::{Material, MeshData, SceneData, SceneObject, TextureImage, Vertex};
use super::session::SceneSession;

/// Unit cube centred on the origin, counter-clockwise faces pointing outward.
pub fn cube(color: Vec4) -> MeshData {
    // (normal, u, v) with u x v == normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let mut mesh = MeshData::default();
    for (n, u, v) in faces {
        let base = mesh.vertices.len() as u16;
        let corners = [(-1.0, -1.0, [0.0, 1.0]), (1.0, -1.0, [1.0, 1.0]), (1.0, 1.0, [1.0, 0.0]), (-1.0, 1.0, [0.0, 0.0])];
        for (su, sv, uv) in corners {
            let p = (n + u * su + v * sv) * 0.5;
            mesh.vertices.push(Vertex::new(p.to_array(), uv, color.to_array()));
        }
        mesh.indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
}

/// Square in the XZ plane facing +Y.
pub fn ground(half_extent: f32, tiling: f32, color: Vec4) -> MeshData {
    let e = half_extent;
    let c = color.to_array();
    MeshData {
        vertices: vec![
            Vertex::new([-e, 0.0, e], [0.0, tiling], c),
            Vertex::new([e, 0.0, e], [tiling, tiling], c),
            Vertex::new([e, 0.0, -e], [tiling, 0.0], c),
            Vertex::new([-e, 0.0, -e], [0.0, 0.0], c),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

/// Two triangles covering clip space; used by the blit pass.
pub fn full_screen_quad() -> MeshData {
    let white = [1.0; 4];
    MeshData {
        vertices: vec![
            Vertex::new([-1.0, -1.0, 0.0], [0.0, 1.0], white),
            Vertex::new([1.0, -1.0, 0.0], [1.0, 1.0], white),
            Vertex::new([1.0, 1.0, 0.0], [1.0, 0.0], white),
            Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0], white),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

fn with_mips(id: u32, name: &str, size: u32, texel: impl Fn(u32, u32) -> [u8; 4]) -> TextureImage {
    let mut base = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            base.extend(texel(x, y));
        }
    }

    let mut mips = vec![base];
    let mut extent = size;
    while extent > 1 {
        let prev = &mips[mips.len() - 1];
        let half = extent / 2;
        let mut next = Vec::with_capacity((half * half * 4) as usize);
        for y in 0..half {
            for x in 0..half {
                for c in 0..4 {
                    let at = |dx: u32, dy: u32| prev[(((y * 2 + dy) * extent + x * 2 + dx) * 4 + c) as usize] as u32;
                    next.push(((at(0, 0) + at(1, 0) + at(0, 1) + at(1, 1)) / 4) as u8);
                }
            }
        }
        mips.push(next);
        extent = half;
    }

    TextureImage {
        id,
        name: name.to_string(),
        width: size,
        height: size,
        mips,
    }
}

fn checker(id: u32) -> TextureImage {
    with_mips(id, "checker", 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            [230, 230, 230, 255]
        } else {
            [90, 90, 90, 255]
        }
    })
}

fn sky(id: u32) -> TextureImage {
    let size = 32;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        let t = y as f32 / (size - 1) as f32;
        let top = Vec3::new(0.35, 0.55, 0.95);
        let horizon = Vec3::new(0.85, 0.9, 1.0);
        let c = top.lerp(horizon, t) * 255.0;
        for _ in 0..size {
            pixels.extend([c.x as u8, c.y as u8, c.z as u8, 255]);
        }
    }
    TextureImage {
        id,
        name: "sky".into(),
        width: size,
        height: size,
        mips: vec![pixels],
    }
}

/// Ground plane, three coloured cubes and a skybox.
pub fn demo_scene(session: &mut SceneSession) -> SceneData {
    let checker = checker(session.next_texture_id());
    let sky = sky(session.next_texture_id());

    let mut objects = vec![SceneObject {
        id: session.next_object_id(),
        name: "ground".into(),
        mesh: ground(6.0, 4.0, Vec4::ONE),
        material: Material::Lit {
            albedo: Vec4::new(0.8, 0.8, 0.8, 1.0),
            texture: Some(checker.id),
        },
        transform: Mat4::IDENTITY,
    }];

    let cubes = [
        ("red cube", Vec3::new(-2.0, 0.5, 0.0), Vec4::new(0.9, 0.2, 0.2, 1.0)),
        ("green cube", Vec3::new(0.0, 0.75, -1.0), Vec4::new(0.2, 0.8, 0.3, 1.0)),
        ("blue cube", Vec3::new(2.0, 0.5, 0.5), Vec4::new(0.2, 0.35, 0.9, 1.0)),
    ];
    for (i, (name, at, albedo)) in cubes.into_iter().enumerate() {
        let scale = if i == 1 { 1.5 } else { 1.0 };
        objects.push(SceneObject {
            id: session.next_object_id(),
            name: name.into(),
            mesh: cube(albedo),
            material: Material::Lit {
                albedo,
                texture: None,
            },
            transform: Mat4::from_translation(at) * Mat4::from_scale(Vec3::splat(scale)),
        });
    }

    let skybox = SceneObject {
        id: session.next_object_id(),
        name: "skybox".into(),
        mesh: cube(Vec4::ONE),
        material: Material::Skybox { texture: sky.id },
        transform: Mat4::IDENTITY,
    };

    SceneData {
        objects,
        skybox,
        textures: vec![checker, sky],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let mesh = cube(Vec4::ONE);
        assert_eq!(mesh.index_count(), 36);
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from_array(mesh.vertices[tri[i] as usize].position));
            let normal = (b - a).cross(c - a);
            let centre = (a + b + c) / 3.0;
            assert!(normal.dot(centre) > 0.0);
        }
    }

    #[test]
    fn checker_has_full_mip_chain() {
        let texture = checker(0);
        assert_eq!(texture.subresource_count(), 7);
        assert_eq!(texture.mips.last().unwrap().len(), 4);
    }

    #[test]
    fn demo_scene_ids_are_dense() {
        let mut session = SceneSession::new();
        let scene = demo_scene(&mut session);
        let mut ids: Vec<u32> = scene.objects.iter().map(|o| o.id).collect();
        ids.push(scene.skybox.id);
        assert_eq!(ids, (0..session.object_count()).collect::<Vec<_>>());
    }
}
