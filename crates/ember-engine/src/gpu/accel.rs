//! Device-side acceleration structure payloads.

use glam::{Mat4, Vec3};

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub(crate) fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub(crate) fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Slab test; returns true if the ray enters the box before `t_max`.
    pub(crate) fn hit(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> bool {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element();
        let far = t0.max(t1).min_element();
        far >= near.max(0.0) && near <= t_max
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BottomLevel {
    pub triangles: Vec<[Vec3; 3]>,
}

#[derive(Debug, Clone)]
pub(crate) struct WorldInstance {
    pub instance_id: u32,
    pub hit_group_offset: u32,
    pub triangles: Vec<[Vec3; 3]>,
    pub bounds: Aabb,
}

impl WorldInstance {
    pub(crate) fn new(
        blas: &BottomLevel,
        transform: Mat4,
        instance_id: u32,
        hit_group_offset: u32,
    ) -> Self {
        let mut bounds = Aabb::empty();
        let triangles = blas
            .triangles
            .iter()
            .map(|tri| {
                tri.map(|v| {
                    let w = transform.transform_point3(v);
                    bounds.grow(w);
                    w
                })
            })
            .collect();
        Self {
            instance_id,
            hit_group_offset,
            triangles,
            bounds,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum AccelData {
    Bottom(BottomLevel),
    Top(Vec<WorldInstance>),
}
