use anyhow::{ensure, Result};

use crate::views::{ViewKind, ViewTableManager};

/// One slot of a pipeline binding layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// A contiguous range of `count` descriptors from one view table.
    DescriptorTable { kind: ViewKind, count: u32 },
    /// Inline 32-bit values (local root arguments).
    Constants { num_values: u32 },
}

/// Shared description of what a pipeline expects to be bound, and where.
///
/// Root indices are the positions in `parameters`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    name: String,
    parameters: Vec<RootParameter>,
    local: bool,
}

impl PipelineLayout {
    pub fn new(name: impl Into<String>, parameters: Vec<RootParameter>) -> Self {
        Self {
            name: name.into(),
            parameters,
            local: false,
        }
    }

    /// A layout scoped to ray-tracing shader records.
    pub fn new_local(name: impl Into<String>, parameters: Vec<RootParameter>) -> Self {
        Self {
            local: true,
            ..Self::new(name, parameters)
        }
    }

    /// Layout shared by the rasterization passes.
    pub fn raster() -> Self {
        use ViewKind::*;
        let table = |kind| RootParameter::DescriptorTable { kind, count: 1 };
        Self::new(
            "raster",
            vec![
                table(GlobalCbv),
                table(PerObjectCbv),
                table(GlobalSrv),
                table(PerObjectSrv),
                table(Uav),
                table(Sampler),
            ],
        )
    }

    /// Global layout of the ray-tracing pass: scene acceleration structure,
    /// output image and camera constants.
    pub fn ray_tracing_global() -> Self {
        use ViewKind::*;
        let table = |kind| RootParameter::DescriptorTable { kind, count: 1 };
        Self::new("ray tracing global", vec![table(GlobalSrv), table(Uav), table(GlobalCbv)])
    }

    /// Local layout carrying a hit group's albedo.
    pub fn ray_tracing_local() -> Self {
        Self::new_local("ray tracing local", vec![RootParameter::Constants { num_values: 4 }])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    /// Root index of the descriptor table for `kind`, if the layout declares one.
    pub fn root_index_of(&self, kind: ViewKind) -> Option<u32> {
        self.parameters
            .iter()
            .position(|p| matches!(p, RootParameter::DescriptorTable { kind: k, .. } if *k == kind))
            .map(|i| i as u32)
    }

    /// Bytes of local root arguments a shader record carries for this layout.
    pub fn local_argument_size(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| match p {
                RootParameter::Constants { num_values } => *num_values as usize * 4,
                RootParameter::DescriptorTable { .. } => 8,
            })
            .sum()
    }

    /// Checks the layout against the view tables it will be bound from.
    ///
    /// Every table must name a shader-visible kind at most once, and its range
    /// must fit in that kind's capacity.
    pub fn validate(&self, views: &ViewTableManager) -> Result<()> {
        let mut seen = Vec::new();
        for (index, param) in self.parameters.iter().enumerate() {
            let RootParameter::DescriptorTable { kind, count } = *param else {
                continue;
            };
            ensure!(
                kind.is_shader_visible(),
                "layout '{}' parameter {index}: {kind:?} tables cannot be bound to shaders",
                self.name
            );
            ensure!(
                !seen.contains(&kind),
                "layout '{}' declares more than one {kind:?} table",
                self.name
            );
            ensure!(
                count > 0 && count <= views.capacity(kind),
                "layout '{}' parameter {index}: {count} {kind:?} descriptors exceed capacity {}",
                self.name,
                views.capacity(kind)
            );
            seen.push(kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewCapacities;

    #[test]
    fn raster_layout_maps_kinds_to_root_indices() {
        let layout = PipelineLayout::raster();
        assert_eq!(layout.root_index_of(ViewKind::GlobalCbv), Some(0));
        assert_eq!(layout.root_index_of(ViewKind::Sampler), Some(5));
        assert_eq!(layout.root_index_of(ViewKind::Rtv), None);
    }

    #[test]
    fn built_in_layouts_validate_against_default_tables() {
        let views = ViewTableManager::new(ViewCapacities::DEFAULT);
        PipelineLayout::raster().validate(&views).unwrap();
        PipelineLayout::ray_tracing_global().validate(&views).unwrap();
        PipelineLayout::ray_tracing_local().validate(&views).unwrap();
    }

    #[test]
    fn oversized_table_is_rejected() {
        let views = ViewTableManager::new(ViewCapacities::DEFAULT);
        let layout = PipelineLayout::new(
            "bad",
            vec![RootParameter::DescriptorTable {
                kind: ViewKind::Uav,
                count: 2,
            }],
        );
        assert!(layout.validate(&views).is_err());
    }

    #[test]
    fn duplicate_and_render_target_tables_are_rejected() {
        let views = ViewTableManager::new(ViewCapacities::DEFAULT);
        let table = |kind| RootParameter::DescriptorTable { kind, count: 1 };

        let dup = PipelineLayout::new("dup", vec![table(ViewKind::Sampler), table(ViewKind::Sampler)]);
        let rtv = PipelineLayout::new("rtv", vec![table(ViewKind::Rtv)]);

        assert!(dup.validate(&views).is_err());
        assert!(rtv.validate(&views).is_err());
    }

    #[test]
    fn local_layout_sizes_its_arguments() {
        assert_eq!(PipelineLayout::ray_tracing_local().local_argument_size(), 16);
    }
}
