/// Closed set of descriptor table kinds.
///
/// Each kind has its own table with an independent capacity and slot counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ViewKind {
    GlobalCbv,
    PerObjectCbv,
    GlobalSrv,
    PerObjectSrv,
    Uav,
    Sampler,
    Rtv,
    Dsv,
}

impl ViewKind {
    pub const ALL: [ViewKind; 8] = [
        ViewKind::GlobalCbv,
        ViewKind::PerObjectCbv,
        ViewKind::GlobalSrv,
        ViewKind::PerObjectSrv,
        ViewKind::Uav,
        ViewKind::Sampler,
        ViewKind::Rtv,
        ViewKind::Dsv,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Whether descriptors of this kind can be bound to a pipeline layout table.
    ///
    /// Render-target and depth-stencil views are bound through
    /// `set_render_targets` instead.
    pub fn is_shader_visible(self) -> bool {
        !matches!(self, ViewKind::Rtv | ViewKind::Dsv)
    }
}
