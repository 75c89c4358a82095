use ember_engine::RendererConfig;
use winit::dpi::LogicalSize;

/// Surface parameters for the presenting window.
///
/// Frames arrive as RGBA8 pixels and are copied into the surface texture, so
/// the surface must support `COPY_DST` with an 8-bit RGBA or BGRA format.
#[derive(Debug, Clone)]
pub struct SurfaceInit {
    /// Present mode (swap behavior). FIFO is supported everywhere.
    pub present_mode: wgpu::PresentMode,

    /// Optional alpha mode preference; an unsupported mode falls back to the first supported one.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    /// Hint only; support depends on platform and backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for SurfaceInit {
    fn default() -> Self {
        Self {
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            desired_maximum_frame_latency: 2,
        }
    }
}

/// Window and renderer configuration.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub surface: SurfaceInit,
    /// Width and height are replaced by the window's physical size.
    pub renderer: RendererConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "ember".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            surface: SurfaceInit::default(),
            renderer: RendererConfig::default(),
        }
    }
}
