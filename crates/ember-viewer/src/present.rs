use std::borrow::Cow;

use anyhow::{Context, Result};
use ember_engine::{PresentSink, PresentedFrame};
use parking_lot::Mutex;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::SurfaceInit;

/// Holds the most recent frame handed over by the engine's present queue.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    latest: Mutex<Option<PresentedFrame>>,
}

impl FrameMailbox {
    pub fn take(&self) -> Option<PresentedFrame> {
        self.latest.lock().take()
    }
}

impl PresentSink for FrameMailbox {
    fn present(&self, frame: PresentedFrame) {
        // Unconsumed frames are superseded.
        *self.latest.lock() = Some(frame);
    }
}

/// What the caller should do after a failed surface acquisition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceErrorAction {
    Reconfigured,
    SkipFrame,
    Fatal,
}

/// wgpu surface that displays engine frames by copying their pixels.
pub struct SurfacePresenter<'w> {
    surface: wgpu::Surface<'w>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
}

impl<'w> SurfacePresenter<'w> {
    /// Creates the surface for `window`. Adapter and device acquisition is asynchronous under wgpu.
    pub async fn new(window: &'w Window, init: SurfaceInit) -> Result<Self> {
        let size = window.inner_size();
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find an adapter for the window surface")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("ember-viewer device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let caps = surface.get_capabilities(&adapter);
        anyhow::ensure!(
            caps.usages.contains(wgpu::TextureUsages::COPY_DST),
            "surface does not accept copies"
        );
        let format = choose_surface_format(&caps.formats)
            .context("surface offers no 8-bit RGBA or BGRA format")?;
        let alpha_mode = init
            .alpha_mode
            .filter(|m| caps.alpha_modes.contains(m))
            .or_else(|| caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::COPY_DST,
            format,
            width: size.width,
            height: size.height,
            present_mode: init.present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);
        log::info!("surface configured: {format:?} {}x{}", size.width, size.height);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
        })
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Reconfigures the surface. A zero-sized window keeps the old configuration.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Copies `frame` into the next surface texture and presents it.
    ///
    /// Rows or columns outside the overlap of the frame and the surface are left untouched.
    pub fn present(&mut self, frame: &PresentedFrame) -> Result<(), SurfaceErrorAction> {
        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(err) => return Err(self.handle_surface_error(err)),
        };

        let width = frame.width.min(self.config.width);
        let height = frame.height.min(self.config.height);
        let pixels = surface_pixels(&frame.pixels, self.config.format);

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::empty());
        texture.present();
        Ok(())
    }

    fn handle_surface_error(&mut self, err: wgpu::SurfaceError) -> SurfaceErrorAction {
        match err {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                if self.size.width > 0 && self.size.height > 0 {
                    self.surface.configure(&self.device, &self.config);
                }
                SurfaceErrorAction::Reconfigured
            }
            wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
            wgpu::SurfaceError::Timeout => SurfaceErrorAction::SkipFrame,
            wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
        }
    }
}

/// Picks a format whose texels match the engine's byte layout, up to a channel swap.
///
/// Non-sRGB formats come first: engine pixels are already display-encoded.
fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;

    [F::Rgba8Unorm, F::Bgra8Unorm, F::Rgba8UnormSrgb, F::Bgra8UnormSrgb]
        .into_iter()
        .find(|f| formats.contains(f))
}

/// Reorders RGBA8 pixels into the surface's channel order.
fn surface_pixels(pixels: &[u8], format: wgpu::TextureFormat) -> Cow<'_, [u8]> {
    match format {
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            let mut swapped = pixels.to_vec();
            for px in swapped.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            Cow::Owned(swapped)
        }
        _ => Cow::Borrowed(pixels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: usize) -> PresentedFrame {
        PresentedFrame {
            back_buffer_index: index,
            width: 1,
            height: 1,
            pixels: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn mailbox_keeps_only_the_latest_frame() {
        let mailbox = FrameMailbox::default();
        mailbox.present(frame(0));
        mailbox.present(frame(1));

        assert_eq!(mailbox.take().map(|f| f.back_buffer_index), Some(1));
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn prefers_linear_formats() {
        use wgpu::TextureFormat as F;

        assert_eq!(
            choose_surface_format(&[F::Bgra8UnormSrgb, F::Bgra8Unorm]),
            Some(F::Bgra8Unorm)
        );
        assert_eq!(choose_surface_format(&[F::Rgba16Float]), None);
    }

    #[test]
    fn bgra_surfaces_get_swizzled_pixels() {
        let rgba = [10, 20, 30, 40, 50, 60, 70, 80];

        let bgra = surface_pixels(&rgba, wgpu::TextureFormat::Bgra8Unorm);
        assert_eq!(&*bgra, &[30, 20, 10, 40, 70, 60, 50, 80]);

        let same = surface_pixels(&rgba, wgpu::TextureFormat::Rgba8Unorm);
        assert!(matches!(same, Cow::Borrowed(_)));
    }
}
