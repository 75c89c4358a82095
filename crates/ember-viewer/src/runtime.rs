use std::sync::Arc;

use anyhow::{Context, Result};
use ember_engine::Renderer;
use ember_engine::scene::{FlyCamera, demo_scene};
use ouroboros::self_referencing;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::ViewerConfig;
use crate::input::{Action, map_key};
use crate::present::{FrameMailbox, SurfaceErrorAction, SurfacePresenter};

/// Entry point for the viewer's event loop.
pub struct Runtime;

impl Runtime {
    pub fn run(config: ViewerConfig) -> Result<()> {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        state.failure.map_or(Ok(()), Err)
    }
}

#[self_referencing]
struct WindowEntry {
    renderer: Renderer,
    camera: FlyCamera,
    mailbox: Arc<FrameMailbox>,

    window: Window,

    #[borrows(window)]
    #[covariant]
    presenter: SurfacePresenter<'this>,
}

struct AppState {
    config: ViewerConfig,
    entry: Option<WindowEntry>,
    exit_requested: bool,
    failure: Option<anyhow::Error>,
}

impl AppState {
    fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            entry: None,
            exit_requested: false,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.failure = Some(err);
        self.exit_requested = true;
        event_loop.exit();
    }

    fn create_window_entry(&mut self, event_loop: &ActiveEventLoop) -> Result<WindowEntry> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;
        let size = window.inner_size();

        let mailbox = Arc::new(FrameMailbox::default());
        let mut renderer_config = self.config.renderer.clone();
        renderer_config.width = size.width.max(1);
        renderer_config.height = size.height.max(1);
        let renderer = Renderer::new(renderer_config, mailbox.clone(), demo_scene)
            .context("failed to create renderer")?;
        log::info!("rendering on {}", renderer.device().adapter().name);

        let camera = FlyCamera::new(size.width.max(1), size.height.max(1));
        let surface = self.config.surface.clone();

        WindowEntryTryBuilder {
            renderer,
            camera,
            mailbox,
            window,
            presenter_builder: |w| pollster::block_on(SurfacePresenter::new(w, surface)),
        }
        .try_build()
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, action: Action) {
        let Some(entry) = self.entry.as_mut() else {
            return;
        };
        match action {
            Action::Camera(control) => entry.with_camera_mut(|camera| camera.apply(control)),
            Action::Toggle(pass) => entry.with_renderer_mut(|renderer| {
                let mut toggles = renderer.toggles();
                pass.toggle(&mut toggles);
                log::info!("passes: {toggles:?}");
                renderer.set_toggles(toggles);
            }),
            Action::Exit => {
                self.exit_requested = true;
                event_loop.exit();
            }
        }
    }

    fn resize(&mut self) -> Result<()> {
        let Some(entry) = self.entry.as_mut() else {
            return Ok(());
        };
        entry.with_mut(|fields| {
            let size = fields.window.inner_size();
            fields.presenter.resize(size);
            if size.width == 0 || size.height == 0 {
                return Ok(());
            }
            fields.camera.resize(size.width, size.height);
            fields.renderer.resize(size.width, size.height)
        })
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(entry) = self.entry.as_mut() else {
            return Ok(());
        };
        entry.with_mut(|fields| {
            let size = fields.presenter.size();
            if size.width == 0 || size.height == 0 {
                return Ok(());
            }

            let stats = fields.renderer.render_frame(&*fields.camera)?;
            log::trace!("{stats:?}");

            let Some(frame) = fields.mailbox.take() else {
                return Ok(());
            };
            match fields.presenter.present(&frame) {
                Ok(()) => Ok(()),
                Err(SurfaceErrorAction::Fatal) => Err(anyhow::anyhow!("surface out of memory")),
                Err(action) => {
                    log::debug!("surface frame dropped: {action:?}");
                    Ok(())
                }
            }
        })
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.entry.is_some() {
            return;
        }

        match self.create_window_entry(event_loop) {
            Ok(entry) => {
                entry.with_window(|w| w.request_redraw());
                self.entry = Some(entry);
            }
            Err(err) => self.fail(event_loop, err.context("failed to create the viewer window")),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        // Continuous redraw; every frame waits for its own fence anyway.
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(entry) = &self.entry {
            entry.with_window(|w| w.request_redraw());
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                // Drop the renderer first; it drains the GPU before releasing the scene.
                self.entry = None;
                self.exit_requested = true;
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                if let Some(action) = map_key(event.physical_key) {
                    self.handle_key(event_loop, action);
                }
            }

            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Err(err) = self.resize() {
                    self.fail(event_loop, err.context("resize failed"));
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err.context("frame failed"));
                }
            }

            _ => {}
        }
    }
}
