// Upscaling comparison demo - winit event loop
//
// Renders a procedural scene at a reduced internal resolution, upscales it
// with the selected technique and shows it side by side with the amplified
// difference against a native render.
//
// Keys: T technique, R target resolution, I internal resolution,
// +/- delta amplifier, Esc quit.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use upscale_common::config::DEFAULT_FRAMES_IN_FLIGHT;
use upscale_common::resolution::find_present_resolution_key;
use upscale_common::{DemoConfig, UpscaleTechnique};
use upscale_renderer::{OverlayAction, Renderer};

#[derive(Parser)]
#[command(author, version, about = "Compare upscaling techniques against a native render")]
struct Arguments {
    /// Present height in pixels (1080 or 2160).
    #[arg(long, default_value_t = 1080)]
    height: u32,
    /// Frames the CPU may record ahead of the GPU.
    #[arg(long, default_value_t = DEFAULT_FRAMES_IN_FLIGHT)]
    frames_in_flight: usize,
    /// Upscale technique at startup.
    #[arg(long, value_enum, default_value = "none")]
    technique: TechniqueArg,
    /// Disable the Vulkan validation layers.
    #[arg(long)]
    no_validation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum TechniqueArg {
    None,
    Cas,
    Checkerboard,
}

impl From<TechniqueArg> for UpscaleTechnique {
    fn from(arg: TechniqueArg) -> Self {
        match arg {
            TechniqueArg::None => UpscaleTechnique::None,
            TechniqueArg::Cas => UpscaleTechnique::Cas,
            TechniqueArg::Checkerboard => UpscaleTechnique::Checkerboard,
        }
    }
}

fn key_action(key: KeyCode) -> Option<OverlayAction> {
    match key {
        KeyCode::KeyT => Some(OverlayAction::NextTechnique),
        KeyCode::KeyR => Some(OverlayAction::NextTarget),
        KeyCode::KeyI => Some(OverlayAction::NextInternal),
        KeyCode::Equal | KeyCode::NumpadAdd => Some(OverlayAction::IncreaseAmplifier),
        KeyCode::Minus | KeyCode::NumpadSubtract => Some(OverlayAction::DecreaseAmplifier),
        _ => None,
    }
}

/// Application state for the winit event loop.
struct UpscaleApp {
    config: DemoConfig,
    // Dropped before the window it renders to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    title: String,
    error: Option<anyhow::Error>,
}

impl UpscaleApp {
    fn new(config: DemoConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            title: String::new(),
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let extent = self.config.present_extent;
        let attributes = Window::default_attributes()
            .with_title("Upscale Demo")
            .with_inner_size(PhysicalSize::new(extent.width, extent.height))
            .with_resizable(true);
        let window = event_loop.create_window(attributes).context("create window")?;

        let width = window.inner_size().width;
        let present = find_present_resolution_key(width).context("pick present resolution")?;

        // SAFETY: the renderer is dropped before the window (field order).
        let renderer = unsafe { Renderer::new(&window, &self.config, present) }
            .context("initialize renderer")?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.refresh_title();
        Ok(())
    }

    fn refresh_title(&mut self) {
        if let (Some(renderer), Some(window)) = (&self.renderer, &self.window) {
            let title = renderer.title();
            if title != self.title {
                window.set_title(&title);
                self.title = title;
            }
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.error = Some(error);
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        if code == KeyCode::Escape {
            event_loop.exit();
            return;
        }
        let (Some(action), Some(renderer)) = (key_action(code), self.renderer.as_mut()) else {
            return;
        };
        match renderer.apply_action(action) {
            Ok(true) => {
                for line in renderer.overlay().lines(renderer.selection()) {
                    log::debug!("{}", line);
                }
            }
            Ok(false) => {}
            Err(e) => log::warn!("Ignoring {:?}: {}", action, e),
        }
    }
}

impl ApplicationHandler for UpscaleApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                // SAFETY: the window outlives the renderer.
                if let Err(e) = unsafe { renderer.render_frame() } {
                    self.fail(event_loop, anyhow::Error::new(e).context("render frame"));
                    return;
                }
                self.refresh_title();
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        log::info!("Shutting down");
    }
}

fn run(arguments: Arguments) -> Result<()> {
    let config = DemoConfig::for_present_height(arguments.height)
        .with_frames_in_flight(arguments.frames_in_flight)
        .with_validation(!arguments.no_validation && cfg!(debug_assertions));
    let config = DemoConfig {
        technique: arguments.technique.into(),
        ..config
    };

    let event_loop = EventLoop::new().context("create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = UpscaleApp::new(config);
    event_loop.run_app(&mut app).context("run event loop")?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Arguments::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(key_action(KeyCode::KeyT), Some(OverlayAction::NextTechnique));
        assert_eq!(key_action(KeyCode::KeyR), Some(OverlayAction::NextTarget));
        assert_eq!(key_action(KeyCode::KeyI), Some(OverlayAction::NextInternal));
        assert_eq!(key_action(KeyCode::NumpadAdd), Some(OverlayAction::IncreaseAmplifier));
        assert_eq!(key_action(KeyCode::Minus), Some(OverlayAction::DecreaseAmplifier));
        assert_eq!(key_action(KeyCode::KeyQ), None);
    }

    #[test]
    fn test_arguments_parse() {
        let args = Arguments::parse_from(["upscale-demo", "--height", "2160", "--technique", "checkerboard"]);
        assert_eq!(args.height, 2160);
        assert_eq!(UpscaleTechnique::from(args.technique), UpscaleTechnique::Checkerboard);
        assert_eq!(args.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert!(!args.no_validation);
    }
}
