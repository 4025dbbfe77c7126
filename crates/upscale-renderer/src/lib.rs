#![allow(clippy::too_many_arguments, clippy::missing_safety_doc)]
// Vulkan 1.3 upscaling comparison renderer

// Vulkan backend
pub mod vulkan;
pub mod error;

// Passes
pub mod compute;
pub mod scene;
pub mod targets;
pub mod upscale;
pub mod delta;
pub mod present;

// Frame driving
pub mod frame;
pub mod overlay;
pub mod renderer;

pub use error::{RendererError, RendererResult};
pub use overlay::{DebugOverlay, OverlayAction};
pub use renderer::Renderer;
pub use upscale::checkerboard::SampleMode;
