// Resolution chain, technique selection and startup configuration shared by
// the renderer and the demo binary. Nothing in this crate touches the GPU.

pub mod config;
pub mod error;
pub mod resolution;
pub mod selection;
pub mod technique;

pub use config::DemoConfig;
pub use error::{ResolutionError, SelectionError};
pub use resolution::{
    CheckerboardResolutionKey, Extent2D, PresentResolutionKey, ResolutionInfo, ResolutionKey,
    TargetResolutionKey, find_present_resolution_key,
};
pub use selection::{ActiveExtents, ResolutionSelection};
pub use technique::UpscaleTechnique;
