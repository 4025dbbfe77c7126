//! Renderer error type.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    /// A Vulkan call returned an error code.
    #[error("{what} failed: {result:?}")]
    Vulkan { what: &'static str, result: vk::Result },

    #[error("GPU memory allocation for {name} failed: {source}")]
    Allocation {
        name: String,
        #[source]
        source: gpu_allocator::AllocationError,
    },

    /// The per-frame constant buffer has no room for the request.
    #[error("constant buffer exhausted: {requested} bytes requested at offset {cursor} of {capacity}")]
    ConstantBufferExhausted { requested: u64, cursor: u64, capacity: u64 },

    #[error("invalid SPIR-V module {name}: {reason}")]
    Shader { name: &'static str, reason: String },

    #[error("window handle unavailable: {0}")]
    Window(String),

    #[error("{0}")]
    Unsupported(String),
}

impl RendererError {
    /// Wrap a Vulkan result code with the name of the failing operation.
    pub fn vk(what: &'static str) -> impl FnOnce(vk::Result) -> RendererError {
        move |result| RendererError::Vulkan { what, result }
    }
}

pub type RendererResult<T> = Result<T, RendererError>;
