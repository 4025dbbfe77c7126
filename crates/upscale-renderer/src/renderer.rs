//! Top-level renderer: owns the device, the passes and the resolution state,
//! and drives one frame at a time.

use std::time::Instant;

use ash::vk;
use raw_window_handle::HasDisplayHandle;
use upscale_common::{ActiveExtents, DemoConfig, PresentResolutionKey, ResolutionSelection, SelectionError};

use crate::delta::DeltaPass;
use crate::error::{RendererError, RendererResult};
use crate::frame::{record_frame, FrameWork};
use crate::overlay::{DebugOverlay, OverlayAction};
use crate::present::{record_present_blit, PresentCopy};
use crate::scene::{ScenePass, SceneRenderer};
use crate::targets::{InternalTargets, RenderTargets};
use crate::upscale::UpscaleDispatcher;
use crate::vulkan::swapchain::SwapchainStatus;
use crate::vulkan::{
    vk_extent, CommandManager, ConstantStream, DescriptorPool, GpuTimers, MemoryManager, PerFrameTimerData,
    Swapchain, VkRecorder, VulkanContext, VulkanSurface,
};

/// Programs allocating one descriptor set per frame slot.
const SET_OWNERS: [&str; 7] = [
    "scaled_copy",
    "cas",
    "cb_resolve",
    "image_delta",
    "present_copy",
    "scene",
    "scene field",
];

const SETS_PER_FRAME: u32 = SET_OWNERS.len() as u32;

/// Longest frame step fed to the animation, in seconds.
const MAX_FRAME_DT: f32 = 0.1;

pub struct Renderer {
    // Fields drop in declaration order: GPU resources, then the objects
    // that own their memory and pools, then the swapchain, surface and device.
    targets: Option<RenderTargets>,
    scene: SceneRenderer,
    dispatcher: UpscaleDispatcher,
    delta: DeltaPass,
    present_copy: PresentCopy,
    pool: DescriptorPool,
    constants: ConstantStream,
    timers: GpuTimers,
    commands: CommandManager,
    memory: MemoryManager,
    swapchain: Swapchain,
    surface: VulkanSurface,
    ctx: VulkanContext,

    selection: ResolutionSelection,
    overlay: DebugOverlay,
    window_extent: vk::Extent2D,
    swapchain_dirty: bool,
    last_frame: Instant,
}

impl Renderer {
    /// Bring up Vulkan for `window` and build every pass.
    ///
    /// # Safety
    /// The window must outlive the renderer.
    pub unsafe fn new(
        window: &winit::window::Window,
        config: &DemoConfig,
        present: PresentResolutionKey,
    ) -> RendererResult<Self> {
        let display_handle = window.display_handle()
            .map_err(|e| RendererError::Window(e.to_string()))?
            .as_raw();
        let ctx = VulkanContext::new(display_handle, config.enable_validation)?;
        let surface = VulkanSurface::from_winit(&ctx, window)?;

        let size = window.inner_size();
        let frames = config.frames_in_flight;
        let swapchain = Swapchain::new(&ctx, &surface, size.width, size.height, frames)?;

        let memory = MemoryManager::new(&ctx)?;
        let commands = CommandManager::new(&ctx, frames)?;
        let timers = GpuTimers::new(&ctx, frames)?;
        let constants = ConstantStream::new(
            &memory,
            frames,
            config.constant_buffer_bytes,
            ctx.min_uniform_buffer_offset_alignment(),
        )?;
        let pool = DescriptorPool::new(&ctx, SETS_PER_FRAME * frames as u32)?;

        let dispatcher = UpscaleDispatcher::new(&ctx, &pool, frames, config.cas_sharpness)?;
        let mode = dispatcher.checkerboard().mode();
        let scene = SceneRenderer::new(&ctx, &memory, &commands, &pool, &constants, frames, mode)?;
        let delta = DeltaPass::new(&ctx, &pool, frames)?;
        let present_copy = PresentCopy::new(&ctx, &pool, frames)?;

        log::info!(
            "Renderer ready: {} frames in flight, present {}, {}",
            frames,
            present.text(),
            config.technique
        );

        Ok(Self {
            targets: None,
            scene,
            dispatcher,
            delta,
            present_copy,
            pool,
            constants,
            timers,
            commands,
            memory,
            swapchain,
            surface,
            ctx,
            selection: ResolutionSelection::new(present, config.technique),
            overlay: DebugOverlay::new(config.delta_amplifier),
            window_extent: vk::Extent2D { width: size.width, height: size.height },
            swapchain_dirty: false,
            last_frame: Instant::now(),
        })
    }

    pub fn selection(&self) -> &ResolutionSelection {
        &self.selection
    }

    pub fn overlay(&self) -> &DebugOverlay {
        &self.overlay
    }

    /// Apply an overlay input action to the selection or overlay state.
    pub fn apply_action(&mut self, action: OverlayAction) -> Result<bool, SelectionError> {
        self.overlay.apply(action, &mut self.selection)
    }

    pub fn title(&self) -> String {
        self.overlay.title(&self.selection)
    }

    /// Note a new window size; the swapchain is rebuilt before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.swapchain_dirty = true;
    }

    unsafe fn recreate_swapchain(&mut self) -> RendererResult<()> {
        let extent = self.window_extent;
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }
        self.swapchain.recreate(&self.ctx, &mut self.surface, extent.width, extent.height)?;
        self.swapchain_dirty = false;
        log::debug!("Swapchain recreated at {}x{}", self.swapchain.extent.width, self.swapchain.extent.height);
        Ok(())
    }

    /// Rebuild the render targets if they no longer fit `extents`.
    unsafe fn ensure_targets(&mut self, extents: &ActiveExtents) -> RendererResult<()> {
        if self.targets.as_ref().is_some_and(|t| t.matches(extents)) {
            return Ok(());
        }
        self.ctx.wait_idle();
        // Release the old set before allocating its replacement.
        self.targets = None;
        let mode = self.dispatcher.checkerboard().mode();
        self.targets = Some(RenderTargets::new(&self.ctx, &self.memory, &self.commands, extents, mode)?);
        self.dispatcher.checkerboard_mut().invalidate_history();
        Ok(())
    }

    /// Render and present one frame.
    pub unsafe fn render_frame(&mut self) -> RendererResult<()> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(());
        }

        let frame_index = self.swapchain.current_frame;
        self.swapchain.wait_for_frame()?;
        self.timers.readback_gpu_timestamps(frame_index)?;
        if let Some(summary) = self.overlay.update_timers(self.timers.latest(), Instant::now()) {
            log::info!("GPU: {}", summary);
        }

        self.selection.update_target_resolution();
        self.selection.update_internal_resolution();
        let extents = self.selection.active_extents();
        self.ensure_targets(&extents)?;

        if self.swapchain_dirty {
            self.recreate_swapchain()?;
        }
        if self.swapchain.acquire_next_image()? == SwapchainStatus::OutOfDate {
            return self.recreate_swapchain();
        }
        self.swapchain.reset_fence()?;

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32().min(MAX_FRAME_DT);
        self.last_frame = now;
        self.scene.animation.advance(dt);

        let cmd = self.commands.begin_frame(frame_index)?;
        self.constants.new_frame(frame_index);
        let targets = self.targets.as_ref().ok_or_else(|| {
            RendererError::Unsupported("render targets missing after rebuild".to_string())
        })?;

        let mut rec = VkRecorder::new(&self.ctx.device, cmd);
        let mut work = FrameRecording {
            ctx: &self.ctx,
            scene: &self.scene,
            dispatcher: &mut self.dispatcher,
            delta: &self.delta,
            present_copy: &self.present_copy,
            constants: &mut self.constants,
            targets,
            frame_index,
            extents,
            delta_amplifier: self.overlay.delta_amplifier(),
            swapchain_image: self.swapchain.current_image(),
            swapchain_extent: self.swapchain.extent,
        };
        record_frame(&mut rec, self.timers.frame_mut(frame_index), &mut work)?;

        self.commands.end_frame(frame_index)?;
        let sync = self.swapchain.current_sync();
        self.commands.submit_frame(
            &self.ctx,
            frame_index,
            sync.image_available,
            sync.render_finished,
            sync.in_flight,
        )?;

        if self.swapchain.present(&self.ctx)? == SwapchainStatus::OutOfDate {
            self.swapchain_dirty = true;
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.ctx.wait_idle();
    }
}

/// Borrowed renderer state for recording one frame.
struct FrameRecording<'a> {
    ctx: &'a VulkanContext,
    scene: &'a SceneRenderer,
    dispatcher: &'a mut UpscaleDispatcher,
    delta: &'a DeltaPass,
    present_copy: &'a PresentCopy,
    constants: &'a mut ConstantStream,
    targets: &'a RenderTargets,
    frame_index: usize,
    extents: ActiveExtents,
    delta_amplifier: f32,
    swapchain_image: vk::Image,
    swapchain_extent: vk::Extent2D,
}

impl FrameRecording<'_> {
    fn mismatch(&self) -> RendererError {
        RendererError::Unsupported(format!("render targets were not built for {}", self.extents.technique))
    }
}

impl<'r> FrameWork<VkRecorder<'r>> for FrameRecording<'_> {
    fn scene_internal(&mut self, rec: &mut VkRecorder<'r>) -> RendererResult<()> {
        let extent = self.extents.internal;
        let offsets = self.scene.upload_constants(self.constants, extent)?;

        let pass = match (&self.targets.internal, self.extents.technique.is_checkerboard()) {
            (InternalTargets::Single(scene), false) => ScenePass {
                color: &scene.color,
                velocity: &scene.velocity,
                depth: &scene.depth,
                extent,
                field: None,
            },
            (InternalTargets::Checkerboard(cb), true) => {
                let state = self.dispatcher.checkerboard_mut();
                let field = state.advance_field() as usize;
                ScenePass {
                    color: &cb.fields[field].color,
                    velocity: &cb.fields[field].velocity,
                    depth: &cb.depth,
                    extent,
                    field: Some(state.field_setup()),
                }
            }
            _ => return Err(self.mismatch()),
        };

        unsafe { self.scene.record(self.ctx, rec, self.frame_index, &offsets, &pass) }
    }

    fn upscale(&mut self, rec: &mut VkRecorder<'r>, timers: &mut PerFrameTimerData) -> RendererResult<()> {
        unsafe {
            self.dispatcher.upscale_internal_to_target(
                &self.ctx.device,
                rec,
                self.frame_index,
                timers,
                self.constants,
                self.targets,
                &self.extents,
            )
        }
    }

    fn scene_target(&mut self, rec: &mut VkRecorder<'r>) -> RendererResult<()> {
        let extent = self.extents.target;
        let offsets = self.scene.upload_constants(self.constants, extent)?;
        let reference = &self.targets.reference;
        let pass = ScenePass {
            color: &reference.color,
            velocity: &reference.velocity,
            depth: &reference.depth,
            extent,
            field: None,
        };
        unsafe { self.scene.record(self.ctx, rec, self.frame_index, &offsets, &pass) }
    }

    fn composite(&mut self, rec: &mut VkRecorder<'r>) -> RendererResult<()> {
        let device = &self.ctx.device;
        unsafe {
            self.delta
                .prepare(
                    device,
                    self.frame_index,
                    self.constants,
                    self.targets,
                    self.extents.target,
                    self.delta_amplifier,
                )?
                .record(rec);
            self.present_copy
                .prepare(
                    device,
                    self.frame_index,
                    self.constants,
                    self.targets,
                    self.extents.target,
                    self.extents.present,
                )?
                .record(rec);
            record_present_blit(
                rec,
                self.targets.present.handle,
                vk_extent(self.extents.present),
                self.swapchain_image,
                self.swapchain_extent,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sized_for_each_program() {
        // Three upscale programs, delta, present copy and two scene programs.
        assert_eq!(SETS_PER_FRAME, 3 + 2 + 2);
        let mut owners = SET_OWNERS.to_vec();
        owners.sort();
        owners.dedup();
        assert_eq!(owners.len(), SET_OWNERS.len());
    }
}
