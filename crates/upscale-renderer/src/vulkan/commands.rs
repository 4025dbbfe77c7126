//! Command buffer management and the device-backed command recorder.

use ash::vk;

use super::recorder::{barrier_masks, CommandRecorder, ImageTransition};
use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

/// Command pool and buffer for a single frame.
struct FrameCommands {
    pool: vk::CommandPool,
    primary: vk::CommandBuffer,
}

/// Command buffer manager with per-frame pools.
pub struct CommandManager {
    frames: Vec<FrameCommands>,
    transient_pool: vk::CommandPool,
    device: ash::Device,
}

impl CommandManager {
    /// Create one resettable pool per frame in flight plus a transient pool.
    pub unsafe fn new(ctx: &VulkanContext, frames_in_flight: usize) -> RendererResult<Self> {
        let graphics_family = ctx.queue_families.graphics
            .ok_or_else(|| RendererError::Unsupported("No graphics queue family".to_string()))?;

        let mut manager = Self {
            frames: Vec::with_capacity(frames_in_flight),
            transient_pool: vk::CommandPool::null(),
            device: ctx.device.clone(),
        };

        // Create per-frame command pools
        for _ in 0..frames_in_flight {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let pool = ctx.device.create_command_pool(&pool_info, None)
                .map_err(RendererError::vk("vkCreateCommandPool"))?;
            // Owned from here so a failed allocation below still frees it.
            manager.frames.push(FrameCommands { pool, primary: vk::CommandBuffer::null() });

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let primary = ctx.device.allocate_command_buffers(&alloc_info)
                .map_err(RendererError::vk("vkAllocateCommandBuffers"))?[0];
            if let Some(frame) = manager.frames.last_mut() {
                frame.primary = primary;
            }
        }

        // Create transient pool for one-shot commands
        let transient_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        manager.transient_pool = ctx.device.create_command_pool(&transient_info, None)
            .map_err(RendererError::vk("vkCreateCommandPool"))?;

        Ok(manager)
    }

    /// Begin recording commands for a frame.
    pub unsafe fn begin_frame(&self, frame_index: usize) -> RendererResult<vk::CommandBuffer> {
        let frame = &self.frames[frame_index];

        // Reset the command buffer
        self.device.reset_command_buffer(frame.primary, vk::CommandBufferResetFlags::empty())
            .map_err(RendererError::vk("vkResetCommandBuffer"))?;

        // Begin recording
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        self.device.begin_command_buffer(frame.primary, &begin_info)
            .map_err(RendererError::vk("vkBeginCommandBuffer"))?;

        Ok(frame.primary)
    }

    /// End recording commands for a frame.
    pub unsafe fn end_frame(&self, frame_index: usize) -> RendererResult<()> {
        let frame = &self.frames[frame_index];
        self.device.end_command_buffer(frame.primary)
            .map_err(RendererError::vk("vkEndCommandBuffer"))
    }

    /// Submit the frame's commands to the graphics queue.
    pub unsafe fn submit_frame(
        &self,
        ctx: &VulkanContext,
        frame_index: usize,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RendererResult<()> {
        let frame = &self.frames[frame_index];

        let wait_semaphores = [wait_semaphore];
        // The swapchain image is first touched by the final blit.
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [signal_semaphore];
        let command_buffers = [frame.primary];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        ctx.device.queue_submit(ctx.graphics_queue, &[submit_info], fence)
            .map_err(RendererError::vk("vkQueueSubmit"))
    }

    /// Begin a single-use command buffer.
    pub unsafe fn begin_single_time(&self) -> RendererResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.transient_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // Allocate from the transient pool
        let cmd = self.device.allocate_command_buffers(&alloc_info)
            .map_err(RendererError::vk("vkAllocateCommandBuffers"))?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        self.device.begin_command_buffer(cmd, &begin_info)
            .map_err(RendererError::vk("vkBeginCommandBuffer"))?;

        Ok(cmd)
    }

    /// End and submit a single-use command buffer, waiting for completion.
    pub unsafe fn end_single_time(&self, ctx: &VulkanContext, cmd: vk::CommandBuffer) -> RendererResult<()> {
        let command_buffers = [cmd];
        let result = self.submit_and_wait(ctx, cmd);
        self.device.free_command_buffers(self.transient_pool, &command_buffers);
        result
    }

    unsafe fn submit_and_wait(&self, ctx: &VulkanContext, cmd: vk::CommandBuffer) -> RendererResult<()> {
        self.device.end_command_buffer(cmd)
            .map_err(RendererError::vk("vkEndCommandBuffer"))?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers);

        ctx.device.queue_submit(ctx.graphics_queue, &[submit_info], vk::Fence::null())
            .map_err(RendererError::vk("vkQueueSubmit"))?;

        // Block until the upload is done
        ctx.device.queue_wait_idle(ctx.graphics_queue)
            .map_err(RendererError::vk("vkQueueWaitIdle"))
    }
}

impl Drop for CommandManager {
    fn drop(&mut self) {
        unsafe {
            for frame in &self.frames {
                self.device.destroy_command_pool(frame.pool, None);
            }
            self.device.destroy_command_pool(self.transient_pool, None);
        }
    }
}

/// Records into a live command buffer.
pub struct VkRecorder<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
}

impl<'a> VkRecorder<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }

    /// Copy a tightly packed buffer into the first `size` bytes of another.
    pub unsafe fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        self.device.cmd_copy_buffer(self.cmd, src, dst, &[region]);
    }

    /// Full-image blit with linear filtering.
    pub unsafe fn blit_image(
        &mut self,
        src: vk::Image,
        src_extent: vk::Extent2D,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |e: vk::Extent2D| vk::Offset3D { x: e.width as i32, y: e.height as i32, z: 1 };
        let region = vk::ImageBlit::default()
            .src_subresource(subresource)
            .src_offsets([vk::Offset3D::default(), corner(src_extent)])
            .dst_subresource(subresource)
            .dst_offsets([vk::Offset3D::default(), corner(dst_extent)]);

        self.device.cmd_blit_image(
            self.cmd,
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
            vk::Filter::LINEAR,
        );
    }

    pub unsafe fn set_viewport_scissor(&mut self, viewport: vk::Viewport, scissor: vk::Rect2D) {
        self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
        self.device.cmd_set_scissor(self.cmd, 0, &[scissor]);
    }
}

impl CommandRecorder for VkRecorder<'_> {
    fn transition_images(&mut self, transitions: &[ImageTransition]) {
        if transitions.is_empty() {
            return;
        }

        // One barrier per image, stages merged across the batch
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let barriers: Vec<_> = transitions.iter()
            .map(|t| {
                let masks = barrier_masks(t.old_layout, t.new_layout);
                src_stage |= masks.src_stage;
                dst_stage |= masks.dst_stage;
                vk::ImageMemoryBarrier::default()
                    .old_layout(t.old_layout)
                    .new_layout(t.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(t.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: t.aspect,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
                    .src_access_mask(masks.src_access)
                    .dst_access_mask(masks.dst_access)
            })
            .collect();

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    fn bind_compute(
        &mut self,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::COMPUTE, pipeline);
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                dynamic_offsets,
            );
        }
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        unsafe {
            self.device.cmd_dispatch(self.cmd, groups[0], groups[1], groups[2]);
        }
    }

    fn bind_graphics_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet, dynamic_offsets: &[u32]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                dynamic_offsets,
            );
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        unsafe {
            self.device.cmd_draw_indexed(self.cmd, index_count, 1, first_index, 0, 0);
        }
    }

    fn reset_query_pool(&mut self, pool: vk::QueryPool, first: u32, count: u32) {
        unsafe {
            self.device.cmd_reset_query_pool(self.cmd, pool, first, count);
        }
    }

    fn write_timestamp(&mut self, pool: vk::QueryPool, slot: u32) {
        unsafe {
            self.device.cmd_write_timestamp(
                self.cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                pool,
                slot,
            );
        }
    }
}
