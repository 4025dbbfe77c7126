//! Render targets for the resolution chain.
//!
//! Every image has one steady layout it sits in between passes. Passes
//! that need a different layout transition away and back inside their own
//! recording, so the frame never has to track layouts dynamically.

use ash::vk;
use upscale_common::{ActiveExtents, Extent2D};

use crate::error::RendererResult;
use crate::upscale::checkerboard::SampleMode;
use crate::vulkan::memory::ImageDesc;
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};
use crate::vulkan::{vk_extent, CommandManager, Image, MemoryManager, VkRecorder, VulkanContext};

pub const COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const VELOCITY_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const PRESENT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// What an image is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    SceneColor,
    SceneVelocity,
    SceneDepth,
    /// Checkerboard history, target and delta composite.
    Storage,
    Present,
}

impl TargetRole {
    pub fn format(self) -> vk::Format {
        match self {
            TargetRole::SceneColor | TargetRole::Storage => COLOR_FORMAT,
            TargetRole::SceneVelocity => VELOCITY_FORMAT,
            TargetRole::SceneDepth => DEPTH_FORMAT,
            TargetRole::Present => PRESENT_FORMAT,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        use vk::ImageUsageFlags as U;
        match self {
            TargetRole::SceneColor | TargetRole::SceneVelocity => U::COLOR_ATTACHMENT | U::SAMPLED,
            TargetRole::SceneDepth => U::DEPTH_STENCIL_ATTACHMENT,
            TargetRole::Storage => U::STORAGE | U::SAMPLED,
            TargetRole::Present => U::STORAGE | U::TRANSFER_SRC,
        }
    }

    /// Layout the image rests in between passes.
    pub fn steady_layout(self) -> vk::ImageLayout {
        match self {
            TargetRole::SceneColor | TargetRole::SceneVelocity => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            TargetRole::SceneDepth => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            TargetRole::Storage | TargetRole::Present => vk::ImageLayout::GENERAL,
        }
    }

    /// Transition from a freshly created image into the steady layout.
    pub fn initial_transition(self, image: vk::Image) -> ImageTransition {
        let old = vk::ImageLayout::UNDEFINED;
        match self {
            TargetRole::SceneDepth => ImageTransition::depth(image, old, self.steady_layout()),
            _ => ImageTransition::color(image, old, self.steady_layout()),
        }
    }
}

/// Everything that decides the shape of the target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetKey {
    pub internal: Extent2D,
    pub target: Extent2D,
    pub present: Extent2D,
    pub checkerboard: bool,
}

impl TargetKey {
    pub fn from_extents(extents: &ActiveExtents) -> Self {
        Self {
            internal: extents.internal,
            target: extents.target,
            present: extents.present,
            checkerboard: extents.technique.is_checkerboard(),
        }
    }
}

/// Color, velocity and depth attachments for one scene pass.
pub struct SceneTargets {
    pub color: Image,
    pub velocity: Image,
    pub depth: Image,
}

/// Color and velocity of one checkerboard field.
pub struct FieldImages {
    pub color: Image,
    pub velocity: Image,
}

/// 2x multisampled field attachments and the full resolution history.
pub struct CheckerboardTargets {
    pub fields: [FieldImages; 2],
    pub depth: Image,
    pub history: [Image; 2],
}

/// Internal resolution attachments, shaped by the technique.
pub enum InternalTargets {
    Single(SceneTargets),
    Checkerboard(CheckerboardTargets),
}

/// The whole target set for one resolution selection.
pub struct RenderTargets {
    key: TargetKey,
    pub internal: InternalTargets,
    /// Upscale output.
    pub target: Image,
    /// Native target resolution render used by the delta view.
    pub reference: SceneTargets,
    pub composite: Image,
    pub present: Image,
}

struct TargetBuilder<'a> {
    memory: &'a MemoryManager,
    created: Vec<(TargetRole, vk::Image)>,
}

impl TargetBuilder<'_> {
    unsafe fn image(
        &mut self,
        role: TargetRole,
        extent: Extent2D,
        samples: vk::SampleCountFlags,
        name: &str,
    ) -> RendererResult<Image> {
        let desc = ImageDesc::new(vk_extent(extent), role.format(), role.usage()).samples(samples);
        self.finish(role, desc, name)
    }

    unsafe fn finish(&mut self, role: TargetRole, desc: ImageDesc, name: &str) -> RendererResult<Image> {
        let image = self.memory.create_image(&desc, name)?;
        self.created.push((role, image.handle));
        Ok(image)
    }

    unsafe fn scene(&mut self, extent: Extent2D, label: &str) -> RendererResult<SceneTargets> {
        let one = vk::SampleCountFlags::TYPE_1;
        Ok(SceneTargets {
            color: self.image(TargetRole::SceneColor, extent, one, &format!("{} color", label))?,
            velocity: self.image(TargetRole::SceneVelocity, extent, one, &format!("{} velocity", label))?,
            depth: self.image(TargetRole::SceneDepth, extent, one, &format!("{} depth", label))?,
        })
    }

    unsafe fn checkerboard(
        &mut self,
        field_extent: Extent2D,
        target_extent: Extent2D,
        mode: SampleMode,
    ) -> RendererResult<CheckerboardTargets> {
        let two = vk::SampleCountFlags::TYPE_2;
        let one = vk::SampleCountFlags::TYPE_1;
        let field = |builder: &mut Self, index: usize| -> RendererResult<FieldImages> {
            Ok(FieldImages {
                color: builder.image(TargetRole::SceneColor, field_extent, two, &format!("field {} color", index))?,
                velocity: builder.image(
                    TargetRole::SceneVelocity,
                    field_extent,
                    two,
                    &format!("field {} velocity", index),
                )?,
            })
        };
        let fields = [field(self, 0)?, field(self, 1)?];

        let role = TargetRole::SceneDepth;
        let mut depth_desc = ImageDesc::new(vk_extent(field_extent), role.format(), role.usage()).samples(two);
        depth_desc.sample_locations_compatible = mode == SampleMode::CustomLocations;
        let depth = self.finish(role, depth_desc, "field depth")?;

        let history = [
            self.image(TargetRole::Storage, target_extent, one, "history 0")?,
            self.image(TargetRole::Storage, target_extent, one, "history 1")?,
        ];

        Ok(CheckerboardTargets { fields, depth, history })
    }
}

impl RenderTargets {
    /// Allocate every image for `extents` and move each into its steady
    /// layout with a one-shot command buffer.
    pub unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        commands: &CommandManager,
        extents: &ActiveExtents,
        mode: SampleMode,
    ) -> RendererResult<Self> {
        let key = TargetKey::from_extents(extents);
        let one = vk::SampleCountFlags::TYPE_1;
        let mut builder = TargetBuilder { memory, created: Vec::new() };

        let internal = if key.checkerboard {
            InternalTargets::Checkerboard(builder.checkerboard(key.internal, key.target, mode)?)
        } else {
            InternalTargets::Single(builder.scene(key.internal, "internal")?)
        };
        let target = builder.image(TargetRole::Storage, key.target, one, "target")?;
        let reference = builder.scene(key.target, "reference")?;
        let composite = builder.image(TargetRole::Storage, key.target, one, "composite")?;
        let present = builder.image(TargetRole::Present, key.present, one, "present")?;

        let transitions: Vec<_> = builder.created
            .iter()
            .map(|(role, image)| role.initial_transition(*image))
            .collect();
        let cmd = commands.begin_single_time()?;
        VkRecorder::new(&ctx.device, cmd).transition_images(&transitions);
        commands.end_single_time(ctx, cmd)?;

        log::debug!(
            "Render targets: internal {} target {} present {}{} ({} images)",
            key.internal,
            key.target,
            key.present,
            if key.checkerboard { " checkerboard" } else { "" },
            transitions.len()
        );

        Ok(Self { key, internal, target, reference, composite, present })
    }

    pub fn key(&self) -> TargetKey {
        self.key
    }

    /// Whether these targets can serve `extents` as they are.
    pub fn matches(&self, extents: &ActiveExtents) -> bool {
        !needs_rebuild(Some(self.key), extents)
    }
}

/// Whether a target set built for `current` must be reallocated for `extents`.
pub fn needs_rebuild(current: Option<TargetKey>, extents: &ActiveExtents) -> bool {
    current != Some(TargetKey::from_extents(extents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use upscale_common::{PresentResolutionKey, ResolutionSelection, UpscaleTechnique};

    fn extents(technique: UpscaleTechnique) -> ActiveExtents {
        ResolutionSelection::new(PresentResolutionKey::P1080p, technique).active_extents()
    }

    #[test]
    fn test_first_frame_needs_targets() {
        assert!(needs_rebuild(None, &extents(UpscaleTechnique::None)));
    }

    #[test]
    fn test_rebuild_on_checkerboard_toggle() {
        let key = TargetKey::from_extents(&extents(UpscaleTechnique::None));
        assert!(!needs_rebuild(Some(key), &extents(UpscaleTechnique::None)));
        assert!(!needs_rebuild(Some(key), &extents(UpscaleTechnique::Cas)));
        assert!(needs_rebuild(Some(key), &extents(UpscaleTechnique::Checkerboard)));
    }

    #[test]
    fn test_rebuild_on_internal_change() {
        let mut selection = ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::Cas);
        let key = TargetKey::from_extents(&selection.active_extents());

        selection.select_internal_index(1).unwrap();
        selection.update_target_resolution();
        selection.update_internal_resolution();
        assert!(needs_rebuild(Some(key), &selection.active_extents()));
    }

    #[test]
    fn test_checkerboard_key_uses_half_extent() {
        let key = TargetKey::from_extents(&extents(UpscaleTechnique::Checkerboard));
        assert!(key.checkerboard);
        assert_eq!(key.internal, key.target.halved());
    }

    #[test]
    fn test_steady_layouts() {
        use vk::ImageLayout as L;
        assert_eq!(TargetRole::SceneColor.steady_layout(), L::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(TargetRole::SceneVelocity.steady_layout(), L::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(TargetRole::SceneDepth.steady_layout(), L::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(TargetRole::Storage.steady_layout(), L::GENERAL);
        assert_eq!(TargetRole::Present.steady_layout(), L::GENERAL);
    }

    #[test]
    fn test_initial_transition_aspect() {
        let depth = TargetRole::SceneDepth.initial_transition(vk::Image::null());
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.old_layout, vk::ImageLayout::UNDEFINED);
        let present = TargetRole::Present.initial_transition(vk::Image::null());
        assert_eq!(present.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(present.new_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_present_usage_allows_blit_source() {
        assert!(TargetRole::Present.usage().contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(TargetRole::Storage.usage().contains(vk::ImageUsageFlags::STORAGE));
        assert!(!TargetRole::SceneColor.usage().contains(vk::ImageUsageFlags::STORAGE));
    }
}
