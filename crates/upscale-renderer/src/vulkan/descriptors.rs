//! Descriptor pools, samplers and descriptor set writes.

use ash::vk;

use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

/// Kinds of binding used by the demo's programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Combined image sampler read in the shader.
    SampledImage,
    /// Storage image written (or read/written) in the shader.
    StorageImage,
    /// Uniform buffer bound with a per-dispatch dynamic offset.
    DynamicUniform,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindingKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::DynamicUniform => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        }
    }
}

/// Layout bindings for `kinds`, numbered in order from zero.
pub fn layout_bindings(
    kinds: &[BindingKind],
    stages: vk::ShaderStageFlags,
) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    kinds.iter()
        .enumerate()
        .map(|(binding, kind)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding as u32)
                .descriptor_type(kind.descriptor_type())
                .descriptor_count(1)
                .stage_flags(stages)
        })
        .collect()
}

/// Number of dynamic offsets a set with these bindings expects.
pub fn dynamic_offset_count(kinds: &[BindingKind]) -> usize {
    kinds.iter().filter(|k| **k == BindingKind::DynamicUniform).count()
}

/// One resource written into a descriptor set.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorEntry {
    Sampled {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    Storage {
        view: vk::ImageView,
    },
    DynamicUniform {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
}

/// Write `entries` into bindings `0..entries.len()` of `set`.
pub unsafe fn update_set(device: &ash::Device, set: vk::DescriptorSet, entries: &[DescriptorEntry]) {
    if entries.is_empty() {
        return;
    }

    // Infos must outlive the writes that point at them.
    let image_infos: Vec<vk::DescriptorImageInfo> = entries.iter()
        .map(|entry| match *entry {
            DescriptorEntry::Sampled { view, sampler, layout } => vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            },
            DescriptorEntry::Storage { view } => vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::GENERAL,
            },
            DescriptorEntry::DynamicUniform { .. } => vk::DescriptorImageInfo::default(),
        })
        .collect();

    let buffer_infos: Vec<vk::DescriptorBufferInfo> = entries.iter()
        .map(|entry| match *entry {
            DescriptorEntry::DynamicUniform { buffer, range } => vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            },
            _ => vk::DescriptorBufferInfo::default(),
        })
        .collect();

    let writes: Vec<vk::WriteDescriptorSet> = entries.iter()
        .enumerate()
        .map(|(i, entry)| {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(i as u32)
                .dst_array_element(0);
            match entry {
                DescriptorEntry::Sampled { .. } => write
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_infos[i])),
                DescriptorEntry::Storage { .. } => write
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(&image_infos[i])),
                DescriptorEntry::DynamicUniform { .. } => write
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .buffer_info(std::slice::from_ref(&buffer_infos[i])),
            }
        })
        .collect();

    device.update_descriptor_sets(&writes, &[]);
}

/// Descriptor pool sized for the demo's per-frame sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: ash::Device,
}

impl DescriptorPool {
    pub unsafe fn new(ctx: &VulkanContext, max_sets: u32) -> RendererResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: max_sets * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: max_sets * 2,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = ctx.device.create_descriptor_pool(&pool_info, None)
            .map_err(RendererError::vk("vkCreateDescriptorPool"))?;

        Ok(Self { pool, device: ctx.device.clone() })
    }

    /// Allocate `count` sets with the same layout.
    pub unsafe fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RendererResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        self.device.allocate_descriptor_sets(&alloc_info)
            .map_err(RendererError::vk("vkAllocateDescriptorSets"))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Owned sampler.
pub struct Sampler {
    pub handle: vk::Sampler,
    device: ash::Device,
}

impl Sampler {
    /// Clamp-to-edge sampler with the given min/mag filter.
    pub unsafe fn clamped(ctx: &VulkanContext, filter: vk::Filter) -> RendererResult<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);

        let handle = ctx.device.create_sampler(&create_info, None)
            .map_err(RendererError::vk("vkCreateSampler"))?;

        Ok(Self { handle, device: ctx.device.clone() })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.handle, None);
        }
    }
}
