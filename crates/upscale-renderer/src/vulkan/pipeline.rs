//! Compute and graphics program records.
//!
//! A [`Program`] owns its pipeline, pipeline layout and the single descriptor
//! set layout every demo shader uses. Compute programs carry the workgroup
//! size declared in their SPIR-V so dispatch sizes follow the shader.

use ash::vk;

use super::descriptors::{dynamic_offset_count, layout_bindings, BindingKind};
use super::VulkanContext;
use crate::error::{RendererError, RendererResult};

// ============================================================================
// SPIR-V bytecode (compiled at build time by glslc)
// ============================================================================

macro_rules! spv {
    ($name:expr) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name))
    };
}

pub mod spirv {
    pub const SCENE_VERT: &[u8] = spv!("scene.vert.spv");
    pub const SCENE_FRAG: &[u8] = spv!("scene.frag.spv");
    pub const SCALED_COPY_COMP: &[u8] = spv!("scaled_copy.comp.spv");
    /// Scaled copy writing the 8-bit present image.
    pub const PRESENT_COPY_COMP: &[u8] = spv!("present_copy.comp.spv");
    pub const CAS_COMP: &[u8] = spv!("cas.comp.spv");
    pub const CB_RESOLVE_COMP: &[u8] = spv!("cb_resolve.comp.spv");
    pub const IMAGE_DELTA_COMP: &[u8] = spv!("image_delta.comp.spv");
}

const SPIRV_MAGIC: u32 = 0x0723_0203;
const SPIRV_HEADER_WORDS: usize = 5;
const OP_EXECUTION_MODE: u32 = 16;
const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

/// Repack SPIR-V bytes into words.
pub fn spirv_words(name: &'static str, bytes: &[u8]) -> RendererResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(RendererError::Shader {
            name,
            reason: format!("length {} is not a multiple of 4", bytes.len()),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words.len() < SPIRV_HEADER_WORDS || words[0] != SPIRV_MAGIC {
        return Err(RendererError::Shader { name, reason: "missing SPIR-V header".to_string() });
    }
    Ok(words)
}

/// Find the `LocalSize` execution mode of a compute module.
pub fn reflect_local_size(name: &'static str, words: &[u32]) -> RendererResult<[u32; 3]> {
    let mut cursor = SPIRV_HEADER_WORDS;
    while cursor < words.len() {
        let word_count = (words[cursor] >> 16) as usize;
        let opcode = words[cursor] & 0xffff;
        if word_count == 0 || cursor + word_count > words.len() {
            return Err(RendererError::Shader {
                name,
                reason: format!("malformed instruction at word {}", cursor),
            });
        }
        // OpExecutionMode %entry LocalSize x y z
        if opcode == OP_EXECUTION_MODE
            && word_count >= 6
            && words[cursor + 2] == EXECUTION_MODE_LOCAL_SIZE
        {
            return Ok([words[cursor + 3], words[cursor + 4], words[cursor + 5]]);
        }
        cursor += word_count;
    }
    Err(RendererError::Shader { name, reason: "no LocalSize execution mode".to_string() })
}

/// What kind of pipeline a program holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Graphics,
    Compute { workgroup: [u32; 3] },
}

/// Fixed-function state for a graphics program.
pub struct GraphicsDesc<'a> {
    pub vertex_spirv: &'static [u8],
    pub fragment_spirv: &'static [u8],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub color_formats: &'a [vk::Format],
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    /// Take sample positions from `vkCmdSetSampleLocationsEXT`.
    pub dynamic_sample_locations: bool,
}

/// A pipeline plus the layouts it was built against.
pub struct Program {
    pub name: &'static str,
    pub kind: ProgramKind,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
    pub bindings: Vec<BindingKind>,
    device: ash::Device,
}

impl Program {
    /// Layouts first; the pipeline is filled in by the caller.
    unsafe fn with_layouts(
        ctx: &VulkanContext,
        name: &'static str,
        kind: ProgramKind,
        bindings: &[BindingKind],
        stages: vk::ShaderStageFlags,
    ) -> RendererResult<Self> {
        let mut program = Self {
            name,
            kind,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            bindings: bindings.to_vec(),
            device: ctx.device.clone(),
        };

        let set_bindings = layout_bindings(bindings, stages);
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&set_bindings);
        program.set_layout = ctx.device.create_descriptor_set_layout(&set_layout_info, None)
            .map_err(RendererError::vk("vkCreateDescriptorSetLayout"))?;

        let set_layouts = [program.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        program.layout = ctx.device.create_pipeline_layout(&layout_info, None)
            .map_err(RendererError::vk("vkCreatePipelineLayout"))?;

        Ok(program)
    }

    /// Build a compute program, reflecting its workgroup size.
    pub unsafe fn compute(
        ctx: &VulkanContext,
        name: &'static str,
        spirv: &'static [u8],
        bindings: &[BindingKind],
    ) -> RendererResult<Self> {
        let words = spirv_words(name, spirv)?;
        let workgroup = reflect_local_size(name, &words)?;

        let mut program = Self::with_layouts(
            ctx,
            name,
            ProgramKind::Compute { workgroup },
            bindings,
            vk::ShaderStageFlags::COMPUTE,
        )?;

        let module = create_shader_module(&ctx.device, &words)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(program.layout);

        let result = ctx.device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);
        ctx.device.destroy_shader_module(module, None);

        program.pipeline = result.map_err(|(_, e)| RendererError::Vulkan {
            what: "vkCreateComputePipelines",
            result: e,
        })?[0];

        log::debug!("Compute program {} workgroup {:?}", name, workgroup);
        Ok(program)
    }

    /// Build a graphics program for dynamic rendering.
    pub unsafe fn graphics(
        ctx: &VulkanContext,
        name: &'static str,
        desc: &GraphicsDesc<'_>,
        bindings: &[BindingKind],
    ) -> RendererResult<Self> {
        let mut program = Self::with_layouts(
            ctx,
            name,
            ProgramKind::Graphics,
            bindings,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;

        let vert_words = spirv_words(name, desc.vertex_spirv)?;
        let frag_words = spirv_words(name, desc.fragment_spirv)?;
        let vert_module = create_shader_module(&ctx.device, &vert_words)?;
        let frag_module = match create_shader_module(&ctx.device, &frag_words) {
            Ok(module) => module,
            Err(e) => {
                ctx.device.destroy_shader_module(vert_module, None);
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        if desc.dynamic_sample_locations {
            dynamic_states.push(vk::DynamicState::SAMPLE_LOCATIONS_EXT);
        }
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let mut sample_locations_state = vk::PipelineSampleLocationsStateCreateInfoEXT::default()
            .sample_locations_enable(true);
        let mut multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(desc.samples != vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .rasterization_samples(desc.samples);
        if desc.dynamic_sample_locations {
            multisampling = multisampling.push_next(&mut sample_locations_state);
        }

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<_> = desc.color_formats.iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(desc.color_formats)
            .depth_attachment_format(desc.depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(program.layout)
            .push_next(&mut rendering_info);

        let result = ctx.device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

        ctx.device.destroy_shader_module(vert_module, None);
        ctx.device.destroy_shader_module(frag_module, None);

        program.pipeline = result.map_err(|(_, e)| RendererError::Vulkan {
            what: "vkCreateGraphicsPipelines",
            result: e,
        })?[0];

        Ok(program)
    }

    /// Declared X/Y workgroup size of a compute program.
    pub fn workgroup_xy(&self) -> Option<[u32; 2]> {
        match self.kind {
            ProgramKind::Compute { workgroup } => Some([workgroup[0], workgroup[1]]),
            ProgramKind::Graphics => None,
        }
    }

    /// Dynamic offsets expected when binding this program's set.
    pub fn dynamic_offset_count(&self) -> usize {
        dynamic_offset_count(&self.bindings)
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

unsafe fn create_shader_module(device: &ash::Device, words: &[u32]) -> RendererResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(words);
    device.create_shader_module(&create_info, None)
        .map_err(RendererError::vk("vkCreateShaderModule"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(instructions: &[&[u32]]) -> Vec<u32> {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0600, 0, 64, 0];
        for inst in instructions {
            words.extend_from_slice(inst);
        }
        words
    }

    fn op(opcode: u32, operands: &[u32]) -> Vec<u32> {
        let mut inst = vec![((operands.len() as u32 + 1) << 16) | opcode];
        inst.extend_from_slice(operands);
        inst
    }

    #[test]
    fn test_reflect_local_size() {
        let capability = op(17, &[1]);
        let entry = op(15, &[5, 4, 0x6e69_616d, 0]);
        let origin = op(OP_EXECUTION_MODE, &[4, 7]);
        let local = op(OP_EXECUTION_MODE, &[4, EXECUTION_MODE_LOCAL_SIZE, 8, 8, 1]);
        let words = module(&[&capability, &entry, &origin, &local]);
        assert_eq!(reflect_local_size("test", &words).unwrap(), [8, 8, 1]);
    }

    #[test]
    fn test_reflect_missing_local_size() {
        let words = module(&[&op(17, &[1])]);
        assert!(matches!(
            reflect_local_size("test", &words),
            Err(RendererError::Shader { .. })
        ));
    }

    #[test]
    fn test_reflect_rejects_truncated_instruction() {
        let mut words = module(&[]);
        words.push((6 << 16) | OP_EXECUTION_MODE);
        assert!(reflect_local_size("test", &words).is_err());
    }

    #[test]
    fn test_spirv_words_checks_header() {
        let bytes: Vec<u8> = module(&[]).iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(spirv_words("test", &bytes).unwrap()[0], SPIRV_MAGIC);
        assert!(spirv_words("test", &bytes[..6]).is_err());
        assert!(spirv_words("test", &[0u8; 20]).is_err());
    }
}
