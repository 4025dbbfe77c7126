//! Procedural test scene.
//!
//! A checkered ground plane with a rotating ring of colored cubes. The
//! scene pass writes color plus a screen-space velocity computed from the
//! current and previous model-view-projection matrices, which the
//! checkerboard resolve uses to reproject its history.

use ash::vk;
use upscale_common::Extent2D;

use crate::error::{RendererError, RendererResult};
use crate::targets::{COLOR_FORMAT, DEPTH_FORMAT, VELOCITY_FORMAT};
use crate::upscale::checkerboard::{FieldSetup, SampleMode};
use crate::vulkan::descriptors::{update_set, BindingKind, DescriptorEntry, DescriptorPool};
use crate::vulkan::pipeline::{spirv, GraphicsDesc};
use crate::vulkan::recorder::{CommandRecorder, ImageTransition};
use crate::vulkan::{Buffer, CommandManager, ConstantStream, Image, MemoryManager, Program, VkRecorder, VulkanContext};

pub type Mat4 = [[f32; 4]; 4];

const CUBE_COUNT: usize = 8;
const RING_RADIUS: f32 = 4.0;
const PLANE_TILES: usize = 16;
const PLANE_HALF_EXTENT: f32 = 8.0;
/// Ring rotation speed in radians per second.
const RING_SPEED: f32 = 0.5;
const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
const NEAR: f32 = 0.1;
const FAR: f32 = 100.0;
const EYE: [f32; 3] = [0.0, 5.0, 11.0];
const LOOK_AT: [f32; 3] = [0.0, 0.5, 0.0];

const SCENE_BINDINGS: [BindingKind; 1] = [BindingKind::DynamicUniform];

/// Interleaved vertex as read by `scene.vert`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// Per-draw constants streamed with a dynamic offset.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawConstants {
    pub mvp: Mat4,
    pub prev_mvp: Mat4,
    pub model: Mat4,
}

/// A slice of the index buffer drawn with one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    pub first_index: u32,
    pub index_count: u32,
    /// Spins with the ring; the plane stays put.
    pub animated: bool,
}

#[derive(Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub draws: Vec<DrawRange>,
}

impl MeshData {
    /// Append a quad centered at `center` spanning `±u ± v`, facing `u × v`.
    fn quad(&mut self, center: [f32; 3], u: [f32; 3], v: [f32; 3], color: [f32; 3]) {
        let normal = normalize(cross(u, v));
        let base = self.vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                center[0] + su * u[0] + sv * v[0],
                center[1] + su * u[1] + sv * v[1],
                center[2] + su * u[2] + sv * v[2],
            ];
            self.vertices.push(Vertex { position, normal, color });
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn cube(&mut self, center: [f32; 3], half: f32, color: [f32; 3]) {
        let x = [half, 0.0, 0.0];
        let y = [0.0, half, 0.0];
        let z = [0.0, 0.0, half];
        let offset = |d: [f32; 3], s: f32| [center[0] + d[0] * s, center[1] + d[1] * s, center[2] + d[2] * s];
        self.quad(offset(x, 1.0), y, z, color);
        self.quad(offset(x, -1.0), z, y, color);
        self.quad(offset(y, 1.0), z, x, color);
        self.quad(offset(y, -1.0), x, z, color);
        self.quad(offset(z, 1.0), x, y, color);
        self.quad(offset(z, -1.0), y, x, color);
    }

    fn begin_draw(&self) -> u32 {
        self.indices.len() as u32
    }

    fn end_draw(&mut self, first_index: u32, animated: bool) {
        self.draws.push(DrawRange {
            first_index,
            index_count: self.indices.len() as u32 - first_index,
            animated,
        });
    }
}

/// Build the plane and the cube ring.
pub fn build_scene_mesh() -> MeshData {
    let mut mesh = MeshData::default();

    let first = mesh.begin_draw();
    let tile = 2.0 * PLANE_HALF_EXTENT / PLANE_TILES as f32;
    let half = tile * 0.5;
    for row in 0..PLANE_TILES {
        for col in 0..PLANE_TILES {
            let shade = if (row + col) % 2 == 0 { 0.8 } else { 0.2 };
            let center = [
                -PLANE_HALF_EXTENT + (col as f32 + 0.5) * tile,
                0.0,
                -PLANE_HALF_EXTENT + (row as f32 + 0.5) * tile,
            ];
            mesh.quad(center, [0.0, 0.0, half], [half, 0.0, 0.0], [shade; 3]);
        }
    }
    mesh.end_draw(first, false);

    let first = mesh.begin_draw();
    for i in 0..CUBE_COUNT {
        let angle = i as f32 / CUBE_COUNT as f32 * std::f32::consts::TAU;
        let center = [RING_RADIUS * angle.cos(), 0.75, RING_RADIUS * angle.sin()];
        mesh.cube(center, 0.5, hue(i as f32 / CUBE_COUNT as f32));
    }
    mesh.end_draw(first, true);

    mesh
}

/// Fully saturated color for `h` in `0..1`.
fn hue(h: f32) -> [f32; 3] {
    let channel = |offset: f32| {
        let k = (h * 6.0 + offset) % 6.0;
        1.0 - (k.min(4.0 - k).clamp(0.0, 1.0))
    };
    [channel(5.0), channel(3.0), channel(1.0)]
}

/// Ring rotation over time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneAnimation {
    angle: f32,
    prev_angle: f32,
}

impl SceneAnimation {
    pub fn advance(&mut self, dt_seconds: f32) {
        self.prev_angle = self.angle;
        self.angle = (self.angle + dt_seconds * RING_SPEED) % std::f32::consts::TAU;
    }

    /// Constants for each draw of `mesh`, for a viewport of `aspect`.
    pub fn draw_constants(&self, draws: &[DrawRange], aspect: f32) -> Vec<DrawConstants> {
        let view_proj = mat4_mul(&perspective(FOV_Y, aspect, NEAR, FAR), &look_at(EYE, LOOK_AT, [0.0, 1.0, 0.0]));
        draws.iter()
            .map(|draw| {
                let (model, prev_model) = if draw.animated {
                    (rotation_y(self.angle), rotation_y(self.prev_angle))
                } else {
                    (identity(), identity())
                };
                DrawConstants {
                    mvp: mat4_mul(&view_proj, &model),
                    prev_mvp: mat4_mul(&view_proj, &prev_model),
                    model,
                }
            })
            .collect()
    }
}

// Column-major 4x4 helpers, m[col][row].

pub fn identity() -> Mat4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// `a * b`.
pub fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut result = [[0.0f32; 4]; 4];
    for col in 0..4 {
        for row in 0..4 {
            result[col][row] = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    result
}

pub fn transform_point(m: &Mat4, p: [f32; 3]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = m[0][row] * p[0] + m[1][row] * p[1] + m[2][row] * p[2] + m[3][row];
    }
    out
}

pub fn rotation_y(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    [
        [c, 0.0, -s, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [s, 0.0, c, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Right-handed perspective with 0..1 depth and Vulkan's downward Y.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y / 2.0).tan();
    let nf = 1.0 / (near - far);
    [
        [f / aspect, 0.0, 0.0, 0.0],
        [0.0, -f, 0.0, 0.0],
        [0.0, 0.0, far * nf, -1.0],
        [0.0, 0.0, far * near * nf, 0.0],
    ]
}

pub fn look_at(eye: [f32; 3], target: [f32; 3], up: [f32; 3]) -> Mat4 {
    let f = normalize(sub(target, eye));
    let r = normalize(cross(f, up));
    let u = cross(r, f);
    [
        [r[0], u[0], -f[0], 0.0],
        [r[1], u[1], -f[1], 0.0],
        [r[2], u[2], -f[2], 0.0],
        [-dot(r, eye), -dot(u, eye), dot(f, eye), 1.0],
    ]
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len > 1e-6 { [v[0] / len, v[1] / len, v[2] / len] } else { [0.0; 3] }
}

pub fn full_viewport(extent: Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Attachments and raster setup for one scene pass.
pub struct ScenePass<'a> {
    pub color: &'a Image,
    pub velocity: &'a Image,
    pub depth: &'a Image,
    pub extent: Extent2D,
    /// Present for checkerboard fields.
    pub field: Option<FieldSetup>,
}

impl ScenePass<'_> {
    /// Dependency on the previous frame's use of the attachments.
    pub fn attachment_barriers(&self) -> [ImageTransition; 3] {
        use vk::ImageLayout as L;
        [
            ImageTransition::color(self.color.handle, L::COLOR_ATTACHMENT_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
            ImageTransition::color(self.velocity.handle, L::COLOR_ATTACHMENT_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
            ImageTransition::depth(self.depth.handle, L::DEPTH_ATTACHMENT_OPTIMAL, L::DEPTH_ATTACHMENT_OPTIMAL),
        ]
    }
}

/// Scene descriptor sets, one per frame slot and program.
///
/// Every set is written once when created. Both scene passes of a frame
/// bind the same set and differ only in their dynamic offsets, so a set
/// is never rewritten while a recording command buffer references it.
pub struct SceneSets {
    single: Vec<vk::DescriptorSet>,
    field: Vec<vk::DescriptorSet>,
}

impl SceneSets {
    /// Take ownership of the allocated sets, handing each one to `write`
    /// together with its frame slot.
    pub fn new(
        single: Vec<vk::DescriptorSet>,
        field: Vec<vk::DescriptorSet>,
        mut write: impl FnMut(vk::DescriptorSet, usize),
    ) -> Self {
        for sets in [&single, &field] {
            for (slot, set) in sets.iter().enumerate() {
                write(*set, slot);
            }
        }
        Self { single, field }
    }

    pub fn get(&self, frame_index: usize, field: bool) -> vk::DescriptorSet {
        if field {
            self.field[frame_index]
        } else {
            self.single[frame_index]
        }
    }
}

/// Bind the draw constants of each range and draw it.
pub fn record_draws(
    rec: &mut impl CommandRecorder,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
    draws: &[DrawRange],
    offsets: &[u32],
) {
    for (draw, offset) in draws.iter().zip(offsets) {
        rec.bind_graphics_set(layout, set, &[*offset]);
        rec.draw_indexed(draw.index_count, draw.first_index);
    }
}

/// Scene geometry and the programs that draw it.
pub struct SceneRenderer {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    draws: Vec<DrawRange>,
    single: Program,
    field: Program,
    sets: SceneSets,
    pub animation: SceneAnimation,
}

impl SceneRenderer {
    /// Upload the mesh and build single-sample and 2x field programs.
    pub unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        commands: &CommandManager,
        pool: &DescriptorPool,
        constants: &ConstantStream,
        frame_count: usize,
        mode: SampleMode,
    ) -> RendererResult<Self> {
        let mesh = build_scene_mesh();
        let vertex_buffer = upload(ctx, memory, commands, &mesh.vertices, "scene vertices", true)?;
        let index_buffer = upload(ctx, memory, commands, &mesh.indices, "scene indices", false)?;

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute = |location: u32, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset as u32,
        };
        let vertex_attributes = [
            attribute(0, std::mem::offset_of!(Vertex, position)),
            attribute(1, std::mem::offset_of!(Vertex, normal)),
            attribute(2, std::mem::offset_of!(Vertex, color)),
        ];
        let color_formats = [COLOR_FORMAT, VELOCITY_FORMAT];

        let mut desc = GraphicsDesc {
            vertex_spirv: spirv::SCENE_VERT,
            fragment_spirv: spirv::SCENE_FRAG,
            vertex_bindings: &vertex_bindings,
            vertex_attributes: &vertex_attributes,
            color_formats: &color_formats,
            depth_format: DEPTH_FORMAT,
            samples: vk::SampleCountFlags::TYPE_1,
            dynamic_sample_locations: false,
        };
        let single = Program::graphics(ctx, "scene", &desc, &SCENE_BINDINGS)?;

        desc.samples = vk::SampleCountFlags::TYPE_2;
        desc.dynamic_sample_locations = mode == SampleMode::CustomLocations;
        let field = Program::graphics(ctx, "scene field", &desc, &SCENE_BINDINGS)?;

        let range = std::mem::size_of::<DrawConstants>() as vk::DeviceSize;
        let sets = SceneSets::new(
            pool.allocate(single.set_layout, frame_count)?,
            pool.allocate(field.set_layout, frame_count)?,
            |set, slot| {
                let buffer = constants.buffer(slot);
                update_set(&ctx.device, set, &[DescriptorEntry::DynamicUniform { buffer, range }]);
            },
        );

        log::info!(
            "Scene: {} vertices, {} indices, {} draws",
            mesh.vertices.len(),
            mesh.indices.len(),
            mesh.draws.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            draws: mesh.draws,
            single,
            field,
            sets,
            animation: SceneAnimation::default(),
        })
    }

    /// Stream this frame's draw constants, returning one dynamic offset per draw.
    pub fn upload_constants(&self, constants: &mut ConstantStream, extent: Extent2D) -> RendererResult<Vec<u32>> {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        self.animation
            .draw_constants(&self.draws, aspect)
            .iter()
            .map(|c| constants.upload(c))
            .collect()
    }

    /// Record one scene pass with dynamic rendering.
    pub unsafe fn record(
        &self,
        ctx: &VulkanContext,
        rec: &mut VkRecorder<'_>,
        frame_index: usize,
        offsets: &[u32],
        pass: &ScenePass<'_>,
    ) -> RendererResult<()> {
        let device = rec.device;
        let cmd = rec.cmd;
        let program = if pass.field.is_some() { &self.field } else { &self.single };
        let set = self.sets.get(frame_index, pass.field.is_some());

        rec.transition_images(&pass.attachment_barriers());

        let clear_color = |rgba: [f32; 4]| vk::ClearValue { color: vk::ClearColorValue { float32: rgba } };
        let color_attachments = [
            vk::RenderingAttachmentInfo::default()
                .image_view(pass.color.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_color([0.35, 0.5, 0.7, 1.0])),
            vk::RenderingAttachmentInfo::default()
                .image_view(pass.velocity.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_color([0.0; 4])),
        ];
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(pass.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D { width: pass.extent.width, height: pass.extent.height },
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        device.cmd_begin_rendering(cmd, &rendering_info);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, program.pipeline);

        let viewport = match &pass.field {
            Some(field) => field.viewport(pass.extent),
            None => full_viewport(pass.extent),
        };
        rec.set_viewport_scissor(viewport, render_area);

        if let Some(locations) = pass.field.and_then(|f| f.sample_locations) {
            let loader = ctx.sample_locations_loader.as_ref().ok_or_else(|| {
                RendererError::Unsupported("sample locations requested without VK_EXT_sample_locations".to_string())
            })?;
            let points: Vec<vk::SampleLocationEXT> = locations
                .iter()
                .map(|&(x, y)| vk::SampleLocationEXT { x, y })
                .collect();
            let info = vk::SampleLocationsInfoEXT::default()
                .sample_locations_per_pixel(vk::SampleCountFlags::TYPE_2)
                .sample_location_grid_size(vk::Extent2D { width: 1, height: 1 })
                .sample_locations(&points);
            loader.cmd_set_sample_locations(cmd, &info);
        }

        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, vk::IndexType::UINT32);

        record_draws(rec, program.layout, set, &self.draws, offsets);

        device.cmd_end_rendering(cmd);
        Ok(())
    }
}

/// Copy `data` into a new device-local buffer through a staging buffer.
unsafe fn upload<T: bytemuck::Pod>(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    commands: &CommandManager,
    data: &[T],
    name: &str,
    vertex: bool,
) -> RendererResult<Buffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    let mut staging = memory.create_staging_buffer(size, &format!("{} staging", name))?;
    staging.write(data)?;

    let buffer = if vertex {
        memory.create_vertex_buffer(size, name)?
    } else {
        memory.create_index_buffer(size, name)?
    };

    let cmd = commands.begin_single_time()?;
    VkRecorder::new(&ctx.device, cmd).copy_buffer(staging.handle, buffer.handle, size);
    commands.end_single_time(ctx, cmd)?;
    Ok(buffer)
}
