//! Per-frame constant streaming.
//!
//! One persistently mapped uniform buffer per frame in flight. Allocations
//! bump a cursor from zero, each rounded up to the device's minimum uniform
//! buffer offset alignment, and the returned offset is bound as a dynamic
//! descriptor offset. The cursor resets when the frame slot comes around
//! again; the caller's frame fence guarantees the GPU is done with it.

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::memory::{Buffer, MemoryManager};
use crate::error::{RendererError, RendererResult};

/// Bump cursor over a fixed-capacity byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicRing {
    capacity: u64,
    alignment: u64,
    cursor: u64,
}

impl DynamicRing {
    /// `alignment` of zero is treated as one.
    pub fn new(capacity: u64, alignment: u64) -> Self {
        Self {
            capacity,
            alignment: alignment.max(1),
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Reserve `size` bytes and return their offset.
    ///
    /// Fails without moving the cursor if the aligned size does not fit.
    pub fn alloc(&mut self, size: u64) -> RendererResult<u64> {
        let aligned = align_up(size, self.alignment);
        let end = self.cursor.checked_add(aligned).filter(|&end| end <= self.capacity);
        match end {
            Some(end) => {
                let offset = self.cursor;
                self.cursor = end;
                Ok(offset)
            }
            None => Err(RendererError::ConstantBufferExhausted {
                requested: aligned,
                cursor: self.cursor,
                capacity: self.capacity,
            }),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }
}

/// Copy `data` into `mapped` at `offset`.
pub fn write_at(mapped: &mut [u8], offset: u64, data: &[u8]) -> RendererResult<()> {
    let start = offset as usize;
    let mapped_len = mapped.len();
    let dst = start
        .checked_add(data.len())
        .and_then(|end| mapped.get_mut(start..end))
        .ok_or_else(|| {
            RendererError::Unsupported(format!(
                "constant write of {} bytes at {} overruns a {} byte mapping",
                data.len(),
                offset,
                mapped_len
            ))
        })?;
    dst.copy_from_slice(data);
    Ok(())
}

/// Round `size` up to a multiple of `alignment`.
pub fn align_up(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment) * alignment
}

/// Ring of per-frame host-visible uniform buffers.
pub struct ConstantStream {
    buffers: Vec<Buffer>,
    rings: Vec<DynamicRing>,
    active: usize,
}

impl ConstantStream {
    /// Create `frame_count` mapped buffers of `bytes_per_frame` each.
    pub unsafe fn new(
        memory: &MemoryManager,
        frame_count: usize,
        bytes_per_frame: u64,
        alignment: u64,
    ) -> RendererResult<Self> {
        let mut buffers = Vec::with_capacity(frame_count);
        let mut rings = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            buffers.push(memory.create_buffer(
                bytes_per_frame,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("constant stream {}", i),
            )?);
            rings.push(DynamicRing::new(bytes_per_frame, alignment));
        }

        log::debug!(
            "Constant stream: {} x {} bytes, alignment {}",
            frame_count,
            bytes_per_frame,
            alignment
        );

        Ok(Self { buffers, rings, active: 0 })
    }

    /// Make `frame_index` the active slot and rewind its cursor.
    pub fn new_frame(&mut self, frame_index: usize) {
        self.active = frame_index;
        self.rings[frame_index].reset();
    }

    /// Reserve space in the active frame's buffer.
    pub fn alloc_dynamic_buffer_space(&mut self, size: u64) -> RendererResult<u64> {
        self.rings[self.active].alloc(size)
    }

    /// Reserve space and copy `data` into it, returning the dynamic offset.
    pub fn upload_to_dynamic_buffer(&mut self, data: &[u8]) -> RendererResult<u32> {
        let offset = self.alloc_dynamic_buffer_space(data.len() as u64)?;
        let mapped = self.buffers[self.active].mapped_slice_mut().ok_or_else(|| {
            RendererError::Unsupported("constant stream buffer is not host mapped".to_string())
        })?;
        write_at(mapped, offset, data)?;
        Ok(offset as u32)
    }

    /// Upload a plain-old-data value.
    pub fn upload<T: bytemuck::Pod>(&mut self, value: &T) -> RendererResult<u32> {
        self.upload_to_dynamic_buffer(bytemuck::bytes_of(value))
    }

    /// Buffer backing `frame_index`, for descriptor writes.
    pub fn buffer(&self, frame_index: usize) -> vk::Buffer {
        self.buffers[frame_index].handle
    }

    pub fn ring(&self, frame_index: usize) -> &DynamicRing {
        &self.rings[frame_index]
    }
}
