use std::mem::size_of;

use vulkan::ash::vk;

/// Device addresses and sizes of an uploaded triangle mesh.
///
/// Indices are `u32`. Each vertex starts with its position as three `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub index_buffer: vk::DeviceAddress,
    pub index_count: u32,
    pub vertex_buffer: vk::DeviceAddress,
    pub vertex_count: u32,
    pub vertex_stride: u32,
}

impl GpuMesh {
    pub const INDEX_SIZE: u32 = size_of::<u32>() as u32;

    pub fn index_range(&self) -> vk::DeviceSize {
        self.index_count as vk::DeviceSize * Self::INDEX_SIZE as vk::DeviceSize
    }

    pub fn vertex_range(&self) -> vk::DeviceSize {
        self.vertex_count as vk::DeviceSize * self.vertex_stride as vk::DeviceSize
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}
