use anyhow::{Context as _, Result};
use ash::vk;

use crate::{utils::round_up, Context, MappedBuffer, RayTracingContext, RayTracingPipeline};

/// Byte layout of a shader binding table holding exactly one raygen, one miss
/// and one hit group handle, each region starting on a group base alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBindingTableLayout {
    pub handle_size: u32,
    pub base_alignment: u32,
    pub miss_offset: u32,
    pub hit_offset: u32,
    pub size: u32,
}

impl ShaderBindingTableLayout {
    pub const GROUP_COUNT: u32 = 3;

    pub fn new(handle_size: u32, base_alignment: u32) -> Self {
        let miss_offset = round_up(handle_size, base_alignment);
        let hit_offset = round_up(miss_offset + handle_size, base_alignment);

        Self {
            handle_size,
            base_alignment,
            miss_offset,
            hit_offset,
            size: hit_offset + handle_size,
        }
    }

    pub fn raygen_offset(&self) -> u32 {
        0
    }

    /// Places the raygen, miss and hit handles, stored back to back in
    /// `handles`, at their region offsets. Padding is zeroed.
    pub fn pack(&self, handles: &[u8]) -> Vec<u8> {
        let handle_size = self.handle_size as usize;
        assert_eq!(
            handles.len(),
            Self::GROUP_COUNT as usize * handle_size,
            "Expected {} shader group handles of {handle_size} bytes",
            Self::GROUP_COUNT
        );

        let mut data = vec![0u8; self.size as usize];
        let offsets = [self.raygen_offset(), self.miss_offset, self.hit_offset];
        for (handle, offset) in handles.chunks_exact(handle_size).zip(offsets) {
            let offset = offset as usize;
            data[offset..offset + handle_size].copy_from_slice(handle);
        }

        data
    }

    /// Trace rays regions for a table whose buffer starts at `address`.
    pub fn regions(&self, address: vk::DeviceAddress) -> ShaderBindingTableRegions {
        let region = |offset: u32| {
            vk::StridedDeviceAddressRegionKHR::builder()
                .device_address(address + offset as vk::DeviceAddress)
                .stride(self.handle_size as _)
                .size(self.handle_size as _)
                .build()
        };

        ShaderBindingTableRegions {
            raygen: region(self.raygen_offset()),
            miss: region(self.miss_offset),
            hit: region(self.hit_offset),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderBindingTableRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

pub struct ShaderBindingTable {
    buffer: MappedBuffer,
    layout: ShaderBindingTableLayout,
    regions: ShaderBindingTableRegions,
}

impl ShaderBindingTable {
    pub(crate) fn new(
        context: &Context,
        ray_tracing: &RayTracingContext,
        pipeline: &RayTracingPipeline,
    ) -> Result<Self> {
        let desc = pipeline.shader_group_info;
        assert_eq!(
            (
                desc.raygen_shader_count,
                desc.miss_shader_count,
                desc.hit_shader_count
            ),
            (1, 1, 1),
            "The shader binding table holds exactly one raygen, miss and hit group"
        );

        let properties = &ray_tracing.pipeline_properties;
        let layout = ShaderBindingTableLayout::new(
            properties.shader_group_handle_size,
            properties.shader_group_base_alignment,
        );
        log::debug!("Shader binding table layout {layout:?}");

        // Get Handles
        let handles = unsafe {
            ray_tracing
                .pipeline_fn
                .get_ray_tracing_shader_group_handles(
                    pipeline.inner,
                    0,
                    ShaderBindingTableLayout::GROUP_COUNT,
                    (ShaderBindingTableLayout::GROUP_COUNT * layout.handle_size) as _,
                )
                .context("Failed to read shader group handles")?
        };
        let data = layout.pack(&handles);

        let mut buffer = context.create_mapped_buffer(
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR,
            layout.size as _,
            Some(layout.base_alignment as _),
            "shader_binding_table",
        )?;
        buffer.copy_data_to_buffer(&data);

        let regions = layout.regions(buffer.device_address());
        log::info!(
            "Created shader binding table: {} bytes at {:#x}",
            layout.size,
            buffer.device_address()
        );

        Ok(Self {
            buffer,
            layout,
            regions,
        })
    }

    pub fn layout(&self) -> &ShaderBindingTableLayout {
        &self.layout
    }

    pub fn regions(&self) -> &ShaderBindingTableRegions {
        &self.regions
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.buffer.device_address()
    }
}

impl Context {
    pub fn create_shader_binding_table(
        &self,
        pipeline: &RayTracingPipeline,
    ) -> Result<ShaderBindingTable> {
        ShaderBindingTable::new(self, &self.ray_tracing, pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(handle_size: u32) -> Vec<u8> {
        (0..3u8)
            .flat_map(|group| std::iter::repeat(0xA0 + group).take(handle_size as usize))
            .collect()
    }

    #[test]
    fn regions_start_on_base_alignment() {
        let layout = ShaderBindingTableLayout::new(32, 64);

        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.size, 160);
    }

    #[test]
    fn handle_size_equal_to_alignment_packs_tightly() {
        let layout = ShaderBindingTableLayout::new(32, 32);

        assert_eq!(layout.miss_offset, 32);
        assert_eq!(layout.hit_offset, 64);
        assert_eq!(layout.size, 96);
    }

    #[test]
    fn packed_handles_sit_at_region_starts() {
        let layout = ShaderBindingTableLayout::new(32, 64);
        let data = layout.pack(&handles(32));

        assert_eq!(data.len(), 160);
        assert!(data[0..32].iter().all(|b| *b == 0xA0));
        assert!(data[32..64].iter().all(|b| *b == 0));
        assert!(data[64..96].iter().all(|b| *b == 0xA1));
        assert!(data[96..128].iter().all(|b| *b == 0));
        assert!(data[128..160].iter().all(|b| *b == 0xA2));
    }

    #[test]
    fn regions_are_one_handle_long_and_disjoint() {
        let layout = ShaderBindingTableLayout::new(32, 64);
        let regions = layout.regions(0x10_000);
        let all = [regions.raygen, regions.miss, regions.hit];

        for region in all {
            assert_eq!(region.stride, 32);
            assert_eq!(region.size, 32);
        }
        assert_eq!(regions.raygen.device_address, 0x10_000);
        assert_eq!(regions.miss.device_address, 0x10_040);
        assert_eq!(regions.hit.device_address, 0x10_080);

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                let a_range = a.device_address..a.device_address + a.size;
                assert!(!a_range.contains(&b.device_address));
                assert!(!a_range.contains(&(b.device_address + b.size - 1)));
            }
        }
    }

    #[test]
    fn callable_region_is_empty() {
        let regions = ShaderBindingTableLayout::new(32, 64).regions(0x10_000);

        assert_eq!(regions.callable.device_address, 0);
        assert_eq!(regions.callable.stride, 0);
        assert_eq!(regions.callable.size, 0);
    }

    #[test]
    #[should_panic(expected = "shader group handles")]
    fn missing_handles_are_rejected() {
        ShaderBindingTableLayout::new(32, 64).pack(&[0u8; 64]);
    }
}
