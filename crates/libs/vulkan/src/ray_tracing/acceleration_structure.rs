use std::sync::Arc;

use anyhow::{Context as _, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::{Buffer, CommandBuffer, Context, RayTracingContext};

/// An acceleration structure together with the storage and the scratch
/// memory it is built with.
///
/// Builds are recorded into a caller provided command buffer and always write
/// the same destination, so `address` stays valid across rebuilds.
pub struct AccelerationStructure {
    ray_tracing: Arc<RayTracingContext>,
    pub(crate) inner: vk::AccelerationStructureKHR,
    level: vk::AccelerationStructureTypeKHR,
    _buffer: Buffer,
    scratch_buffer: Buffer,
    pub address: u64,
}

impl AccelerationStructure {
    pub(crate) fn new(
        context: &Context,
        level: vk::AccelerationStructureTypeKHR,
        as_geometry: &[vk::AccelerationStructureGeometryKHR],
        max_primitive_counts: &[u32],
    ) -> Result<Self> {
        let ray_tracing = context.ray_tracing.clone();
        let build_geo_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(level)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .geometries(as_geometry);

        let build_size = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_geo_info,
                    max_primitive_counts,
                )
        };
        log::debug!("{level:?} acceleration structure build sizes {build_size:?}");

        let buffer = context.create_buffer(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            build_size.acceleration_structure_size,
            "acceleration_structure",
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(build_size.acceleration_structure_size)
            .ty(level);
        let inner = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .create_acceleration_structure(&create_info, None)
                .with_context(|| format!("Failed to create {level:?} acceleration structure"))?
        };

        let scratch_alignment = ray_tracing
            .acceleration_structure_properties
            .min_acceleration_structure_scratch_offset_alignment;
        let scratch_buffer = Buffer::new(
            context.device.clone(),
            context.allocator.clone(),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            build_size.build_scratch_size,
            Some(scratch_alignment as _),
            "acceleration_structure_scratch",
        )?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(inner);
        let address = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_device_address(&address_info)
        };

        Ok(Self {
            ray_tracing,
            inner,
            level,
            _buffer: buffer,
            scratch_buffer,
            address,
        })
    }

    /// Records a full build of this structure from `as_geometry`.
    pub fn cmd_build(
        &self,
        cmd_buffer: &CommandBuffer,
        as_geometry: &[vk::AccelerationStructureGeometryKHR],
        as_ranges: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        let build_geo_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(self.level)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .geometries(as_geometry)
            .dst_acceleration_structure(self.inner)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: self.scratch_buffer.get_device_address(),
            });

        cmd_buffer.build_acceleration_structures(&build_geo_info, as_ranges);
    }
}

impl Context {
    pub fn create_bottom_level_acceleration_structure(
        &self,
        as_geometry: &[vk::AccelerationStructureGeometryKHR],
        max_primitive_counts: &[u32],
    ) -> Result<AccelerationStructure> {
        AccelerationStructure::new(
            self,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            as_geometry,
            max_primitive_counts,
        )
    }

    pub fn create_top_level_acceleration_structure(
        &self,
        as_geometry: &[vk::AccelerationStructureGeometryKHR],
        max_primitive_counts: &[u32],
    ) -> Result<AccelerationStructure> {
        AccelerationStructure::new(
            self,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            as_geometry,
            max_primitive_counts,
        )
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}
