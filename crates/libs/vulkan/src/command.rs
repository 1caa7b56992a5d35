use std::sync::Arc;

use ash::vk;

use crate::{
    device::Device, Context, PipelineLayout, RayTracingContext, RayTracingPipeline,
    ShaderBindingTableRegions,
};

/// A command buffer in the recording state, owned by the application.
///
/// Allocation, begin/end and submission stay with the caller; this type only
/// records the commands the scene pass needs.
pub struct CommandBuffer {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::CommandBuffer,
}

impl Context {
    pub fn command_buffer(&self, inner: vk::CommandBuffer) -> CommandBuffer {
        CommandBuffer {
            device: self.device.clone(),
            ray_tracing: self.ray_tracing.clone(),
            inner,
        }
    }
}

impl CommandBuffer {
    pub fn bind_rt_pipeline(&self, pipeline: &RayTracingPipeline) {
        unsafe {
            self.device.inner.cmd_bind_pipeline(
                self.inner,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                pipeline.inner,
            )
        }
    }

    pub fn bind_descriptor_buffers(&self, binding_infos: &[vk::DescriptorBufferBindingInfoEXT]) {
        unsafe {
            self.ray_tracing
                .descriptor_buffer_fn
                .cmd_bind_descriptor_buffers(self.inner, binding_infos)
        }
    }

    pub fn set_descriptor_buffer_offsets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        buffer_indices: &[u32],
        offsets: &[vk::DeviceSize],
    ) {
        assert_eq!(
            buffer_indices.len(),
            offsets.len(),
            "Every descriptor buffer index needs an offset"
        );

        unsafe {
            self.ray_tracing
                .descriptor_buffer_fn
                .cmd_set_descriptor_buffer_offsets(
                    self.inner,
                    bind_point,
                    layout.inner,
                    first_set,
                    buffer_indices,
                    offsets,
                )
        }
    }

    pub fn push_constants(
        &self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.device
                .inner
                .cmd_push_constants(self.inner, layout.inner, stages, offset, bytes)
        }
    }

    pub fn pipeline_memory_barriers(&self, barriers: &[MemoryBarrier]) {
        let barriers = barriers
            .iter()
            .map(|b| {
                vk::MemoryBarrier2::builder()
                    .src_stage_mask(b.src_stage_mask)
                    .src_access_mask(b.src_access_mask)
                    .dst_stage_mask(b.dst_stage_mask)
                    .dst_access_mask(b.dst_access_mask)
                    .build()
            })
            .collect::<Vec<_>>();

        let dependency_info = vk::DependencyInfo::builder().memory_barriers(&barriers);

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    pub fn build_acceleration_structures(
        &self,
        as_build_geo_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
        as_build_range_info: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .cmd_build_acceleration_structures(
                    self.inner,
                    std::slice::from_ref(as_build_geo_info),
                    std::slice::from_ref(&as_build_range_info),
                )
        };
    }

    pub fn trace_rays(
        &self,
        regions: &ShaderBindingTableRegions,
        width: u32,
        height: u32,
        depth: u32,
    ) {
        unsafe {
            self.ray_tracing.pipeline_fn.cmd_trace_rays(
                self.inner,
                &regions.raygen,
                &regions.miss,
                &regions.hit,
                &regions.callable,
                width,
                height,
                depth,
            )
        };
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryBarrier {
    pub src_access_mask: vk::AccessFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
}

impl MemoryBarrier {
    /// Makes an acceleration structure build visible to later builds and to
    /// ray tracing shaders.
    pub const ACCELERATION_STRUCTURE_BUILD: Self = Self {
        src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        dst_access_mask: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw()
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
        ),
        src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        dst_stage_mask: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR.as_raw()
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
        ),
    };
}
