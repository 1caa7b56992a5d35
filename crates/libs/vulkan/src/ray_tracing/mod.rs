mod acceleration_structure;
mod pipeline;
mod shader_binding_table;

pub use acceleration_structure::*;
pub use pipeline::*;
pub use shader_binding_table::*;

use ash::{
    extensions::{
        ext::DescriptorBuffer as AshDescriptorBuffer,
        khr::{
            AccelerationStructure as AshAccelerationStructure,
            RayTracingPipeline as AshRayTracingPipeline,
        },
    },
    vk, Instance,
};

use crate::device::Device;

pub struct RayTracingContext {
    pub pipeline_properties: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
    pub pipeline_fn: AshRayTracingPipeline,
    pub acceleration_structure_properties: vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
    pub acceleration_structure_fn: AshAccelerationStructure,
    pub descriptor_buffer_properties: vk::PhysicalDeviceDescriptorBufferPropertiesEXT,
    pub descriptor_buffer_fn: AshDescriptorBuffer,
}

impl RayTracingContext {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: &Device,
    ) -> Self {
        let pipeline_properties =
            unsafe { AshRayTracingPipeline::get_properties(instance, physical_device) };
        let pipeline_fn = AshRayTracingPipeline::new(instance, &device.inner);

        let acceleration_structure_properties =
            unsafe { AshAccelerationStructure::get_properties(instance, physical_device) };
        let acceleration_structure_fn = AshAccelerationStructure::new(instance, &device.inner);

        let mut descriptor_buffer_properties =
            vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
        {
            let mut properties =
                vk::PhysicalDeviceProperties2::builder().push_next(&mut descriptor_buffer_properties);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
        }
        let descriptor_buffer_fn = AshDescriptorBuffer::new(instance, &device.inner);

        Self {
            pipeline_properties,
            pipeline_fn,
            acceleration_structure_properties,
            acceleration_structure_fn,
            descriptor_buffer_properties,
            descriptor_buffer_fn,
        }
    }

    /// Size in bytes of one descriptor of the given type in a descriptor buffer.
    pub fn descriptor_size(&self, ty: vk::DescriptorType) -> usize {
        let properties = &self.descriptor_buffer_properties;
        match ty {
            vk::DescriptorType::STORAGE_IMAGE => properties.storage_image_descriptor_size,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => {
                properties.acceleration_structure_descriptor_size
            }
            vk::DescriptorType::UNIFORM_BUFFER => properties.uniform_buffer_descriptor_size,
            vk::DescriptorType::STORAGE_BUFFER => properties.storage_buffer_descriptor_size,
            vk::DescriptorType::SAMPLED_IMAGE => properties.sampled_image_descriptor_size,
            vk::DescriptorType::SAMPLER => properties.sampler_descriptor_size,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => {
                properties.combined_image_sampler_descriptor_size
            }
            _ => unimplemented!("descriptor type {ty:?} is not used by descriptor buffers here"),
        }
    }
}
