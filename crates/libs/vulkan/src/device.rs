use std::ffi::CStr;

use anyhow::Result;
use ash::{vk, Device as AshDevice, Instance as AshInstance};

/// Device extensions the ray traced scene pass records commands for.
pub const RAYTRACE_SCENE_EXTENSIONS: [&str; 4] = [
    "VK_KHR_acceleration_structure",
    "VK_KHR_ray_tracing_pipeline",
    "VK_KHR_deferred_host_operations",
    "VK_EXT_descriptor_buffer",
];

/// Logical device handed over by the application.
///
/// The application creates and destroys the `ash::Device`; this wrapper only
/// shares its function table between the objects created from it.
pub struct Device {
    pub inner: AshDevice,
}

impl Device {
    pub(crate) fn new(inner: AshDevice) -> Self {
        Self { inner }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    pub ray_tracing_pipeline: bool,
    pub acceleration_structure: bool,
    pub buffer_device_address: bool,
    pub descriptor_buffer: bool,
    pub synchronization2: bool,
}

impl DeviceFeatures {
    pub fn raytrace_scene_requirements() -> Self {
        Self {
            ray_tracing_pipeline: true,
            acceleration_structure: true,
            buffer_device_address: true,
            descriptor_buffer: true,
            synchronization2: true,
        }
    }

    pub fn query(instance: &AshInstance, physical_device: vk::PhysicalDevice) -> Self {
        let mut ray_tracing_feature = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let mut acceleration_struct_feature =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut descriptor_buffer_feature =
            vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut ray_tracing_feature)
            .push_next(&mut acceleration_struct_feature)
            .push_next(&mut descriptor_buffer_feature)
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features) };

        Self {
            ray_tracing_pipeline: ray_tracing_feature.ray_tracing_pipeline == vk::TRUE,
            acceleration_structure: acceleration_struct_feature.acceleration_structure == vk::TRUE,
            buffer_device_address: features12.buffer_device_address == vk::TRUE,
            descriptor_buffer: descriptor_buffer_feature.descriptor_buffer == vk::TRUE,
            synchronization2: features13.synchronization2 == vk::TRUE,
        }
    }

    pub fn is_compatible_with(&self, requirements: &Self) -> bool {
        (!requirements.ray_tracing_pipeline || self.ray_tracing_pipeline)
            && (!requirements.acceleration_structure || self.acceleration_structure)
            && (!requirements.buffer_device_address || self.buffer_device_address)
            && (!requirements.descriptor_buffer || self.descriptor_buffer)
            && (!requirements.synchronization2 || self.synchronization2)
    }
}

pub fn supports_extensions(
    instance: &AshInstance,
    physical_device: vk::PhysicalDevice,
    extensions: &[&str],
) -> Result<bool> {
    let extension_properties =
        unsafe { instance.enumerate_device_extension_properties(physical_device)? };
    let supported_extensions = extension_properties
        .iter()
        .map(|p| {
            let name = unsafe { CStr::from_ptr(p.extension_name.as_ptr()) };
            name.to_string_lossy().into_owned()
        })
        .collect::<Vec<_>>();

    Ok(extensions
        .iter()
        .all(|e| supported_extensions.iter().any(|s| s == e)))
}
