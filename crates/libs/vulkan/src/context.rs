use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::{vk, Device as AshDevice, Instance as AshInstance};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};

use crate::{device::Device, RayTracingContext};

/// Shared state for every object the scene pass creates: the device, the
/// allocator and the ray tracing extension tables.
///
/// Instance, physical device and logical device are created by the
/// application, which must keep them alive until the context is dropped.
pub struct Context {
    pub allocator: Arc<Mutex<Allocator>>,
    pub ray_tracing: Arc<RayTracingContext>,
    pub device: Arc<Device>,
    pub physical_device: vk::PhysicalDevice,
}

impl Context {
    pub fn new(
        instance: &AshInstance,
        physical_device: vk::PhysicalDevice,
        device: AshDevice,
    ) -> Result<Self> {
        let device = Arc::new(Device::new(device));

        let ray_tracing = Arc::new(RayTracingContext::new(instance, physical_device, &device));
        log::debug!(
            "Ray tracing pipeline properties {:#?}",
            ray_tracing.pipeline_properties
        );
        log::debug!(
            "Acceleration structure properties {:#?}",
            ray_tracing.acceleration_structure_properties
        );
        log::debug!(
            "Descriptor buffer properties {:#?}",
            ray_tracing.descriptor_buffer_properties
        );

        // Gpu allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.inner.clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_allocations: true,
                log_frees: true,
                ..Default::default()
            },
            buffer_device_address: true,
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            ray_tracing,
            device,
            physical_device,
        })
    }

    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.device_wait_idle()? };

        Ok(())
    }
}
