use std::{
    mem::{align_of, size_of_val},
    ptr::NonNull,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{anyhow, Result};
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::{device::Device, Context};

pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        min_alignment: Option<vk::DeviceSize>,
        name: &str,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };
        let mut requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        if let Some(alignment) = min_alignment {
            requirements.alignment = requirements.alignment.max(alignment);
        }

        let allocation = allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.inner.destroy_buffer(inner, None) };
                return Err(err.into());
            }
        };

        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())?
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
        })
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        let addr_info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe { self.device.inner.get_buffer_device_address(&addr_info) }
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(NonNull::cast)
    }
}

impl Context {
    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            size,
            None,
            name,
        )
    }

    /// Creates a persistently mapped, device addressable buffer whose
    /// allocation is aligned to at least `min_alignment` bytes.
    pub fn create_mapped_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        min_alignment: Option<vk::DeviceSize>,
        name: &str,
    ) -> Result<MappedBuffer> {
        let buffer = Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            size,
            min_alignment,
            name,
        )?;

        MappedBuffer::new(buffer, name)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(err) = freed {
                log::error!("Failed to free buffer allocation: {err}");
            }
        }
    }
}

/// A host visible buffer seen from both sides: the CPU writes through the
/// persistent mapping, the GPU reads through the device address.
///
/// Both views come from the one allocation this value owns, so neither can
/// outlive it. Host writes require `&mut self`.
pub struct MappedBuffer {
    inner: Buffer,
    mapped_ptr: NonNull<u8>,
    device_address: vk::DeviceAddress,
}

impl MappedBuffer {
    fn new(inner: Buffer, name: &str) -> Result<Self> {
        let mapped_ptr = inner
            .mapped_ptr()
            .ok_or_else(|| anyhow!("Buffer {name} was allocated without a host mapping"))?;
        let device_address = inner.get_device_address();

        Ok(Self {
            inner,
            mapped_ptr,
            device_address,
        })
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.inner.size
    }

    pub fn buffer(&self) -> &Buffer {
        &self.inner
    }

    pub fn bytes(&self) -> &[u8] {
        // The mapping stays valid as long as `inner` owns the allocation.
        unsafe { std::slice::from_raw_parts(self.mapped_ptr.as_ptr(), self.inner.size as usize) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.mapped_ptr.as_ptr(), self.inner.size as usize)
        }
    }

    pub fn copy_data_to_buffer<T: Copy>(&mut self, data: &[T]) {
        assert!(
            size_of_val(data) as vk::DeviceSize <= self.inner.size,
            "{} bytes do not fit in a buffer of {} bytes",
            size_of_val(data),
            self.inner.size
        );

        unsafe {
            let mut align = ash::util::Align::new(
                self.mapped_ptr.as_ptr().cast(),
                align_of::<T>() as _,
                size_of_val(data) as _,
            );
            align.copy_from_slice(data);
        }
    }
}
