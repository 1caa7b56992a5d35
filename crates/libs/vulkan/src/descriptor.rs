use std::{ops::Range, sync::Arc};

use anyhow::{Context as _, Result};
use ash::vk;

use crate::{device::Device, Context, MappedBuffer, RayTracingContext};

/// Descriptor set layout meant to be bound through a descriptor buffer.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub(crate) inner: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: Arc<RayTracingContext>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<Self> {
        let dsl_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .bindings(bindings);
        let inner = unsafe { device.inner.create_descriptor_set_layout(&dsl_info, None)? };

        Ok(Self {
            device,
            ray_tracing,
            inner,
            bindings: bindings.to_vec(),
        })
    }

    pub fn descriptor_type(&self, binding: u32) -> Option<vk::DescriptorType> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.descriptor_type)
    }
}

impl Context {
    pub fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(self.device.clone(), self.ray_tracing.clone(), bindings)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .inner
                .destroy_descriptor_set_layout(self.inner, None);
        }
    }
}

/// A resource to encode into a descriptor buffer slot.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    AccelerationStructure {
        address: vk::DeviceAddress,
    },
    UniformBuffer {
        address: vk::DeviceAddress,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        address: vk::DeviceAddress,
        range: vk::DeviceSize,
    },
    SampledImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    Sampler {
        sampler: vk::Sampler,
    },
}

impl DescriptorResource {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        use DescriptorResource::*;

        match self {
            StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            AccelerationStructure { .. } => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            SampledImage { .. } => vk::DescriptorType::SAMPLED_IMAGE,
            Sampler { .. } => vk::DescriptorType::SAMPLER,
        }
    }
}

/// Device side knowledge needed to place descriptors in a descriptor buffer.
///
/// Offsets, sizes and the encoded bytes are all implementation defined, so
/// they are always asked for and never computed on the host.
pub trait DescriptorEncoder {
    /// Total size in bytes of the layout.
    fn layout_size(&self) -> vk::DeviceSize;

    /// Byte offset of `binding` from the start of the layout.
    fn binding_offset(&self, binding: u32) -> vk::DeviceSize;

    fn descriptor_size(&self, ty: vk::DescriptorType) -> usize;

    /// Writes the opaque descriptor for `resource` into `dst`, which is
    /// exactly `descriptor_size` bytes long.
    fn encode(&self, resource: &DescriptorResource, dst: &mut [u8]);
}

impl DescriptorEncoder for DescriptorSetLayout {
    fn layout_size(&self) -> vk::DeviceSize {
        unsafe {
            self.ray_tracing
                .descriptor_buffer_fn
                .get_descriptor_set_layout_size(self.inner)
        }
    }

    fn binding_offset(&self, binding: u32) -> vk::DeviceSize {
        unsafe {
            self.ray_tracing
                .descriptor_buffer_fn
                .get_descriptor_set_layout_binding_offset(self.inner, binding)
        }
    }

    fn descriptor_size(&self, ty: vk::DescriptorType) -> usize {
        self.ray_tracing.descriptor_size(ty)
    }

    fn encode(&self, resource: &DescriptorResource, dst: &mut [u8]) {
        use DescriptorResource::*;

        // The info structs must outlive the get_descriptor call below.
        let image_info;
        let address_info;
        let sampler;

        let data = match *resource {
            StorageImage { view, layout } => {
                image_info = vk::DescriptorImageInfo::builder()
                    .image_view(view)
                    .image_layout(layout)
                    .build();
                vk::DescriptorDataEXT {
                    p_storage_image: &image_info,
                }
            }
            SampledImage { view, layout } => {
                image_info = vk::DescriptorImageInfo::builder()
                    .image_view(view)
                    .image_layout(layout)
                    .build();
                vk::DescriptorDataEXT {
                    p_sampled_image: &image_info,
                }
            }
            AccelerationStructure { address } => vk::DescriptorDataEXT {
                acceleration_structure: address,
            },
            UniformBuffer { address, range } => {
                address_info = vk::DescriptorAddressInfoEXT::builder()
                    .address(address)
                    .range(range)
                    .build();
                vk::DescriptorDataEXT {
                    p_uniform_buffer: &address_info,
                }
            }
            StorageBuffer { address, range } => {
                address_info = vk::DescriptorAddressInfoEXT::builder()
                    .address(address)
                    .range(range)
                    .build();
                vk::DescriptorDataEXT {
                    p_storage_buffer: &address_info,
                }
            }
            Sampler { sampler: handle } => {
                sampler = handle;
                vk::DescriptorDataEXT {
                    p_sampler: &sampler,
                }
            }
        };

        let get_info = vk::DescriptorGetInfoEXT::builder()
            .ty(resource.descriptor_type())
            .data(data);

        unsafe {
            self.ray_tracing
                .descriptor_buffer_fn
                .get_descriptor(&get_info, dst)
        };
    }
}

/// Encodes `resource` into the bytes of `binding` inside a mapped descriptor
/// buffer and returns the byte range that was written.
///
/// Nothing outside the returned range is touched.
pub fn write_descriptor<E: DescriptorEncoder + ?Sized>(
    encoder: &E,
    buffer: &mut [u8],
    binding: u32,
    resource: &DescriptorResource,
) -> Range<usize> {
    let offset = encoder.binding_offset(binding) as usize;
    let size = encoder.descriptor_size(resource.descriptor_type());
    let range = offset..offset + size;
    assert!(
        range.end <= buffer.len(),
        "Descriptor for binding {binding} ({range:?}) overruns a {} byte descriptor buffer",
        buffer.len()
    );

    encoder.encode(resource, &mut buffer[range.clone()]);
    log::trace!("Wrote {:?} descriptor for binding {binding} at {range:?}", resource.descriptor_type());

    range
}

/// Host mapped buffer holding the descriptors of one set layout.
pub struct DescriptorBuffer {
    buffer: MappedBuffer,
    usage: vk::BufferUsageFlags,
}

impl DescriptorBuffer {
    pub(crate) fn new(context: &Context, layout: &DescriptorSetLayout, name: &str) -> Result<Self> {
        let properties = &context.ray_tracing.descriptor_buffer_properties;
        let alignment = properties.descriptor_buffer_offset_alignment;
        let size = layout.layout_size();
        let usage = vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT
            | vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT;

        let buffer = context
            .create_mapped_buffer(usage, size, Some(alignment), name)
            .with_context(|| format!("Failed to allocate descriptor buffer {name}"))?;
        assert_eq!(
            buffer.device_address() % alignment,
            0,
            "Descriptor buffer {name} at {:#x} breaks the device's {alignment} byte offset alignment",
            buffer.device_address()
        );
        log::info!(
            "Created descriptor buffer {name}: {size} bytes at {:#x}",
            buffer.device_address()
        );

        Ok(Self { buffer, usage })
    }

    pub fn write<E: DescriptorEncoder + ?Sized>(
        &mut self,
        encoder: &E,
        binding: u32,
        resource: &DescriptorResource,
    ) -> Range<usize> {
        write_descriptor(encoder, self.buffer.bytes_mut(), binding, resource)
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.buffer.device_address()
    }

    pub fn binding_info(&self) -> vk::DescriptorBufferBindingInfoEXT {
        vk::DescriptorBufferBindingInfoEXT::builder()
            .address(self.buffer.device_address())
            .usage(self.usage)
            .build()
    }
}

impl Context {
    pub fn create_descriptor_buffer(
        &self,
        layout: &DescriptorSetLayout,
        name: &str,
    ) -> Result<DescriptorBuffer> {
        DescriptorBuffer::new(self, layout, name)
    }
}
