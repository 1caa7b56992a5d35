use std::mem::size_of;

use vulkan::ash::vk;
use vulkan::DescriptorResource;

use crate::{GpuMesh, Matrix3x4};

/// The seven slots of the scene's only descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Binding {
    OutputImage = 0,
    AccelerationStructure = 1,
    Uniforms = 2,
    Indices = 3,
    Vertices = 4,
    Texture = 5,
    Sampler = 6,
}

impl Binding {
    pub const ALL: [Binding; 7] = [
        Binding::OutputImage,
        Binding::AccelerationStructure,
        Binding::Uniforms,
        Binding::Indices,
        Binding::Vertices,
        Binding::Texture,
        Binding::Sampler,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Binding::OutputImage => vk::DescriptorType::STORAGE_IMAGE,
            Binding::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            Binding::Uniforms => vk::DescriptorType::UNIFORM_BUFFER,
            Binding::Indices | Binding::Vertices => vk::DescriptorType::STORAGE_BUFFER,
            Binding::Texture => vk::DescriptorType::SAMPLED_IMAGE,
            Binding::Sampler => vk::DescriptorType::SAMPLER,
        }
    }

    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Binding::OutputImage | Binding::AccelerationStructure => {
                vk::ShaderStageFlags::RAYGEN_KHR
            }
            Binding::Uniforms => {
                vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            }
            Binding::Indices | Binding::Vertices | Binding::Texture | Binding::Sampler => {
                vk::ShaderStageFlags::CLOSEST_HIT_KHR
            }
        }
    }

    pub fn layout_binding(self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.index())
            .descriptor_type(self.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stage_flags())
            .build()
    }
}

pub fn layout_bindings() -> [vk::DescriptorSetLayoutBinding; 7] {
    Binding::ALL.map(Binding::layout_binding)
}

/// Bytes of the uniform buffer: the camera to world transform.
pub const UNIFORM_RANGE: vk::DeviceSize = size_of::<Matrix3x4>() as vk::DeviceSize;

pub fn output_image_descriptor(view: vk::ImageView) -> DescriptorResource {
    DescriptorResource::StorageImage {
        view,
        layout: vk::ImageLayout::GENERAL,
    }
}

/// Addresses and handles every slot except the output image points at.
#[derive(Debug, Clone, Copy)]
pub struct SceneResources {
    pub top_level_address: vk::DeviceAddress,
    pub uniform_address: vk::DeviceAddress,
    pub mesh: GpuMesh,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl SceneResources {
    /// Descriptors written once at creation, slots 1 to 6.
    pub fn descriptors(&self) -> [(Binding, DescriptorResource); 6] {
        [
            (
                Binding::AccelerationStructure,
                DescriptorResource::AccelerationStructure {
                    address: self.top_level_address,
                },
            ),
            (
                Binding::Uniforms,
                DescriptorResource::UniformBuffer {
                    address: self.uniform_address,
                    range: UNIFORM_RANGE,
                },
            ),
            (
                Binding::Indices,
                DescriptorResource::StorageBuffer {
                    address: self.mesh.index_buffer,
                    range: self.mesh.index_range(),
                },
            ),
            (
                Binding::Vertices,
                DescriptorResource::StorageBuffer {
                    address: self.mesh.vertex_buffer,
                    range: self.mesh.vertex_range(),
                },
            ),
            (
                Binding::Texture,
                DescriptorResource::SampledImage {
                    view: self.texture_view,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            ),
            (
                Binding::Sampler,
                DescriptorResource::Sampler {
                    sampler: self.sampler,
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::ops::Range;

    use vulkan::ash::vk::Handle;
    use vulkan::{write_descriptor, DescriptorEncoder};

    use super::*;

    fn resources() -> SceneResources {
        SceneResources {
            top_level_address: 0xA000,
            uniform_address: 0xB000,
            mesh: GpuMesh {
                index_buffer: 0xC000,
                index_count: 300,
                vertex_buffer: 0xD000,
                vertex_count: 64,
                vertex_stride: 44,
            },
            texture_view: vk::ImageView::from_raw(0x51),
            sampler: vk::Sampler::from_raw(0x52),
        }
    }

    /// Scatters bindings the way a driver might: out of order with gaps.
    struct ScatteredLayout {
        offsets: HashMap<u32, vk::DeviceSize>,
    }

    impl ScatteredLayout {
        fn new() -> Self {
            let offsets = [(0, 192), (1, 0), (2, 16), (3, 64), (4, 96), (5, 128), (6, 176)];
            Self {
                offsets: offsets.into_iter().collect(),
            }
        }

        fn range(&self, binding: Binding) -> Range<usize> {
            let offset = self.offsets[&binding.index()] as usize;
            offset..offset + self.descriptor_size(binding.descriptor_type())
        }
    }

    impl DescriptorEncoder for ScatteredLayout {
        fn layout_size(&self) -> vk::DeviceSize {
            256
        }

        fn binding_offset(&self, binding: u32) -> vk::DeviceSize {
            self.offsets[&binding]
        }

        fn descriptor_size(&self, ty: vk::DescriptorType) -> usize {
            match ty {
                vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::SAMPLED_IMAGE => 32,
                vk::DescriptorType::SAMPLER => 8,
                _ => 16,
            }
        }

        fn encode(&self, resource: &DescriptorResource, dst: &mut [u8]) {
            let tag = match *resource {
                DescriptorResource::StorageImage { view, .. } => view.as_raw() as u8,
                _ => 0xEE,
            };
            dst.fill(tag);
        }
    }

    #[test]
    fn stage_visibility_per_slot() {
        let raygen = vk::ShaderStageFlags::RAYGEN_KHR;
        let hit = vk::ShaderStageFlags::CLOSEST_HIT_KHR;

        let stages: Vec<_> = Binding::ALL.iter().map(|b| b.stage_flags()).collect();
        assert_eq!(stages, vec![raygen, raygen, raygen | hit, hit, hit, hit, hit]);
    }

    #[test]
    fn layout_bindings_are_numbered_in_order() {
        for (index, binding) in layout_bindings().iter().enumerate() {
            assert_eq!(binding.binding, index as u32);
            assert_eq!(binding.descriptor_count, 1);
        }
        assert_eq!(
            layout_bindings()[1].descriptor_type,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
    }

    #[test]
    fn buffer_ranges_follow_the_mesh() {
        let descriptors = resources().descriptors();
        let range_of = |slot: Binding| {
            descriptors
                .iter()
                .find_map(|(binding, resource)| match resource {
                    DescriptorResource::StorageBuffer { range, .. }
                    | DescriptorResource::UniformBuffer { range, .. }
                        if *binding == slot =>
                    {
                        Some(*range)
                    }
                    _ => None,
                })
                .unwrap()
        };

        assert_eq!(range_of(Binding::Uniforms), 48);
        assert_eq!(range_of(Binding::Indices), 1200);
        assert_eq!(range_of(Binding::Vertices), 64 * 44);
    }

    #[test]
    fn resource_kind_matches_slot_type() {
        for (binding, resource) in resources().descriptors() {
            assert_eq!(resource.descriptor_type(), binding.descriptor_type());
        }
        assert_eq!(
            output_image_descriptor(vk::ImageView::null()).descriptor_type(),
            Binding::OutputImage.descriptor_type()
        );
    }

    #[test]
    fn output_image_rewrite_leaves_other_slots_alone() {
        let layout = ScatteredLayout::new();
        let mut buffer = vec![0u8; layout.layout_size() as usize];
        for (binding, resource) in resources().descriptors() {
            write_descriptor(&layout, &mut buffer, binding.index(), &resource);
        }
        let output = Binding::OutputImage.index();
        write_descriptor(
            &layout,
            &mut buffer,
            output,
            &output_image_descriptor(vk::ImageView::from_raw(0x11)),
        );
        let before = buffer.clone();

        let written = write_descriptor(
            &layout,
            &mut buffer,
            output,
            &output_image_descriptor(vk::ImageView::from_raw(0x22)),
        );

        let slot = layout.range(Binding::OutputImage);
        assert_eq!(written, slot);
        for (i, (old, new)) in before.iter().zip(&buffer).enumerate() {
            if slot.contains(&i) {
                assert_eq!((*old, *new), (0x11, 0x22), "byte {i}");
            } else {
                assert_eq!(old, new, "byte {i} outside the output image slot changed");
            }
        }
    }
}
