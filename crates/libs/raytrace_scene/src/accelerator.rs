use std::mem::size_of;

use anyhow::{Context as _, Result};
use vulkan::ash::vk::{self, Packed24_8};
use vulkan::{AccelerationStructure, CommandBuffer, Context, MappedBuffer, MemoryBarrier};

use crate::{GpuMesh, Matrix3x4};

/// Acceleration structures the scene traces against.
///
/// The scene never owns one: every call that needs it borrows it, and teardown
/// is the implementor's `Drop`.
pub trait Accelerator {
    /// Device address of every bottom level structure, in instance order.
    fn bottom_level_addresses(&self) -> &[vk::DeviceAddress];

    fn top_level_address(&self) -> vk::DeviceAddress;

    /// The host mapped instance records read by the next top level build.
    fn instances_mut(&mut self) -> &mut [vk::AccelerationStructureInstanceKHR];

    /// Records a top level rebuild from the current instance records.
    fn rebuild_top_level(&mut self, cmd_buffer: &CommandBuffer);
}

/// Writes `transform` and the fixed instance metadata into `record`.
pub fn write_instance_record(
    record: &mut vk::AccelerationStructureInstanceKHR,
    transform: &Matrix3x4,
    bottom_level_address: vk::DeviceAddress,
) {
    *record = vk::AccelerationStructureInstanceKHR {
        transform: transform.to_transform_matrix(),
        instance_custom_index_and_mask: Packed24_8::new(0, 0xFF),
        instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as _,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: bottom_level_address,
        },
    };
}

/// Places the single mesh instance at `model_transform`.
///
/// # Panics
///
/// If `accelerator` does not hold exactly one bottom level structure.
pub fn update_instance<A: Accelerator + ?Sized>(accelerator: &mut A, model_transform: &Matrix3x4) {
    let addresses = accelerator.bottom_level_addresses();
    assert_eq!(
        addresses.len(),
        1,
        "The scene traces exactly one mesh instance but the accelerator holds {} bottom level structures",
        addresses.len()
    );
    let bottom_level_address = addresses[0];

    let instances = accelerator.instances_mut();
    assert_eq!(instances.len(), 1, "Expected one instance record per bottom level structure");
    write_instance_record(&mut instances[0], model_transform, bottom_level_address);
}

/// One bottom level structure per mesh and a top level structure over them.
pub struct MeshAccelerator {
    tlas: AccelerationStructure,
    instance_buffer: MappedBuffer,
    instance_count: u32,
    _blases: Vec<AccelerationStructure>,
    blas_addresses: Vec<vk::DeviceAddress>,
}

impl MeshAccelerator {
    /// Creates the structures and records the bottom level builds into
    /// `cmd_buffer`. The builds run when the caller submits it.
    pub fn new(context: &Context, meshes: &[GpuMesh], cmd_buffer: &CommandBuffer) -> Result<Self> {
        assert!(!meshes.is_empty(), "An accelerator needs at least one mesh");

        let mut blases = Vec::with_capacity(meshes.len());
        for (index, mesh) in meshes.iter().enumerate() {
            let geometry = triangle_geometry(mesh);
            let blas = context
                .create_bottom_level_acceleration_structure(
                    &[geometry],
                    &[mesh.triangle_count()],
                )
                .with_context(|| format!("Failed to create bottom level structure for mesh {index}"))?;
            blas.cmd_build(cmd_buffer, &[geometry], &[triangle_range(mesh)]);
            blases.push(blas);
        }
        cmd_buffer.pipeline_memory_barriers(&[MemoryBarrier::ACCELERATION_STRUCTURE_BUILD]);

        let blas_addresses: Vec<_> = blases.iter().map(|blas| blas.address).collect();
        let instance_count = blases.len() as u32;

        let mut instance_buffer = context
            .create_mapped_buffer(
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                (blases.len() * size_of::<vk::AccelerationStructureInstanceKHR>()) as _,
                Some(16),
                "tlas_instances",
            )
            .context("Failed to allocate instance buffer")?;
        let instances: Vec<_> = blas_addresses
            .iter()
            .map(|address| {
                let mut record = vk::AccelerationStructureInstanceKHR {
                    transform: Matrix3x4::IDENTITY.to_transform_matrix(),
                    instance_custom_index_and_mask: Packed24_8::new(0, 0),
                    instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(0, 0),
                    acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                        device_handle: 0,
                    },
                };
                write_instance_record(&mut record, &Matrix3x4::IDENTITY, *address);
                record
            })
            .collect();
        instance_buffer.copy_data_to_buffer(&instances);

        let tlas = context
            .create_top_level_acceleration_structure(
                &[instance_geometry(instance_buffer.device_address())],
                &[instance_count],
            )
            .context("Failed to create top level structure")?;
        log::info!(
            "Created accelerator with {instance_count} instances, top level at {:#x}",
            tlas.address
        );

        Ok(Self {
            tlas,
            instance_buffer,
            instance_count,
            _blases: blases,
            blas_addresses,
        })
    }
}

impl Accelerator for MeshAccelerator {
    fn bottom_level_addresses(&self) -> &[vk::DeviceAddress] {
        &self.blas_addresses
    }

    fn top_level_address(&self) -> vk::DeviceAddress {
        self.tlas.address
    }

    fn instances_mut(&mut self) -> &mut [vk::AccelerationStructureInstanceKHR] {
        let bytes = self.instance_buffer.bytes_mut();
        // The buffer was sized for `instance_count` records and allocated
        // with 16 byte alignment.
        unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast(), self.instance_count as usize)
        }
    }

    fn rebuild_top_level(&mut self, cmd_buffer: &CommandBuffer) {
        let geometry = instance_geometry(self.instance_buffer.device_address());
        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(self.instance_count)
            .build();

        self.tlas.cmd_build(cmd_buffer, &[geometry], &[range]);
        cmd_buffer.pipeline_memory_barriers(&[MemoryBarrier::ACCELERATION_STRUCTURE_BUILD]);
    }
}

fn triangle_geometry(mesh: &GpuMesh) -> vk::AccelerationStructureGeometryKHR {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: mesh.vertex_buffer,
        })
        .vertex_stride(mesh.vertex_stride as _)
        .max_vertex(mesh.vertex_count.saturating_sub(1))
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: mesh.index_buffer,
        })
        .build();

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .build()
}

fn triangle_range(mesh: &GpuMesh) -> vk::AccelerationStructureBuildRangeInfoKHR {
    vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .first_vertex(0)
        .primitive_count(mesh.triangle_count())
        .primitive_offset(0)
        .build()
}

fn instance_geometry(instance_address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR {
    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: instance_address,
                })
                .build(),
        })
        .build()
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;

    fn blank_record() -> vk::AccelerationStructureInstanceKHR {
        vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR { matrix: [0.0; 12] },
            instance_custom_index_and_mask: Packed24_8::new(0x00AB_CDEF, 0x12),
            instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(7, 0),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: 0,
            },
        }
    }

    /// Host only accelerator holding plain instance records.
    struct FakeAccelerator {
        addresses: Vec<vk::DeviceAddress>,
        instances: Vec<vk::AccelerationStructureInstanceKHR>,
    }

    impl FakeAccelerator {
        fn with_meshes(count: usize) -> Self {
            Self {
                addresses: (0..count as u64).map(|i| 0xB000 + i * 0x100).collect(),
                instances: vec![blank_record(); count],
            }
        }
    }

    impl Accelerator for FakeAccelerator {
        fn bottom_level_addresses(&self) -> &[vk::DeviceAddress] {
            &self.addresses
        }

        fn top_level_address(&self) -> vk::DeviceAddress {
            0xF000
        }

        fn instances_mut(&mut self) -> &mut [vk::AccelerationStructureInstanceKHR] {
            &mut self.instances
        }

        fn rebuild_top_level(&mut self, _cmd_buffer: &CommandBuffer) {}
    }

    fn metadata(record: &vk::AccelerationStructureInstanceKHR) -> (u32, u8, u32, u8, u64) {
        let reference = unsafe { record.acceleration_structure_reference.device_handle };
        (
            record.instance_custom_index_and_mask.low_24(),
            record.instance_custom_index_and_mask.high_8(),
            record
                .instance_shader_binding_table_record_offset_and_flags
                .low_24(),
            record
                .instance_shader_binding_table_record_offset_and_flags
                .high_8(),
            reference,
        )
    }

    #[test]
    fn record_gets_fixed_metadata() {
        let mut record = blank_record();
        write_instance_record(&mut record, &Matrix3x4::IDENTITY, 0xB000);

        let cull_disable = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8;
        assert_eq!(metadata(&record), (0, 0xFF, 0, cull_disable, 0xB000));
        assert_eq!(record.transform.matrix, Matrix3x4::IDENTITY.to_transform_matrix().matrix);
    }

    #[test]
    fn repeated_updates_only_move_the_transform() {
        let mut accelerator = FakeAccelerator::with_meshes(1);

        update_instance(&mut accelerator, &Mat4::from_translation(Vec3::X).into());
        let first = accelerator.instances[0];
        update_instance(
            &mut accelerator,
            &Mat4::from_scale_rotation_translation(
                Vec3::splat(3.0),
                glam::Quat::from_rotation_z(1.0),
                Vec3::new(0.0, -2.0, 5.0),
            )
            .into(),
        );
        let second = accelerator.instances[0];

        assert_eq!(metadata(&first), metadata(&second));
        assert_eq!(metadata(&second).4, 0xB000);
        assert_ne!(first.transform.matrix, second.transform.matrix);
        assert_eq!(second.transform.matrix[11], 5.0);
    }

    #[test]
    #[should_panic(expected = "holds 0 bottom level structures")]
    fn update_without_mesh_is_fatal() {
        update_instance(&mut FakeAccelerator::with_meshes(0), &Matrix3x4::IDENTITY);
    }

    #[test]
    #[should_panic(expected = "holds 2 bottom level structures")]
    fn update_with_two_meshes_is_fatal() {
        update_instance(&mut FakeAccelerator::with_meshes(2), &Matrix3x4::IDENTITY);
    }
}
