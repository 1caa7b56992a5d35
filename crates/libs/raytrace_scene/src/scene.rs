use std::ops::Range;

use anyhow::{Context as _, Result};
use vulkan::ash::vk;
use vulkan::{
    CommandBuffer, Context, DescriptorBuffer, DescriptorEncoder, MappedBuffer, ShaderBindingTable,
};

use crate::{
    create_pipeline, output_image_descriptor, update_instance, Accelerator, Binding, GpuMesh,
    Matrix3x4, PipelineRes, PushConstants, SceneConfig, SceneResources, TraceRaysPlan,
    UNIFORM_RANGE,
};

/// Ray traced view of one mesh instance.
///
/// Owns the pipeline and everything bound to it: the shader binding table,
/// the descriptor buffer and the camera uniform buffer. The acceleration
/// structures stay with the caller's [`Accelerator`].
pub struct RaytraceScene {
    descriptor_buffer: DescriptorBuffer,
    uniform_buffer: MappedBuffer,
    shader_binding_table: ShaderBindingTable,
    pipeline_res: PipelineRes,
}

impl RaytraceScene {
    /// Builds the pipeline and fills every descriptor slot except the output
    /// image, which is set with [`Self::update_output_image_descriptor`].
    pub fn create<A: Accelerator + ?Sized>(
        context: &Context,
        config: &SceneConfig,
        accelerator: &A,
        mesh: &GpuMesh,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        let pipeline_res = create_pipeline(context, config)?;

        let shader_binding_table = context
            .create_shader_binding_table(&pipeline_res.pipeline)
            .context("Failed to create shader binding table")?;

        let mut uniform_buffer = context
            .create_mapped_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                UNIFORM_RANGE,
                None,
                "scene_uniforms",
            )
            .context("Failed to allocate scene uniform buffer")?;
        uniform_buffer.copy_data_to_buffer(&[Matrix3x4::IDENTITY]);

        let layout = &pipeline_res.descriptor_set_layout;
        for (binding, slot) in descriptor_slots(layout) {
            log::debug!("Descriptor slot {binding:?} at bytes {slot:?}");
        }

        let mut descriptor_buffer = context
            .create_descriptor_buffer(layout, "scene_descriptors")
            .context("Failed to create scene descriptor buffer")?;
        let resources = SceneResources {
            top_level_address: accelerator.top_level_address(),
            uniform_address: uniform_buffer.device_address(),
            mesh: *mesh,
            texture_view,
            sampler,
        };
        for (binding, resource) in resources.descriptors() {
            descriptor_buffer.write(layout, binding.index(), &resource);
        }

        Ok(Self {
            descriptor_buffer,
            uniform_buffer,
            shader_binding_table,
            pipeline_res,
        })
    }

    /// Releases the scene's device objects. The caller makes sure the GPU no
    /// longer uses them.
    ///
    /// The scene is consumed, so it cannot be destroyed twice:
    ///
    /// ```compile_fail
    /// fn teardown(scene: raytrace_scene::RaytraceScene) {
    ///     scene.destroy();
    ///     scene.destroy();
    /// }
    /// ```
    pub fn destroy(self) {
        let Self {
            descriptor_buffer,
            uniform_buffer,
            shader_binding_table,
            pipeline_res,
        } = self;
        let PipelineRes {
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
        } = pipeline_res;

        drop(descriptor_buffer);
        drop(uniform_buffer);
        drop(shader_binding_table);
        drop(pipeline);
        drop(pipeline_layout);
        drop(descriptor_set_layout);
        log::debug!("Destroyed ray traced scene");
    }

    /// Points slot 0 at `view`. No other slot is touched.
    pub fn update_output_image_descriptor(&mut self, view: vk::ImageView) {
        self.descriptor_buffer.write(
            &self.pipeline_res.descriptor_set_layout,
            Binding::OutputImage.index(),
            &output_image_descriptor(view),
        );
    }

    /// Moves the mesh instance and the camera for the next dispatch.
    ///
    /// The uniform buffer is written in place, so the GPU must be done with
    /// the previous frame.
    ///
    /// # Panics
    ///
    /// If `accelerator` does not hold exactly one bottom level structure.
    pub fn update<A: Accelerator + ?Sized>(
        &mut self,
        accelerator: &mut A,
        model_transform: Matrix3x4,
        camera_transform: Matrix3x4,
    ) {
        update_instance(accelerator, &model_transform);
        self.uniform_buffer.copy_data_to_buffer(&[camera_transform]);
    }

    /// Records the top level rebuild and a trace over `surface_extent`.
    pub fn dispatch<A: Accelerator + ?Sized>(
        &self,
        cmd_buffer: &CommandBuffer,
        accelerator: &mut A,
        surface_extent: vk::Extent2D,
        spp4: bool,
        show_texture_lod: bool,
    ) {
        accelerator.rebuild_top_level(cmd_buffer);

        let layout = &self.pipeline_res.pipeline_layout;
        cmd_buffer.bind_descriptor_buffers(&[self.descriptor_buffer.binding_info()]);
        cmd_buffer.set_descriptor_buffer_offsets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            layout,
            0,
            &[0],
            &[0],
        );
        cmd_buffer.bind_rt_pipeline(&self.pipeline_res.pipeline);

        let constants = PushConstants {
            spp4,
            show_texture_lod,
        };
        for (range, bytes) in constants.ranges() {
            cmd_buffer.push_constants(layout, range.stage_flags, range.offset, &bytes);
        }

        let plan = TraceRaysPlan::new(*self.shader_binding_table.regions(), surface_extent);
        log::trace!("Tracing {}x{} rays", plan.width, plan.height);
        cmd_buffer.trace_rays(&plan.regions, plan.width, plan.height, plan.depth);
    }

    pub fn shader_binding_table(&self) -> &ShaderBindingTable {
        &self.shader_binding_table
    }

    pub fn descriptor_buffer(&self) -> &DescriptorBuffer {
        &self.descriptor_buffer
    }
}

/// Byte range of every slot in the descriptor layout, as the device places
/// them.
pub fn descriptor_slots<E: DescriptorEncoder + ?Sized>(
    encoder: &E,
) -> [(Binding, Range<vk::DeviceSize>); 7] {
    Binding::ALL.map(|binding| {
        let offset = encoder.binding_offset(binding.index());
        let size = encoder.descriptor_size(binding.descriptor_type()) as vk::DeviceSize;
        (binding, offset..offset + size)
    })
}

#[cfg(test)]
mod tests {
    use vulkan::DescriptorResource;

    use super::*;

    /// Packs slots back to back with the sizes a desktop driver reports.
    struct PackedLayout;

    impl PackedLayout {
        fn size_of(ty: vk::DescriptorType) -> usize {
            match ty {
                vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::SAMPLED_IMAGE => 32,
                vk::DescriptorType::SAMPLER => 16,
                _ => 8,
            }
        }
    }

    impl DescriptorEncoder for PackedLayout {
        fn layout_size(&self) -> vk::DeviceSize {
            Binding::ALL
                .iter()
                .map(|b| Self::size_of(b.descriptor_type()) as vk::DeviceSize)
                .sum()
        }

        fn binding_offset(&self, binding: u32) -> vk::DeviceSize {
            Binding::ALL[..binding as usize]
                .iter()
                .map(|b| Self::size_of(b.descriptor_type()) as vk::DeviceSize)
                .sum()
        }

        fn descriptor_size(&self, ty: vk::DescriptorType) -> usize {
            Self::size_of(ty)
        }

        fn encode(&self, _resource: &DescriptorResource, dst: &mut [u8]) {
            dst.fill(0xFF);
        }
    }

    #[test]
    fn slots_are_disjoint_and_inside_the_layout() {
        let _ = pretty_env_logger::try_init();
        let slots = descriptor_slots(&PackedLayout);

        for (i, (binding, slot)) in slots.iter().enumerate() {
            log::debug!("{binding:?} {slot:?}");
            assert!(slot.end <= PackedLayout.layout_size());
            for (_, other) in &slots[i + 1..] {
                assert!(slot.end <= other.start || other.end <= slot.start);
            }
        }
        assert_eq!(slots[0], (Binding::OutputImage, 0..32));
        assert_eq!(slots[6].1.end, PackedLayout.layout_size());
    }
}
