use std::{ffi::CStr, sync::Arc};

use anyhow::{Context as _, Result};
use ash::vk;

use crate::{device::Device, utils::read_shader_from_bytes, Context};

use crate::{PipelineLayout, RayTracingContext};

#[derive(Debug, Clone, Copy)]
pub struct RayTracingPipelineCreateInfo<'a> {
    /// Shaders in shader group order: raygen first, then miss, then hit.
    pub shaders: &'a [RayTracingShaderCreateInfo<'a>],
    pub max_ray_recursion_depth: u32,
    pub flags: vk::PipelineCreateFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct RayTracingShaderCreateInfo<'a> {
    pub source: &'a [u8],
    pub stage: vk::ShaderStageFlags,
    pub group: RayTracingShaderGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RayTracingShaderGroup {
    RayGen,
    Miss,
    ClosestHit,
}

impl RayTracingShaderGroup {
    fn create_info(self, shader_index: u32) -> vk::RayTracingShaderGroupCreateInfoKHR {
        let group = vk::RayTracingShaderGroupCreateInfoKHR::builder()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR);

        let group = match self {
            Self::RayGen | Self::Miss => group.general_shader(shader_index),
            Self::ClosestHit => group
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .closest_hit_shader(shader_index),
        };
        group.build()
    }
}

pub struct RayTracingPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub(crate) shader_group_info: RayTracingShaderGroupInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingShaderGroupInfo {
    pub group_count: u32,
    pub raygen_shader_count: u32,
    pub miss_shader_count: u32,
    pub hit_shader_count: u32,
}

impl RayTracingShaderGroupInfo {
    fn from_shaders(shaders: &[RayTracingShaderCreateInfo]) -> Self {
        assert!(
            shaders.windows(2).all(|w| w[0].group <= w[1].group),
            "Ray tracing shaders must be ordered raygen, miss, hit"
        );

        shaders.iter().fold(
            Self {
                group_count: shaders.len() as u32,
                ..Default::default()
            },
            |mut info, shader| {
                match shader.group {
                    RayTracingShaderGroup::RayGen => info.raygen_shader_count += 1,
                    RayTracingShaderGroup::Miss => info.miss_shader_count += 1,
                    RayTracingShaderGroup::ClosestHit => info.hit_shader_count += 1,
                }
                info
            },
        )
    }
}

/// Shader module that only lives until its pipeline is created.
struct ShaderModule {
    device: Arc<Device>,
    inner: vk::ShaderModule,
}

impl ShaderModule {
    fn from_bytes(device: Arc<Device>, source: &[u8]) -> Result<Self> {
        let source = read_shader_from_bytes(source)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&source);
        let inner = unsafe { device.inner.create_shader_module(&create_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.inner.destroy_shader_module(self.inner, None);
        }
    }
}

impl RayTracingPipeline {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: &RayTracingContext,
        layout: &PipelineLayout,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<Self> {
        let shader_group_info = RayTracingShaderGroupInfo::from_shaders(create_info.shaders);

        let entry_point_name = CStr::from_bytes_with_nul(b"main\0")?;
        let mut modules = vec![];
        let mut stages = vec![];
        let mut groups = vec![];

        for (shader_index, shader) in create_info.shaders.iter().enumerate() {
            let module = ShaderModule::from_bytes(device.clone(), shader.source)
                .with_context(|| format!("Failed to load {:?} shader module", shader.group))?;

            let stage = vk::PipelineShaderStageCreateInfo::builder()
                .stage(shader.stage)
                .module(module.inner)
                .name(entry_point_name)
                .build();

            groups.push(shader.group.create_info(shader_index as _));
            modules.push(module);
            stages.push(stage);
        }

        let pipe_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .flags(create_info.flags)
            .layout(layout.inner)
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(create_info.max_ray_recursion_depth);

        let inner = unsafe {
            ray_tracing.pipeline_fn.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipe_info),
                None,
            )?[0]
        };
        log::info!(
            "Created ray tracing pipeline with {} shader groups",
            shader_group_info.group_count
        );

        Ok(Self {
            device,
            inner,
            shader_group_info,
        })
    }

    pub fn shader_group_info(&self) -> RayTracingShaderGroupInfo {
        self.shader_group_info
    }
}

impl Context {
    pub fn create_ray_tracing_pipeline(
        &self,
        layout: &PipelineLayout,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<RayTracingPipeline> {
        RayTracingPipeline::new(self.device.clone(), &self.ray_tracing, layout, create_info)
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(group: RayTracingShaderGroup) -> RayTracingShaderCreateInfo<'static> {
        RayTracingShaderCreateInfo {
            source: &[],
            stage: vk::ShaderStageFlags::empty(),
            group,
        }
    }

    #[test]
    fn counts_one_group_per_shader() {
        let shaders = [
            shader(RayTracingShaderGroup::RayGen),
            shader(RayTracingShaderGroup::Miss),
            shader(RayTracingShaderGroup::ClosestHit),
        ];

        assert_eq!(
            RayTracingShaderGroupInfo::from_shaders(&shaders),
            RayTracingShaderGroupInfo {
                group_count: 3,
                raygen_shader_count: 1,
                miss_shader_count: 1,
                hit_shader_count: 1,
            }
        );
    }

    #[test]
    #[should_panic(expected = "ordered raygen, miss, hit")]
    fn out_of_order_groups_are_rejected() {
        let shaders = [
            shader(RayTracingShaderGroup::Miss),
            shader(RayTracingShaderGroup::RayGen),
        ];

        RayTracingShaderGroupInfo::from_shaders(&shaders);
    }

    #[test]
    fn hit_group_uses_the_closest_hit_slot() {
        let group = RayTracingShaderGroup::ClosestHit.create_info(2);

        assert_eq!(group.ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(group.closest_hit_shader, 2);
        assert_eq!(group.general_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(group.any_hit_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(group.intersection_shader, vk::SHADER_UNUSED_KHR);
    }

    #[test]
    fn general_groups_use_the_general_slot() {
        let group = RayTracingShaderGroup::Miss.create_info(1);

        assert_eq!(group.ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(group.general_shader, 1);
        assert_eq!(group.closest_hit_shader, vk::SHADER_UNUSED_KHR);
    }
}
