use anyhow::{Context as _, Result};
use resource_manager::load_spv;
use vulkan::ash::vk;
use vulkan::{
    Context, DescriptorSetLayout, PipelineLayout, RayTracingPipeline, RayTracingPipelineCreateInfo,
    RayTracingShaderCreateInfo, RayTracingShaderGroup,
};

use crate::{layout_bindings, SceneConfig, PUSH_CONSTANT_RANGES};

pub struct PipelineRes {
    pub(crate) pipeline: RayTracingPipeline,
    pub(crate) pipeline_layout: PipelineLayout,
    pub(crate) descriptor_set_layout: DescriptorSetLayout,
}

/// Pipeline flags: descriptors come from a descriptor buffer and every
/// miss and closest hit group has a shader.
pub const PIPELINE_FLAGS: vk::PipelineCreateFlags = vk::PipelineCreateFlags::from_raw(
    vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT.as_raw()
        | vk::PipelineCreateFlags::RAY_TRACING_NO_NULL_CLOSEST_HIT_SHADERS_KHR.as_raw()
        | vk::PipelineCreateFlags::RAY_TRACING_NO_NULL_MISS_SHADERS_KHR.as_raw(),
);

pub fn create_pipeline(context: &Context, config: &SceneConfig) -> Result<PipelineRes> {
    // descriptor and pipeline layouts
    let descriptor_set_layout = context
        .create_descriptor_set_layout(&layout_bindings())
        .context("Failed to create scene descriptor set layout")?;

    let pipeline_layout = context
        .create_pipeline_layout(&[&descriptor_set_layout], &PUSH_CONSTANT_RANGES)
        .context("Failed to create scene pipeline layout")?;

    // Shader groups
    let [raygen_file, miss_file, closest_hit_file] = config.shader_files();
    let search_paths = config.search_paths();
    let raygen_source = load_spv(raygen_file, search_paths)
        .with_context(|| format!("Failed to load raygen shader {}", raygen_file.display()))?;
    let miss_source = load_spv(miss_file, search_paths)
        .with_context(|| format!("Failed to load miss shader {}", miss_file.display()))?;
    let closest_hit_source = load_spv(closest_hit_file, search_paths).with_context(|| {
        format!(
            "Failed to load closest hit shader {}",
            closest_hit_file.display()
        )
    })?;

    let shaders_create_info = [
        RayTracingShaderCreateInfo {
            source: &raygen_source,
            stage: vk::ShaderStageFlags::RAYGEN_KHR,
            group: RayTracingShaderGroup::RayGen,
        },
        RayTracingShaderCreateInfo {
            source: &miss_source,
            stage: vk::ShaderStageFlags::MISS_KHR,
            group: RayTracingShaderGroup::Miss,
        },
        RayTracingShaderCreateInfo {
            source: &closest_hit_source,
            stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            group: RayTracingShaderGroup::ClosestHit,
        },
    ];

    let pipeline_create_info = RayTracingPipelineCreateInfo {
        shaders: &shaders_create_info,
        max_ray_recursion_depth: 1,
        flags: PIPELINE_FLAGS,
    };

    let pipeline = context
        .create_ray_tracing_pipeline(&pipeline_layout, pipeline_create_info)
        .context("Failed to create scene ray tracing pipeline")?;

    Ok(PipelineRes {
        pipeline,
        pipeline_layout,
        descriptor_set_layout,
    })
}
