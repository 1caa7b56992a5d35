use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, Context, DescriptorSetLayout};

pub struct PipelineLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::PipelineLayout,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layouts = descriptor_set_layouts
            .iter()
            .map(|l| l.inner)
            .collect::<Vec<_>>();

        let pipe_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&layouts)
            .push_constant_ranges(push_constant_ranges);
        let inner = unsafe {
            device
                .inner
                .create_pipeline_layout(&pipe_layout_info, None)?
        };

        Ok(Self {
            device,
            inner,
            push_constant_ranges: push_constant_ranges.to_vec(),
        })
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Context {
    pub fn create_pipeline_layout(
        &self,
        descriptor_set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayout> {
        PipelineLayout::new(
            self.device.clone(),
            descriptor_set_layouts,
            push_constant_ranges,
        )
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline_layout(self.inner, None) };
    }
}
