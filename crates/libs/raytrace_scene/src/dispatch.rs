use std::mem::size_of;

use vulkan::ash::vk;
use vulkan::ShaderBindingTableRegions;

/// Push constant ranges of the scene pipeline layout: the super sampling
/// toggle for raygen, then the texture LOD toggle for closest hit.
pub const PUSH_CONSTANT_RANGES: [vk::PushConstantRange; 2] = [
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::RAYGEN_KHR,
        offset: 0,
        size: size_of::<u32>() as u32,
    },
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        offset: size_of::<u32>() as u32,
        size: size_of::<u32>() as u32,
    },
];

/// Per dispatch shader toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushConstants {
    /// Four samples per pixel in the raygen shader.
    pub spp4: bool,
    /// Colour hits by texture LOD instead of shading them.
    pub show_texture_lod: bool,
}

impl PushConstants {
    /// The value pushed for each of [`PUSH_CONSTANT_RANGES`], as `u32` bytes.
    pub fn ranges(&self) -> [(vk::PushConstantRange, [u8; 4]); 2] {
        let [raygen, closest_hit] = PUSH_CONSTANT_RANGES;
        [
            (raygen, (self.spp4 as u32).to_ne_bytes()),
            (closest_hit, (self.show_texture_lod as u32).to_ne_bytes()),
        ]
    }
}

/// Everything a trace rays command needs besides the command buffer.
#[derive(Debug, Clone, Copy)]
pub struct TraceRaysPlan {
    pub regions: ShaderBindingTableRegions,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TraceRaysPlan {
    /// One ray per pixel of `extent`.
    pub fn new(regions: ShaderBindingTableRegions, extent: vk::Extent2D) -> Self {
        Self {
            regions,
            width: extent.width,
            height: extent.height,
            depth: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use vulkan::ShaderBindingTableLayout;

    use super::*;

    #[test]
    fn toggles_become_one_or_zero() {
        let constants = PushConstants {
            spp4: true,
            show_texture_lod: false,
        };
        let [(raygen, raygen_bytes), (hit, hit_bytes)] = constants.ranges();

        assert_eq!(u32::from_ne_bytes(raygen_bytes), 1);
        assert_eq!(u32::from_ne_bytes(hit_bytes), 0);
        assert_eq!(raygen.stage_flags, vk::ShaderStageFlags::RAYGEN_KHR);
        assert_eq!(hit.stage_flags, vk::ShaderStageFlags::CLOSEST_HIT_KHR);
    }

    #[test]
    fn ranges_are_adjacent_words() {
        let [raygen, closest_hit] = PUSH_CONSTANT_RANGES;

        assert_eq!((raygen.offset, raygen.size), (0, 4));
        assert_eq!((closest_hit.offset, closest_hit.size), (4, 4));
    }

    #[test]
    fn grid_follows_the_surface() {
        let regions = ShaderBindingTableLayout::new(32, 64).regions(0x4000);

        let plan = TraceRaysPlan::new(regions, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!((plan.width, plan.height, plan.depth), (1280, 720, 1));

        let resized = TraceRaysPlan::new(regions, vk::Extent2D { width: 800, height: 600 });
        assert_eq!((resized.width, resized.height, resized.depth), (800, 600, 1));
        assert_eq!(
            resized.regions.hit.device_address,
            plan.regions.hit.device_address
        );
    }
}
