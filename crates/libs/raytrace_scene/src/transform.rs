use glam::{Affine3A, Mat4};
use vulkan::ash::vk;

/// Row major 3x4 affine transform, laid out like `VkTransformMatrixKHR` and
/// like the `mat3x4` uniform the shaders read.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Matrix3x4 {
    pub rows: [[f32; 4]; 3],
}

impl Matrix3x4 {
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    pub fn to_transform_matrix(&self) -> vk::TransformMatrixKHR {
        let mut matrix = [0.0; 12];
        for (dst, row) in matrix.chunks_exact_mut(4).zip(self.rows.iter()) {
            dst.copy_from_slice(row);
        }

        vk::TransformMatrixKHR { matrix }
    }
}

impl Default for Matrix3x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Mat4> for Matrix3x4 {
    /// Drops the projective row of `matrix`.
    fn from(matrix: Mat4) -> Self {
        Self {
            rows: [
                matrix.row(0).to_array(),
                matrix.row(1).to_array(),
                matrix.row(2).to_array(),
            ],
        }
    }
}

impl From<Affine3A> for Matrix3x4 {
    fn from(transform: Affine3A) -> Self {
        Mat4::from(transform).into()
    }
}
