//! Ray traced rendering pass for a single mesh.
//!
//! [`RaytraceScene`] owns the ray tracing pipeline, its shader binding table
//! and a descriptor buffer. The acceleration structures belong to the caller
//! and are lent to every call through the [`Accelerator`] trait.

pub use anyhow;
pub use vulkan;

mod accelerator;
mod bindings;
mod config;
mod dispatch;
mod mesh;
mod pipeline_res;
mod scene;
mod transform;

pub use accelerator::*;
pub use bindings::*;
pub use config::*;
pub use dispatch::*;
pub use mesh::*;
pub use pipeline_res::*;
pub use scene::*;
pub use transform::*;
