pub use ash;
pub use gpu_allocator;

mod buffer;
mod command;
mod context;
mod descriptor;
mod device;
mod pipeline;
mod ray_tracing;

pub mod utils;

pub use buffer::*;
pub use command::*;
pub use context::*;
pub use descriptor::*;
pub use device::*;
pub use pipeline::*;
pub use ray_tracing::*;
