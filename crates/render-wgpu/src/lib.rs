//! The `wgpu` implementation of the Cobble GPU resource layer.
//!
//! [`Surface::new`] connects to a window and a GPU and yields the
//! [`WgpuDevice`] that the rest of the renderer talks to through the
//! [`cobble_render::GpuDevice`] capability. Pipelines are built with `wgpu`
//! directly and registered on the device by name; everything else goes
//! through the backend-agnostic resource layer.

pub use wgpu;

mod device;
pub use device::*;

mod surface;
pub use surface::*;

mod shaders;
