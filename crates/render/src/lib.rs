//! The GPU resource layer used by the Cobble client.
//!
//! This crate knows nothing about any concrete graphics API. It models GPU
//! resources (buffers, textures, render targets) and the validation rules
//! that go with them, and talks to the actual hardware through the
//! [`GpuDevice`] capability implemented by a backend crate (or by the
//! in-memory [`NullDevice`] when running headless).
//!
//! Everything in this crate is meant to be used from a single render thread.

mod error;
pub use error::*;

mod color;
pub use color::*;

mod buffer;
pub use buffer::*;

mod texture;
pub use texture::*;

mod device;
pub use device::*;

mod std140;
pub use std140::*;

mod context;
pub use context::*;

mod render_target;
pub use render_target::*;

mod vertex_format;
pub use vertex_format::*;

mod pip;
pub use pip::*;

mod ring;
pub use ring::*;

mod null;
pub use null::*;
