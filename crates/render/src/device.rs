use std::any::Any;
use std::sync::Arc;

use crate::{
    BufferUsages, Color, GpuBuffer, GpuBufferSlice, GpuError, GpuTexture, GpuTextureView,
    TextureFormat, TextureUsages,
};

/// The backend handle of a [`GpuBuffer`].
pub trait RawBuffer {
    /// A process-unique identifier for the underlying device resource.
    fn id(&self) -> u64;

    /// Releases the device memory backing the buffer.
    fn destroy(&self);

    /// Allows backends to downcast the handle back to their concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// The backend handle of a [`GpuTexture`].
pub trait RawTexture {
    /// A process-unique identifier for the underlying device resource.
    fn id(&self) -> u64;

    /// Releases the device memory backing the texture.
    fn destroy(&self);

    /// Allows backends to downcast the handle back to their concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// The backend handle of a [`GpuTextureView`].
pub trait RawTextureView {
    /// A process-unique identifier for the underlying view.
    fn id(&self) -> u64;

    /// Allows backends to downcast the handle back to their concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Describes a [`GpuBuffer`] to be created.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    /// The debug label of the buffer.
    pub label: &'a str,
    /// The usage mask of the buffer.
    pub usage: BufferUsages,
    /// The size of the buffer, in bytes.
    pub size: u64,
}

/// Describes a [`GpuTexture`] to be created.
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    /// The debug label of the texture.
    pub label: &'a str,
    /// The usage mask of the texture.
    pub usage: TextureUsages,
    /// The texel format of the texture.
    pub format: TextureFormat,
    /// The width of mip level 0, in texels.
    pub width: u32,
    /// The height of mip level 0, in texels.
    pub height: u32,
    /// The depth, or the number of array layers, of the texture.
    pub depth_or_layers: u32,
    /// The number of mip levels of the texture.
    pub mip_levels: u32,
    /// For depth formats, whether the allocation must also carry stencil
    /// capability. Ignored for color formats.
    pub stencil: bool,
}

/// Capability flags reported by a [`GpuDevice`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCapabilities {
    /// The device asks for immediate-mode buffers to be re-created on every
    /// upload instead of being overwritten in place.
    pub prefer_fresh_immediate_buffers: bool,
}

/// The index element width used by [`RenderPass::set_index_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit unsigned indices.
    Uint16,
    /// 32-bit unsigned indices.
    Uint32,
}

/// An open connection to a GPU.
///
/// This is the capability the resource layer consumes; it is implemented by
/// backend crates and, for headless use, by [`NullDevice`].
///
/// Implementations are not required to be thread-safe: the whole resource
/// layer runs on a single render thread.
///
/// [`NullDevice`]: crate::NullDevice
pub trait GpuDevice {
    /// Allocates a new buffer filled with zeros.
    ///
    /// Fails with [`GpuError::OutOfDeviceMemory`] when the device cannot
    /// satisfy the allocation.
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuBuffer, GpuError>;

    /// Allocates a new buffer sized and initialized from `contents`.
    fn create_buffer_init(
        &self,
        label: &str,
        usage: BufferUsages,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError>;

    /// Allocates a new texture.
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, GpuError>;

    /// Creates a view covering the whole mip chain of `texture`.
    fn create_texture_view(&self, texture: &Arc<GpuTexture>) -> GpuTextureView;

    /// Creates a view covering `mip_levels` levels of `texture`, starting at
    /// `base_mip_level`.
    fn create_texture_view_with_mips(
        &self,
        texture: &Arc<GpuTexture>,
        base_mip_level: u32,
        mip_levels: u32,
    ) -> GpuTextureView;

    /// Starts recording a batch of GPU commands.
    ///
    /// Commands recorded into one encoder execute in recording order on the
    /// GPU; no ordering is guaranteed across encoders beyond explicit data
    /// dependencies. The recorded work is handed to the GPU when the encoder
    /// is dropped.
    fn create_command_encoder(&self) -> Box<dyn CommandEncoder + '_>;

    /// The largest texture dimension this device supports.
    fn max_texture_size(&self) -> u32;

    /// The capability flags of this device.
    fn capabilities(&self) -> DeviceCapabilities;
}

/// A batch of GPU commands being recorded.
///
/// See [`GpuDevice::create_command_encoder`].
pub trait CommandEncoder {
    /// Writes `data` into the byte range designated by `dst`.
    ///
    /// The destination buffer needs the [`COPY_DST`] usage, and `data` must
    /// fit in the slice.
    ///
    /// [`COPY_DST`]: BufferUsages::COPY_DST
    fn write_buffer(&mut self, dst: GpuBufferSlice<'_>, data: &[u8]) -> Result<(), GpuError>;

    /// Copies the bytes of `src` into `dst`.
    ///
    /// Both slices must have the same length; the source buffer needs the
    /// [`COPY_SRC`] usage and the destination buffer the [`COPY_DST`] usage.
    ///
    /// [`COPY_SRC`]: BufferUsages::COPY_SRC
    /// [`COPY_DST`]: BufferUsages::COPY_DST
    fn copy_buffer_to_buffer(
        &mut self,
        src: GpuBufferSlice<'_>,
        dst: GpuBufferSlice<'_>,
    ) -> Result<(), GpuError>;

    /// Copies a `width`×`height` region of one mip level of `src` into the
    /// same region of `dst`.
    fn copy_texture_to_texture(
        &mut self,
        src: &GpuTexture,
        dst: &GpuTexture,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError>;

    /// Copies one mip level of `src` into `dst` at `offset`, and arranges for
    /// `on_complete` to be invoked once the copy has actually finished on the
    /// GPU.
    ///
    /// The callback is edge-triggered and invoked at most once, at an
    /// unspecified later point; no ordering is guaranteed relative to other
    /// completion callbacks. Failures occurring after this call returns are
    /// surfaced through the callback path, not through a return value.
    fn copy_texture_to_buffer(
        &mut self,
        src: &GpuTexture,
        dst: &GpuBuffer,
        offset: u64,
        mip_level: u32,
        on_complete: Box<dyn FnOnce() + 'static>,
    ) -> Result<(), GpuError>;

    /// Fills every texel of `texture` with `color`.
    fn clear_color_texture(&mut self, texture: &GpuTexture, color: Color) -> Result<(), GpuError>;

    /// Fills `color_texture` with `color` and `depth_texture` with `depth` in
    /// a single operation.
    fn clear_color_and_depth_textures(
        &mut self,
        color_texture: &GpuTexture,
        color: Color,
        depth_texture: &GpuTexture,
        depth: f32,
    ) -> Result<(), GpuError>;

    /// Starts a render pass targeting `color` (and optionally `depth`).
    ///
    /// The pass is scoped: it ends when the returned box is dropped, on every
    /// exit path, and its output textures may not be read before that.
    fn begin_render_pass<'pass>(
        &'pass mut self,
        label: &str,
        color: &'pass GpuTextureView,
        depth: Option<&'pass GpuTextureView>,
    ) -> Box<dyn RenderPass + 'pass>;

    /// Maps the byte range designated by `slice` into CPU-visible memory.
    ///
    /// The buffer needs the [`MAP_READ`] usage when `read` is set and the
    /// [`MAP_WRITE`] usage when `write` is set. The mapping is released when
    /// the returned box is dropped.
    ///
    /// [`MAP_READ`]: BufferUsages::MAP_READ
    /// [`MAP_WRITE`]: BufferUsages::MAP_WRITE
    fn map_buffer<'a>(
        &mut self,
        slice: GpuBufferSlice<'a>,
        read: bool,
        write: bool,
    ) -> Result<Box<dyn MappedBuffer + 'a>, GpuError>;

    /// Schedules `view` to be shown on the display surface.
    fn present_texture(&mut self, view: &GpuTextureView) -> Result<(), GpuError>;
}

/// A scoped recording of draw commands targeting a fixed set of attachments.
///
/// The pass ends when it is dropped.
pub trait RenderPass {
    /// Selects the named pipeline for subsequent draws.
    ///
    /// Pipeline names are registered with the backend ahead of time; drawing
    /// with an unregistered name is a programming error.
    fn set_pipeline(&mut self, pipeline: &str);

    /// Binds `buffer` as the vertex buffer of the given slot.
    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer);

    /// Binds `buffer` as the index buffer.
    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: IndexFormat);

    /// Binds `view` (and its texture's sampler state) to the named shader
    /// sampler.
    fn bind_sampler(&mut self, name: &str, view: &GpuTextureView);

    /// Binds the byte range designated by `slice` to the named uniform block.
    fn bind_uniform(&mut self, name: &str, slice: GpuBufferSlice<'_>);

    /// Issues an indexed draw call.
    fn draw_indexed(
        &mut self,
        base_vertex: i32,
        first_index: u32,
        index_count: u32,
        instance_count: u32,
    );
}

/// A buffer range mapped into CPU-visible memory.
///
/// The mapping is released when this is dropped.
pub trait MappedBuffer {
    /// The mapped bytes.
    fn data(&self) -> &[u8];

    /// The mapped bytes, writable.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was mapped without the `write` flag.
    fn data_mut(&mut self) -> &mut [u8];
}
