//! A headless [`GpuDevice`] implementation backed by plain memory.
//!
//! The null device records every operation it is asked to perform, backs
//! buffers with byte vectors, and validates usage masks and ranges the way a
//! real backend would. It exists for tests and for running the engine without
//! a GPU (benchmarks, CI).

use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

use crate::{
    BufferDescriptor, BufferUsages, Color, CommandEncoder, DeviceCapabilities, GpuBuffer,
    GpuBufferSlice, GpuDevice, GpuError, GpuTexture, GpuTextureView, IndexFormat, MappedBuffer,
    RawBuffer, RawTexture, RawTextureView, RenderPass, TextureDescriptor,
};

/// Counters tracking what a [`NullDevice`] has been asked to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDeviceStats {
    /// The number of buffers created.
    pub buffers_created: usize,
    /// The number of buffers destroyed.
    pub buffers_destroyed: usize,
    /// The number of textures created.
    pub textures_created: usize,
    /// The number of textures destroyed.
    pub textures_destroyed: usize,
    /// The number of textures presented to the (imaginary) surface.
    pub presents: usize,
    /// The number of indexed draw calls recorded.
    pub draw_calls: usize,
}

struct NullBuffer {
    id: u64,
    data: RefCell<Vec<u8>>,
    stats: Rc<RefCell<NullDeviceStats>>,
}

impl RawBuffer for NullBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn destroy(&self) {
        self.stats.borrow_mut().buffers_destroyed += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NullTexture {
    id: u64,
    stats: Rc<RefCell<NullDeviceStats>>,
}

impl RawTexture for NullTexture {
    fn id(&self) -> u64 {
        self.id
    }

    fn destroy(&self) {
        self.stats.borrow_mut().textures_destroyed += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NullTextureView {
    id: u64,
}

impl RawTextureView for NullTextureView {
    fn id(&self) -> u64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A [`GpuDevice`] that talks to no GPU at all.
///
/// Resource identifiers are assigned sequentially, buffer contents are held
/// in CPU memory, and completion callbacks fire at record time, which makes
/// every behavior of the resource layer observable and deterministic.
pub struct NullDevice {
    next_id: Cell<u64>,
    max_texture_size: u32,
    capabilities: Cell<DeviceCapabilities>,
    fail_allocation_in: Cell<Option<usize>>,
    stats: Rc<RefCell<NullDeviceStats>>,
}

impl NullDevice {
    /// Creates a new [`NullDevice`] reporting the given maximum texture
    /// dimension.
    pub fn new(max_texture_size: u32) -> Self {
        Self {
            next_id: Cell::new(1),
            max_texture_size,
            capabilities: Cell::new(DeviceCapabilities::default()),
            fail_allocation_in: Cell::new(None),
            stats: Rc::new(RefCell::new(NullDeviceStats::default())),
        }
    }

    /// Overrides the capability flags this device reports.
    pub fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        self.capabilities.set(capabilities);
    }

    /// Makes the next resource allocation fail with
    /// [`GpuError::OutOfDeviceMemory`].
    pub fn fail_next_allocation(&self) {
        self.fail_allocation_in(0);
    }

    /// Makes the allocation `skip` allocations from now fail with
    /// [`GpuError::OutOfDeviceMemory`].
    pub fn fail_allocation_in(&self, skip: usize) {
        self.fail_allocation_in.set(Some(skip));
    }

    /// Returns a snapshot of the operation counters.
    pub fn stats(&self) -> NullDeviceStats {
        *self.stats.borrow()
    }

    /// Returns a copy of the bytes backing `buffer`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` was not created by a [`NullDevice`].
    pub fn buffer_contents(&self, buffer: &GpuBuffer) -> Vec<u8> {
        backing(buffer).data.borrow().clone()
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn check_allocation(&self) -> Result<(), GpuError> {
        match self.fail_allocation_in.take() {
            Some(0) => Err(GpuError::OutOfDeviceMemory),
            Some(skip) => {
                self.fail_allocation_in.set(Some(skip - 1));
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Returns the null backing of `buffer`.
fn backing(buffer: &GpuBuffer) -> &NullBuffer {
    buffer
        .raw()
        .as_any()
        .downcast_ref::<NullBuffer>()
        .unwrap_or_else(|| panic!("buffer `{}` was not created by a null device", buffer.label()))
}

fn require_open(buffer: &GpuBuffer) -> Result<(), GpuError> {
    if buffer.is_closed() {
        return Err(GpuError::Closed {
            label: buffer.label().to_owned(),
        });
    }
    Ok(())
}

fn require_usage(buffer: &GpuBuffer, usage: BufferUsages) -> Result<(), GpuError> {
    if !buffer.usage().contains(usage) {
        return Err(GpuError::MissingBufferUsage {
            label: buffer.label().to_owned(),
            missing: usage - buffer.usage(),
        });
    }
    Ok(())
}

impl GpuDevice for NullDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuBuffer, GpuError> {
        self.check_allocation()?;
        self.stats.borrow_mut().buffers_created += 1;

        let raw = NullBuffer {
            id: self.allocate_id(),
            data: RefCell::new(vec![0; desc.size as usize]),
            stats: self.stats.clone(),
        };
        Ok(GpuBuffer::from_raw(
            Box::new(raw),
            desc.label,
            desc.usage,
            desc.size,
        ))
    }

    fn create_buffer_init(
        &self,
        label: &str,
        usage: BufferUsages,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError> {
        self.check_allocation()?;
        self.stats.borrow_mut().buffers_created += 1;

        let raw = NullBuffer {
            id: self.allocate_id(),
            data: RefCell::new(contents.to_vec()),
            stats: self.stats.clone(),
        };
        Ok(GpuBuffer::from_raw(
            Box::new(raw),
            label,
            usage,
            contents.len() as u64,
        ))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, GpuError> {
        self.check_allocation()?;
        self.stats.borrow_mut().textures_created += 1;

        let raw = NullTexture {
            id: self.allocate_id(),
            stats: self.stats.clone(),
        };
        Ok(Arc::new(GpuTexture::from_raw(
            Box::new(raw),
            desc.label,
            desc.usage,
            desc.format,
            desc.width,
            desc.height,
            desc.depth_or_layers,
            desc.mip_levels,
        )))
    }

    fn create_texture_view(&self, texture: &Arc<GpuTexture>) -> GpuTextureView {
        self.create_texture_view_with_mips(texture, 0, texture.mip_levels())
    }

    fn create_texture_view_with_mips(
        &self,
        texture: &Arc<GpuTexture>,
        base_mip_level: u32,
        mip_levels: u32,
    ) -> GpuTextureView {
        let raw = NullTextureView {
            id: self.allocate_id(),
        };
        GpuTextureView::from_raw(Box::new(raw), texture.clone(), base_mip_level, mip_levels)
    }

    fn create_command_encoder(&self) -> Box<dyn CommandEncoder + '_> {
        Box::new(NullEncoder { device: self })
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.get()
    }
}

struct NullEncoder<'a> {
    device: &'a NullDevice,
}

impl CommandEncoder for NullEncoder<'_> {
    fn write_buffer(&mut self, dst: GpuBufferSlice<'_>, data: &[u8]) -> Result<(), GpuError> {
        require_open(dst.buffer())?;
        require_usage(dst.buffer(), BufferUsages::COPY_DST)?;
        if data.len() as u64 > dst.length() {
            return Err(GpuError::OutOfRange {
                offset: dst.offset(),
                length: data.len() as u64,
                bound: dst.length(),
            });
        }

        let offset = dst.offset() as usize;
        backing(dst.buffer()).data.borrow_mut()[offset..offset + data.len()]
            .copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: GpuBufferSlice<'_>,
        dst: GpuBufferSlice<'_>,
    ) -> Result<(), GpuError> {
        require_open(src.buffer())?;
        require_open(dst.buffer())?;
        require_usage(src.buffer(), BufferUsages::COPY_SRC)?;
        require_usage(dst.buffer(), BufferUsages::COPY_DST)?;
        if src.length() != dst.length() {
            return Err(GpuError::InvalidState(
                "buffer-to-buffer copies require equally sized slices",
            ));
        }

        let src_backing = backing(src.buffer());
        let dst_backing = backing(dst.buffer());
        let src_offset = src.offset() as usize;
        let dst_offset = dst.offset() as usize;
        let length = src.length() as usize;

        if src_backing.id == dst_backing.id {
            let mut data = dst_backing.data.borrow_mut();
            data.copy_within(src_offset..src_offset + length, dst_offset);
        } else {
            let src_data = src_backing.data.borrow();
            dst_backing.data.borrow_mut()[dst_offset..dst_offset + length]
                .copy_from_slice(&src_data[src_offset..src_offset + length]);
        }
        Ok(())
    }

    fn copy_texture_to_texture(
        &mut self,
        src: &GpuTexture,
        dst: &GpuTexture,
        _mip_level: u32,
        _width: u32,
        _height: u32,
    ) -> Result<(), GpuError> {
        for texture in [src, dst] {
            if texture.is_closed() {
                return Err(GpuError::Closed {
                    label: texture.label().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: &GpuTexture,
        dst: &GpuBuffer,
        offset: u64,
        mip_level: u32,
        on_complete: Box<dyn FnOnce() + 'static>,
    ) -> Result<(), GpuError> {
        require_open(dst)?;
        require_usage(dst, BufferUsages::COPY_DST)?;

        let needed = u64::from(src.width_at(mip_level))
            * u64::from(src.height_at(mip_level))
            * u64::from(src.format().bytes_per_texel());
        let fits = offset
            .checked_add(needed)
            .is_some_and(|end| end <= dst.size());
        if !fits {
            return Err(GpuError::OutOfRange {
                offset,
                length: needed,
                bound: dst.size(),
            });
        }

        // A real device would signal completion asynchronously; here the copy
        // is done by the time it is recorded.
        on_complete();
        Ok(())
    }

    fn clear_color_texture(&mut self, texture: &GpuTexture, _color: Color) -> Result<(), GpuError> {
        if texture.is_closed() {
            return Err(GpuError::Closed {
                label: texture.label().to_owned(),
            });
        }
        Ok(())
    }

    fn clear_color_and_depth_textures(
        &mut self,
        color_texture: &GpuTexture,
        color: Color,
        depth_texture: &GpuTexture,
        _depth: f32,
    ) -> Result<(), GpuError> {
        self.clear_color_texture(color_texture, color)?;
        if depth_texture.is_closed() {
            return Err(GpuError::Closed {
                label: depth_texture.label().to_owned(),
            });
        }
        Ok(())
    }

    fn begin_render_pass<'pass>(
        &'pass mut self,
        _label: &str,
        _color: &'pass GpuTextureView,
        _depth: Option<&'pass GpuTextureView>,
    ) -> Box<dyn RenderPass + 'pass> {
        Box::new(NullRenderPass {
            stats: self.device.stats.clone(),
        })
    }

    fn map_buffer<'a>(
        &mut self,
        slice: GpuBufferSlice<'a>,
        read: bool,
        write: bool,
    ) -> Result<Box<dyn MappedBuffer + 'a>, GpuError> {
        require_open(slice.buffer())?;
        if read {
            require_usage(slice.buffer(), BufferUsages::MAP_READ)?;
        }
        if write {
            require_usage(slice.buffer(), BufferUsages::MAP_WRITE)?;
        }

        let data = backing(slice.buffer()).data.borrow_mut();
        Ok(Box::new(NullMapped {
            data,
            offset: slice.offset() as usize,
            length: slice.length() as usize,
            write,
        }))
    }

    fn present_texture(&mut self, view: &GpuTextureView) -> Result<(), GpuError> {
        if view.texture().is_closed() {
            return Err(GpuError::Closed {
                label: view.texture().label().to_owned(),
            });
        }
        self.device.stats.borrow_mut().presents += 1;
        Ok(())
    }
}

struct NullRenderPass {
    stats: Rc<RefCell<NullDeviceStats>>,
}

impl RenderPass for NullRenderPass {
    fn set_pipeline(&mut self, _pipeline: &str) {}

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: &GpuBuffer) {}

    fn set_index_buffer(&mut self, _buffer: &GpuBuffer, _format: IndexFormat) {}

    fn bind_sampler(&mut self, _name: &str, _view: &GpuTextureView) {}

    fn bind_uniform(&mut self, _name: &str, _slice: GpuBufferSlice<'_>) {}

    fn draw_indexed(
        &mut self,
        _base_vertex: i32,
        _first_index: u32,
        _index_count: u32,
        _instance_count: u32,
    ) {
        self.stats.borrow_mut().draw_calls += 1;
    }
}

struct NullMapped<'a> {
    data: RefMut<'a, Vec<u8>>,
    offset: usize,
    length: usize,
    write: bool,
}

impl MappedBuffer for NullMapped<'_> {
    fn data(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        assert!(self.write, "the buffer was not mapped for writing");
        &mut self.data[self.offset..self.offset + self.length]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextureUsages;

    #[test]
    fn identifiers_are_sequential() {
        let device = NullDevice::new(16384);
        let a = device
            .create_buffer_init("a", BufferUsages::COPY_DST, &[0; 4])
            .unwrap();
        let b = device
            .create_buffer_init("b", BufferUsages::COPY_DST, &[0; 4])
            .unwrap();
        assert_eq!(a.raw().id() + 1, b.raw().id());
    }

    #[test]
    fn writes_require_the_copy_dst_usage() {
        let device = NullDevice::new(16384);
        let buffer = device
            .create_buffer_init("vertices", BufferUsages::VERTEX, &[0; 16])
            .unwrap();

        let mut encoder = device.create_command_encoder();
        let err = encoder
            .write_buffer(buffer.slice_all(), &[1; 16])
            .unwrap_err();
        assert!(matches!(err, GpuError::MissingBufferUsage { missing, .. }
            if missing == BufferUsages::COPY_DST));
    }

    #[test]
    fn closed_buffers_are_rejected() {
        let device = NullDevice::new(16384);
        let buffer = device
            .create_buffer_init("b", BufferUsages::COPY_DST, &[0; 16])
            .unwrap();
        buffer.close();

        let mut encoder = device.create_command_encoder();
        assert!(matches!(
            encoder.write_buffer(buffer.slice_all(), &[1; 16]),
            Err(GpuError::Closed { .. })
        ));
    }

    #[test]
    fn mapping_respects_the_access_flags() {
        let device = NullDevice::new(16384);
        let buffer = device
            .create_buffer_init(
                "m",
                BufferUsages::MAP_READ | BufferUsages::MAP_WRITE,
                &[3; 8],
            )
            .unwrap();

        let mut encoder = device.create_command_encoder();
        {
            let mut mapped = encoder
                .map_buffer(buffer.slice(2, 4).unwrap(), true, true)
                .unwrap();
            assert_eq!(mapped.data(), &[3; 4]);
            mapped.data_mut().fill(9);
        }

        assert_eq!(device.buffer_contents(&buffer), [3, 3, 9, 9, 9, 9, 3, 3]);

        let read_only = device
            .create_buffer_init("r", BufferUsages::MAP_READ, &[0; 8])
            .unwrap();
        assert!(encoder
            .map_buffer(read_only.slice_all(), true, true)
            .is_err());
    }

    #[test]
    fn forced_allocation_failure_is_out_of_memory() {
        let device = NullDevice::new(16384);
        device.fail_next_allocation();
        assert!(matches!(
            device.create_buffer(&BufferDescriptor {
                label: "late",
                usage: BufferUsages::UNIFORM,
                size: 64,
            }),
            Err(GpuError::OutOfDeviceMemory)
        ));

        // The flag is edge-triggered.
        assert!(device
            .create_buffer(&BufferDescriptor {
                label: "after",
                usage: BufferUsages::UNIFORM,
                size: 64,
            })
            .is_ok());
    }

    #[test]
    fn readback_callback_fires_at_record_time() {
        let device = NullDevice::new(16384);
        let texture = device
            .create_texture(&TextureDescriptor {
                label: "capture",
                usage: TextureUsages::COPY_SRC,
                format: crate::TextureFormat::Rgba8,
                width: 4,
                height: 4,
                depth_or_layers: 1,
                mip_levels: 1,
                stencil: false,
            })
            .unwrap();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: "readback",
                usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
                size: 4 * 4 * 4,
            })
            .unwrap();

        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let mut encoder = device.create_command_encoder();
        encoder
            .copy_texture_to_buffer(&texture, &buffer, 0, 0, Box::new(move || flag.set(true)))
            .unwrap();
        assert!(fired.get());

        // A buffer that cannot hold the texture is rejected up front.
        let small = device
            .create_buffer(&BufferDescriptor {
                label: "small",
                usage: BufferUsages::COPY_DST,
                size: 8,
            })
            .unwrap();
        assert!(encoder
            .copy_texture_to_buffer(&texture, &small, 0, 0, Box::new(|| ()))
            .is_err());
    }

    #[test]
    fn stats_track_the_resource_lifecycle() {
        let device = NullDevice::new(16384);
        let buffer = device
            .create_buffer_init("b", BufferUsages::VERTEX, &[0; 4])
            .unwrap();
        buffer.close();
        buffer.close();

        let stats = device.stats();
        assert_eq!(stats.buffers_created, 1);
        // Double-close destroys the backing resource once.
        assert_eq!(stats.buffers_destroyed, 1);
    }
}
