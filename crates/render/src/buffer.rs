use std::cell::Cell;

use bitflags::bitflags;

use crate::{GpuError, RawBuffer};

bitflags! {
    /// The ways in which a [`GpuBuffer`] may be used.
    ///
    /// The bits are independent and freely combinable; nothing in this layer
    /// relies on their numeric values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct BufferUsages: u32 {
        /// The buffer may be mapped for reading by the CPU.
        const MAP_READ = 1 << 0;
        /// The buffer may be mapped for writing by the CPU.
        const MAP_WRITE = 1 << 1;
        /// Hint that the buffer's content is better kept in client memory.
        const HINT_CLIENT_STORAGE = 1 << 2;
        /// The buffer may be the destination of a copy or write operation.
        const COPY_DST = 1 << 3;
        /// The buffer may be the source of a copy operation.
        const COPY_SRC = 1 << 4;
        /// The buffer may be bound as a vertex buffer.
        const VERTEX = 1 << 5;
        /// The buffer may be bound as an index buffer.
        const INDEX = 1 << 6;
        /// The buffer may be bound as a uniform buffer.
        const UNIFORM = 1 << 7;
        /// The buffer may be bound as a uniform texel buffer.
        const UNIFORM_TEXEL = 1 << 8;
    }
}

/// A byte range living on the GPU.
///
/// Buffers are created through [`GpuDevice::create_buffer`] and are not
/// resizable in place: a buffer that needs to grow is closed and replaced by
/// a larger one.
///
/// [`GpuDevice::create_buffer`]: crate::GpuDevice::create_buffer
pub struct GpuBuffer {
    /// The backend handle of the buffer.
    raw: Box<dyn RawBuffer>,
    /// The debug label of the buffer.
    label: String,
    /// The usage mask the buffer was created with.
    usage: BufferUsages,
    /// The size of the buffer, in bytes.
    size: u64,
    /// Whether `close` has been called.
    closed: Cell<bool>,
}

impl GpuBuffer {
    /// Wraps a backend buffer handle.
    ///
    /// This is meant to be called by [`GpuDevice`] implementations, not by
    /// users of the resource layer.
    ///
    /// [`GpuDevice`]: crate::GpuDevice
    pub fn from_raw(
        raw: Box<dyn RawBuffer>,
        label: impl Into<String>,
        usage: BufferUsages,
        size: u64,
    ) -> Self {
        Self {
            raw,
            label: label.into(),
            usage,
            size,
            closed: Cell::new(false),
        }
    }

    /// Returns the debug label of this buffer.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the usage mask this buffer was created with.
    #[inline]
    pub fn usage(&self) -> BufferUsages {
        self.usage
    }

    /// Returns the size of this buffer, in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the backend handle of this buffer.
    #[inline]
    pub fn raw(&self) -> &dyn RawBuffer {
        &*self.raw
    }

    /// Returns a [`GpuBufferSlice`] covering the byte range
    /// `offset..offset + length` of this buffer.
    ///
    /// Fails with [`GpuError::OutOfRange`] when the range does not fit in the
    /// buffer.
    pub fn slice(&self, offset: u64, length: u64) -> Result<GpuBufferSlice<'_>, GpuError> {
        let ok = offset
            .checked_add(length)
            .is_some_and(|end| end <= self.size);
        if !ok {
            return Err(GpuError::OutOfRange {
                offset,
                length,
                bound: self.size,
            });
        }

        Ok(GpuBufferSlice {
            buffer: self,
            offset,
            length,
        })
    }

    /// Returns a [`GpuBufferSlice`] covering the whole buffer.
    #[inline]
    pub fn slice_all(&self) -> GpuBufferSlice<'_> {
        GpuBufferSlice {
            buffer: self,
            offset: 0,
            length: self.size,
        }
    }

    /// Releases the device memory backing this buffer.
    ///
    /// Closing an already-closed buffer is a no-op. Any other operation on a
    /// closed buffer is rejected by the command encoder.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            self.raw.destroy();
        }
    }

    /// Whether [`close`] has been called on this buffer.
    ///
    /// [`close`]: GpuBuffer::close
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// A non-owning view over a contiguous byte range of a [`GpuBuffer`].
///
/// A slice borrows the buffer it was created from and therefore cannot
/// outlive it.
#[derive(Clone, Copy)]
pub struct GpuBufferSlice<'a> {
    buffer: &'a GpuBuffer,
    offset: u64,
    length: u64,
}

impl<'a> GpuBufferSlice<'a> {
    /// Returns the buffer this slice is a view of.
    #[inline]
    pub fn buffer(&self) -> &'a GpuBuffer {
        self.buffer
    }

    /// Returns the offset of this slice within the underlying buffer, in
    /// bytes.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the length of this slice, in bytes.
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns a sub-slice of this slice.
    ///
    /// `offset` is relative to the start of *this slice*, not to the start of
    /// the underlying buffer, and the range is validated against this slice's
    /// own length. Note that the sub-range must end strictly *inside* this
    /// slice: `offset + length == self.length()` is rejected, so a sub-slice
    /// can never reach the last byte of its parent.
    pub fn slice(&self, offset: u64, length: u64) -> Result<GpuBufferSlice<'a>, GpuError> {
        let ok = offset
            .checked_add(length)
            .is_some_and(|end| end < self.length);
        if !ok {
            return Err(GpuError::OutOfRange {
                offset,
                length,
                bound: self.length,
            });
        }

        Ok(GpuBufferSlice {
            buffer: self.buffer,
            offset: self.offset + offset,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferDescriptor, GpuDevice, NullDevice};

    fn buffer(size: u64) -> GpuBuffer {
        NullDevice::new(16384)
            .create_buffer(&BufferDescriptor {
                label: "test buffer",
                usage: BufferUsages::COPY_DST,
                size,
            })
            .unwrap()
    }

    #[test]
    fn slice_within_bounds() {
        let buf = buffer(64);

        let slice = buf.slice(16, 32).unwrap();
        assert_eq!(slice.offset(), 16);
        assert_eq!(slice.length(), 32);

        // The full range is a valid slice.
        let slice = buf.slice(0, 64).unwrap();
        assert_eq!(slice.length(), 64);

        // So is an empty one at the very end.
        assert!(buf.slice(64, 0).is_ok());
    }

    #[test]
    fn slice_out_of_bounds() {
        let buf = buffer(64);

        assert!(matches!(
            buf.slice(60, 8),
            Err(GpuError::OutOfRange {
                offset: 60,
                length: 8,
                bound: 64,
            })
        ));
        assert!(buf.slice(65, 0).is_err());
        assert!(buf.slice(u64::MAX, 2).is_err());
    }

    #[test]
    fn subslice_rebases_against_the_slice() {
        let buf = buffer(64);
        let slice = buf.slice(16, 32).unwrap();

        let sub = slice.slice(8, 4).unwrap();
        assert_eq!(sub.offset(), 24);
        assert_eq!(sub.length(), 4);
    }

    #[test]
    fn subslice_upper_bound_is_exclusive() {
        let buf = buffer(64);
        let slice = buf.slice(0, 32).unwrap();

        // A sub-slice may not reach the last byte of its parent, even though
        // the equivalent range would be accepted by `GpuBuffer::slice`.
        assert!(slice.slice(0, 31).is_ok());
        assert!(slice.slice(0, 32).is_err());
        assert!(slice.slice(16, 16).is_err());
        assert!(slice.slice(33, 0).is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let buf = buffer(8);
        assert!(!buf.is_closed());
        buf.close();
        assert!(buf.is_closed());
        buf.close();
        assert!(buf.is_closed());
    }
}
