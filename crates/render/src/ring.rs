use crate::{BufferDescriptor, BufferUsages, GpuBuffer, GpuDevice, GpuError};

/// A fixed ring of identically sized buffers, rotated once per frame.
///
/// Mapping a buffer the GPU is still reading from stalls the pipeline, so
/// work that maps a buffer every frame (such as reading a rendered image back
/// to the CPU) writes into a different buffer each time and only maps the one
/// the GPU finished with a few frames ago. Two buffers are enough for a
/// one-frame latency; three cover drivers that buffer an extra frame.
pub struct MappableRingBuffer {
    /// The buffers of the ring, all sharing one size and usage mask.
    buffers: Vec<GpuBuffer>,
    /// The index of the current buffer.
    index: usize,
    /// The size of each buffer, in bytes.
    size: u64,
}

impl MappableRingBuffer {
    /// The ring depth to use when nothing suggests otherwise.
    pub const DEFAULT_COUNT: usize = 2;

    /// Creates a ring of `count` buffers of `size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn new(
        device: &dyn GpuDevice,
        label: &str,
        usage: BufferUsages,
        size: u64,
        count: usize,
    ) -> Result<Self, GpuError> {
        assert!(count > 0, "a ring needs at least one buffer");

        let buffers = (0..count)
            .map(|i| {
                device.create_buffer(&BufferDescriptor {
                    label: &format!("{label} / {i}"),
                    usage,
                    size,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            buffers,
            index: 0,
            size,
        })
    }

    /// The number of buffers in the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the ring contains no buffers (only true after [`close`]).
    ///
    /// [`close`]: MappableRingBuffer::close
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The size of each buffer in the ring, in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the current buffer.
    #[inline]
    pub fn current(&self) -> &GpuBuffer {
        &self.buffers[self.index]
    }

    /// Advances the ring and returns the new current buffer.
    pub fn rotate(&mut self) -> &GpuBuffer {
        self.index = (self.index + 1) % self.buffers.len();
        &self.buffers[self.index]
    }

    /// Releases every buffer of the ring.
    pub fn close(&mut self) {
        for buffer in self.buffers.drain(..) {
            buffer.close();
        }
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullDevice;

    #[test]
    fn rotation_visits_every_buffer_and_wraps() {
        let device = NullDevice::new(16384);
        let mut ring = MappableRingBuffer::new(
            &device,
            "capture",
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            256,
            3,
        )
        .unwrap();

        assert_eq!(ring.len(), 3);
        let first = ring.current().raw().id();
        let second = ring.rotate().raw().id();
        let third = ring.rotate().raw().id();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(ring.rotate().raw().id(), first);
    }

    #[test]
    fn buffers_share_size_and_usage() {
        let device = NullDevice::new(16384);
        let ring =
            MappableRingBuffer::new(&device, "capture", BufferUsages::MAP_READ, 64, 2).unwrap();

        assert_eq!(ring.size(), 64);
        assert_eq!(ring.current().size(), 64);
        assert_eq!(ring.current().usage(), BufferUsages::MAP_READ);
    }

    #[test]
    fn close_drains_the_ring() {
        let device = NullDevice::new(16384);
        let mut ring =
            MappableRingBuffer::new(&device, "capture", BufferUsages::MAP_READ, 64, 2).unwrap();

        ring.close();
        assert!(ring.is_empty());
    }
}
