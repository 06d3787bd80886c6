use std::cell::RefCell;
use std::sync::Arc;

use crate::{
    BufferUsages, CommandEncoder, DeviceCapabilities, GpuBuffer, GpuDevice, GpuError,
};

/// The behavioral branches taken to work around known driver bugs.
///
/// These are not errors: they silently select an alternative code path in the
/// immediate-mode upload machinery. The policy is computed once at renderer
/// startup from the platform fingerprint and the device capability flags, and
/// injected wherever it is needed, which keeps the workaround paths testable
/// with a substitute policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct GpuWorkarounds {
    /// Always close and re-create immediate-mode buffers instead of
    /// overwriting them in place.
    pub always_fresh_immediate_buffers: bool,
    /// Route immediate-mode buffer writes through a shared staging buffer
    /// instead of writing to the destination directly.
    pub staged_immediate_uploads: bool,
}

impl GpuWorkarounds {
    /// The empty policy: no workaround is active.
    pub const fn none() -> Self {
        Self {
            always_fresh_immediate_buffers: false,
            staged_immediate_uploads: false,
        }
    }

    /// Computes the policy for the current platform and the provided device
    /// capabilities.
    pub fn detect(caps: &DeviceCapabilities) -> Self {
        // Some Windows-on-ARM drivers corrupt small direct writes into a
        // buffer that is bound in the same frame; routing the write through a
        // staging copy avoids the bug.
        let staged = cfg!(all(target_os = "windows", target_arch = "aarch64"));

        Self {
            always_fresh_immediate_buffers: caps.prefer_fresh_immediate_buffers,
            staged_immediate_uploads: staged,
        }
    }
}

/// The shared state of the renderer: the device connection, the workaround
/// policy, and the small set of GPU resources that are shared between
/// components (the full-screen quad used by blits, and the staging buffer
/// used by the immediate-mode upload workaround).
///
/// A [`RenderContext`] is created once at renderer startup and closed at
/// shutdown.
pub struct RenderContext {
    /// The device this context allocates from.
    device: Arc<dyn GpuDevice>,
    /// The workaround policy in effect.
    workarounds: GpuWorkarounds,
    /// The maximum texture dimension reported by the device.
    max_texture_size: u32,
    /// Four corners of a full-screen quad, as two 32-bit floats each.
    quad_vertices: GpuBuffer,
    /// The six 16-bit indices of a full-screen quad.
    quad_indices: GpuBuffer,
    /// The staging buffer shared by every immediate-mode upload that takes
    /// the staged path. Grown on demand, never shrunk.
    staging: RefCell<Option<GpuBuffer>>,
}

impl RenderContext {
    /// Creates a new [`RenderContext`], detecting the workaround policy from
    /// the platform and the device capabilities.
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self, GpuError> {
        let workarounds = GpuWorkarounds::detect(&device.capabilities());
        Self::with_workarounds(device, workarounds)
    }

    /// Creates a new [`RenderContext`] with an explicit workaround policy.
    pub fn with_workarounds(
        device: Arc<dyn GpuDevice>,
        workarounds: GpuWorkarounds,
    ) -> Result<Self, GpuError> {
        cobble_log::info!(
            "graphics workarounds: fresh immediate buffers: {}, staged uploads: {}",
            workarounds.always_fresh_immediate_buffers,
            workarounds.staged_immediate_uploads,
        );

        let quad_vertices: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0];
        let quad_indices: [u16; 6] = [0, 1, 2, 2, 3, 0];

        let quad_vertices = device.create_buffer_init(
            "shared quad vertices",
            BufferUsages::VERTEX,
            bytemuck::cast_slice(&quad_vertices),
        )?;
        let quad_indices = device.create_buffer_init(
            "shared quad indices",
            BufferUsages::INDEX,
            bytemuck::cast_slice(&quad_indices),
        )?;

        let max_texture_size = device.max_texture_size();

        Ok(Self {
            device,
            workarounds,
            max_texture_size,
            quad_vertices,
            quad_indices,
            staging: RefCell::new(None),
        })
    }

    /// Returns the device this context allocates from.
    #[inline]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Returns the workaround policy in effect.
    #[inline]
    pub fn workarounds(&self) -> GpuWorkarounds {
        self.workarounds
    }

    /// Returns the maximum texture dimension reported by the device.
    #[inline]
    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    /// Returns the shared full-screen quad vertex buffer.
    #[inline]
    pub fn quad_vertices(&self) -> &GpuBuffer {
        &self.quad_vertices
    }

    /// Returns the shared full-screen quad index buffer.
    #[inline]
    pub fn quad_indices(&self) -> &GpuBuffer {
        &self.quad_indices
    }

    /// Writes `data` into `dst` through the shared staging buffer instead of
    /// directly, growing the staging buffer when it is too small.
    pub(crate) fn write_through_staging(
        &self,
        encoder: &mut dyn CommandEncoder,
        dst: &GpuBuffer,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let needed = data.len() as u64;
        let mut slot = self.staging.borrow_mut();

        if slot.as_ref().map_or(true, |b| b.size() < needed) {
            if let Some(old) = slot.take() {
                old.close();
            }
            cobble_log::trace!("growing the shared staging buffer to {needed} bytes");
            *slot = Some(self.device.create_buffer_init(
                "shared upload staging",
                BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
                data,
            )?);
        } else if let Some(staging) = slot.as_ref() {
            encoder.write_buffer(staging.slice(0, needed)?, data)?;
        }

        if let Some(staging) = slot.as_ref() {
            encoder.copy_buffer_to_buffer(staging.slice(0, needed)?, dst.slice(0, needed)?)?;
        }

        Ok(())
    }

    /// Releases the GPU resources owned by this context.
    pub fn close(&self) {
        self.quad_vertices.close();
        self.quad_indices.close();
        if let Some(staging) = self.staging.borrow_mut().take() {
            staging.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullDevice;

    #[test]
    fn detect_honors_the_device_capability_flag() {
        let caps = DeviceCapabilities {
            prefer_fresh_immediate_buffers: true,
        };
        assert!(GpuWorkarounds::detect(&caps).always_fresh_immediate_buffers);
        assert!(!GpuWorkarounds::detect(&DeviceCapabilities::default())
            .always_fresh_immediate_buffers);
    }

    #[test]
    fn context_owns_the_shared_quad() {
        let device = Arc::new(NullDevice::new(16384));
        let ctx = RenderContext::new(device.clone()).unwrap();

        assert_eq!(ctx.quad_vertices().size(), 8 * 4);
        assert_eq!(ctx.quad_indices().size(), 6 * 2);
        assert_eq!(ctx.max_texture_size(), 16384);

        ctx.close();
        assert!(ctx.quad_vertices().is_closed());
        assert!(ctx.quad_indices().is_closed());
    }
}
