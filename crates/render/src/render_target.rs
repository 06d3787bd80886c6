use std::sync::Arc;

use crate::{
    FilterMode, GpuError, GpuTexture, GpuTextureView, IndexFormat, RenderContext, TextureDescriptor,
    TextureFormat, TextureUsages,
};

/// The name of the pipeline used by [`RenderTarget::blit_and_blend_to`].
///
/// Backends register a pipeline under this name that draws the shared
/// full-screen quad, samples the bound color view, and alpha-blends it over
/// the current attachment.
pub const BLIT_PIPELINE: &str = "cobble/blit";

/// An offscreen framebuffer: a color texture and, optionally, a depth
/// texture, sized to a viewport.
///
/// A render target cycles between two states: *unallocated* (no attachment
/// exists) and *allocated*. [`create_buffers`] moves to the allocated state,
/// [`destroy_buffers`] back to unallocated, and [`resize`] is exactly the
/// latter followed by the former, so old contents are never preserved across
/// a resize.
///
/// [`create_buffers`]: RenderTarget::create_buffers
/// [`destroy_buffers`]: RenderTarget::destroy_buffers
/// [`resize`]: RenderTarget::resize
pub struct RenderTarget {
    /// The context this target allocates from.
    ctx: Arc<RenderContext>,
    /// The debug label of the target.
    label: String,
    /// Whether this target carries a depth attachment when allocated.
    use_depth: bool,
    /// Whether the depth attachment also carries stencil capability.
    stencil: bool,
    /// The filter mode applied to the color texture.
    filter: FilterMode,
    /// The width of the allocated textures, in pixels.
    width: u32,
    /// The height of the allocated textures, in pixels.
    height: u32,
    /// The width of the logical viewport, in pixels.
    ///
    /// This may differ from `width` transiently during a resize.
    view_width: u32,
    /// The height of the logical viewport, in pixels.
    view_height: u32,
    /// The color attachment, when allocated.
    color_texture: Option<Arc<GpuTexture>>,
    /// A view over the whole color attachment.
    color_texture_view: Option<GpuTextureView>,
    /// The depth attachment, when allocated and `use_depth` is set.
    ///
    /// Either both depth fields are populated or both are empty; the target
    /// is never partially constructed.
    depth_texture: Option<Arc<GpuTexture>>,
    /// A view over the whole depth attachment.
    depth_texture_view: Option<GpuTextureView>,
}

impl RenderTarget {
    /// Creates a new, unallocated [`RenderTarget`].
    pub fn new(ctx: Arc<RenderContext>, label: impl Into<String>, use_depth: bool) -> Self {
        Self {
            ctx,
            label: label.into(),
            use_depth,
            stencil: false,
            filter: FilterMode::default(),
            width: 0,
            height: 0,
            view_width: 0,
            view_height: 0,
            color_texture: None,
            color_texture_view: None,
            depth_texture: None,
            depth_texture_view: None,
        }
    }

    /// Returns the debug label of this target.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The width of the allocated textures, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The height of the allocated textures, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The width of the logical viewport, in pixels.
    #[inline]
    pub fn view_width(&self) -> u32 {
        self.view_width
    }

    /// The height of the logical viewport, in pixels.
    #[inline]
    pub fn view_height(&self) -> u32 {
        self.view_height
    }

    /// Whether this target carries a depth attachment when allocated.
    #[inline]
    pub fn use_depth(&self) -> bool {
        self.use_depth
    }

    /// Whether the depth attachment carries stencil capability.
    #[inline]
    pub fn is_stencil_enabled(&self) -> bool {
        self.stencil
    }

    /// Returns the color attachment, if allocated.
    #[inline]
    pub fn color_texture(&self) -> Option<&Arc<GpuTexture>> {
        self.color_texture.as_ref()
    }

    /// Returns the view over the color attachment, if allocated.
    #[inline]
    pub fn color_texture_view(&self) -> Option<&GpuTextureView> {
        self.color_texture_view.as_ref()
    }

    /// Returns the depth attachment, if allocated.
    #[inline]
    pub fn depth_texture(&self) -> Option<&Arc<GpuTexture>> {
        self.depth_texture.as_ref()
    }

    /// Returns the view over the depth attachment, if allocated.
    #[inline]
    pub fn depth_texture_view(&self) -> Option<&GpuTextureView> {
        self.depth_texture_view.as_ref()
    }

    /// Allocates the color (and, when `use_depth` is set, depth) attachment
    /// at the given size.
    ///
    /// Fails with [`GpuError::UnsupportedSize`] when either dimension is zero
    /// or exceeds the maximum texture dimension reported by the device; the
    /// error carries both the offending size and the device maximum.
    #[profiling::function]
    pub fn create_buffers(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        let max = self.ctx.max_texture_size();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::UnsupportedSize { width, height, max });
        }

        self.view_width = width;
        self.view_height = height;

        let device = self.ctx.device();

        let color = device.create_texture(&TextureDescriptor {
            label: &format!("{} / color", self.label),
            usage: TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
            format: TextureFormat::Rgba8,
            width,
            height,
            depth_or_layers: 1,
            mip_levels: 1,
            stencil: false,
        })?;
        color.set_filter(self.filter, false);

        let depth = if self.use_depth {
            let depth = device.create_texture(&TextureDescriptor {
                label: &format!("{} / depth", self.label),
                usage: TextureUsages::RENDER_ATTACHMENT
                    | TextureUsages::COPY_SRC
                    | TextureUsages::COPY_DST,
                format: TextureFormat::Depth32,
                width,
                height,
                depth_or_layers: 1,
                mip_levels: 1,
                stencil: self.stencil,
            });

            // Keep the "fully allocated or fully unallocated" invariant: a
            // failed depth allocation must not leave a dangling color
            // attachment behind.
            match depth {
                Ok(depth) => Some(depth),
                Err(err) => {
                    color.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        self.color_texture_view = Some(device.create_texture_view(&color));
        self.color_texture = Some(color);
        if let Some(depth) = depth {
            self.depth_texture_view = Some(device.create_texture_view(&depth));
            self.depth_texture = Some(depth);
        }

        self.width = width;
        self.height = height;

        cobble_log::trace!(
            "allocated render target `{}` at {width}x{height} (depth: {}, stencil: {})",
            self.label,
            self.use_depth,
            self.stencil,
        );

        Ok(())
    }

    /// Releases every attachment of this target.
    ///
    /// Safe to call when already unallocated: each of the four fields is
    /// checked individually.
    pub fn destroy_buffers(&mut self) {
        if let Some(view) = self.color_texture_view.take() {
            drop(view);
        }
        if let Some(texture) = self.color_texture.take() {
            cobble_log::trace!("releasing render target `{}`", self.label);
            texture.close();
        }
        if let Some(view) = self.depth_texture_view.take() {
            drop(view);
        }
        if let Some(texture) = self.depth_texture.take() {
            texture.close();
        }
    }

    /// Re-allocates the attachments at a new size.
    ///
    /// This is exactly `destroy_buffers()` followed by `create_buffers(width,
    /// height)`: the old contents are discarded, and during the call the
    /// target has no attachments.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        self.destroy_buffers();
        self.create_buffers(width, height)
    }

    /// Adds stencil capability to the depth attachment.
    ///
    /// When stencil was not already enabled and the target is allocated,
    /// this performs a full destroy+recreate at the current viewport size,
    /// since the capability is part of the depth texture's creation
    /// parameters.
    pub fn enable_stencil(&mut self) -> Result<(), GpuError> {
        if self.stencil {
            return Ok(());
        }
        self.stencil = true;

        if self.color_texture.is_some() {
            self.resize(self.view_width, self.view_height)
        } else {
            Ok(())
        }
    }

    /// Copies the full depth attachment of `other` into this target's depth
    /// attachment.
    ///
    /// Fails with [`GpuError::InvalidState`] when either target lacks a depth
    /// attachment.
    pub fn copy_depth_from(&mut self, other: &RenderTarget) -> Result<(), GpuError> {
        let (Some(dst), Some(src)) = (&self.depth_texture, &other.depth_texture) else {
            return Err(GpuError::InvalidState(
                "copying depth requires both render targets to have a depth attachment",
            ));
        };

        let mut encoder = self.ctx.device().create_command_encoder();
        encoder.copy_texture_to_texture(src, dst, 0, src.width_at(0), src.height_at(0))
    }

    /// Presents the color attachment to the display surface.
    ///
    /// Fails with [`GpuError::InvalidState`] when the target is unallocated.
    pub fn blit_to_screen(&self) -> Result<(), GpuError> {
        let Some(view) = &self.color_texture_view else {
            return Err(GpuError::InvalidState(
                "blitting an unallocated render target to the screen",
            ));
        };

        let mut encoder = self.ctx.device().create_command_encoder();
        encoder.present_texture(view)
    }

    /// Draws this target's color attachment over `target` as a full-screen
    /// quad, alpha-blending it with whatever is already there.
    ///
    /// Fails with [`GpuError::InvalidState`] when this target is unallocated.
    pub fn blit_and_blend_to(&self, target: &GpuTextureView) -> Result<(), GpuError> {
        let Some(view) = &self.color_texture_view else {
            return Err(GpuError::InvalidState(
                "blitting an unallocated render target",
            ));
        };

        let mut encoder = self.ctx.device().create_command_encoder();
        {
            let mut pass = encoder.begin_render_pass("render target blit", target, None);
            pass.set_pipeline(BLIT_PIPELINE);
            pass.set_vertex_buffer(0, self.ctx.quad_vertices());
            pass.set_index_buffer(self.ctx.quad_indices(), IndexFormat::Uint16);
            pass.bind_sampler("color_sampler", view);
            pass.draw_indexed(0, 0, 6, 1);
        }

        Ok(())
    }

    /// Changes the filter mode of the color attachment.
    ///
    /// Setting the mode the target already has is a no-op, even when the
    /// target is unallocated. Otherwise, fails with
    /// [`GpuError::InvalidState`] when the color attachment is absent.
    pub fn set_filter_mode(&mut self, mode: FilterMode) -> Result<(), GpuError> {
        self.set_filter_mode_inner(mode, false)
    }

    /// Like [`set_filter_mode`], but re-applies the sampler state even when
    /// the mode is unchanged.
    ///
    /// [`set_filter_mode`]: RenderTarget::set_filter_mode
    pub fn set_filter_mode_forced(&mut self, mode: FilterMode) -> Result<(), GpuError> {
        self.set_filter_mode_inner(mode, true)
    }

    fn set_filter_mode_inner(&mut self, mode: FilterMode, force: bool) -> Result<(), GpuError> {
        if mode == self.filter && !force {
            return Ok(());
        }

        let Some(color) = &self.color_texture else {
            return Err(GpuError::InvalidState(
                "changing the filter mode of an unallocated render target",
            ));
        };

        color.set_filter(mode, false);
        self.filter = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullDevice;

    fn context() -> Arc<RenderContext> {
        let device = Arc::new(NullDevice::new(16384));
        Arc::new(RenderContext::new(device).unwrap())
    }

    #[test]
    fn create_then_destroy_leaves_no_attachment() {
        let mut target = RenderTarget::new(context(), "main", true);

        target.create_buffers(256, 256).unwrap();
        assert!(target.color_texture().is_some());
        assert!(target.color_texture_view().is_some());
        assert!(target.depth_texture().is_some());
        assert!(target.depth_texture_view().is_some());
        assert!(!target.is_stencil_enabled());

        target.destroy_buffers();
        assert!(target.color_texture().is_none());
        assert!(target.color_texture_view().is_none());
        assert!(target.depth_texture().is_none());
        assert!(target.depth_texture_view().is_none());
        assert!(!target.is_stencil_enabled());

        // Destroying an unallocated target is fine.
        target.destroy_buffers();
    }

    #[test]
    fn depth_attachment_shape() {
        let mut target = RenderTarget::new(context(), "main", true);
        target.create_buffers(256, 256).unwrap();

        let depth = target.depth_texture().unwrap();
        assert_eq!(depth.format(), TextureFormat::Depth32);
        assert_eq!(depth.width_at(0), 256);
        assert_eq!(depth.height_at(0), 256);
    }

    #[test]
    fn no_depth_when_disabled() {
        let mut target = RenderTarget::new(context(), "overlay", false);
        target.create_buffers(64, 64).unwrap();
        assert!(target.color_texture().is_some());
        assert!(target.depth_texture().is_none());
        assert!(target.depth_texture_view().is_none());
    }

    #[test]
    fn oversized_allocation_is_rejected_with_both_numbers() {
        let mut target = RenderTarget::new(context(), "main", true);

        let err = target.create_buffers(20000, 20000).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("20000"), "{message}");
        assert!(message.contains("16384"), "{message}");

        assert!(target.create_buffers(0, 256).is_err());
        assert!(target.create_buffers(256, 0).is_err());
    }

    #[test]
    fn resize_equals_destroy_then_create() {
        let ctx = context();

        let mut resized = RenderTarget::new(ctx.clone(), "a", true);
        resized.create_buffers(128, 128).unwrap();
        resized.resize(64, 32).unwrap();

        let mut manual = RenderTarget::new(ctx, "b", true);
        manual.create_buffers(128, 128).unwrap();
        manual.destroy_buffers();
        manual.create_buffers(64, 32).unwrap();

        assert_eq!(resized.width(), manual.width());
        assert_eq!(resized.height(), manual.height());
        assert_eq!(resized.view_width(), manual.view_width());
        assert_eq!(resized.use_depth(), manual.use_depth());
    }

    #[test]
    fn enabling_stencil_recreates_the_attachments() {
        let mut target = RenderTarget::new(context(), "main", true);
        target.create_buffers(100, 50).unwrap();
        let old_id = target.depth_texture().unwrap().raw().id();

        target.enable_stencil().unwrap();
        assert!(target.is_stencil_enabled());
        let new_id = target.depth_texture().unwrap().raw().id();
        assert_ne!(old_id, new_id);
        assert_eq!(target.width(), 100);
        assert_eq!(target.height(), 50);

        // Enabling it again is a no-op.
        let id_again = target.depth_texture().unwrap().raw().id();
        target.enable_stencil().unwrap();
        assert_eq!(target.depth_texture().unwrap().raw().id(), id_again);
    }

    #[test]
    fn copy_depth_requires_both_sides() {
        let ctx = context();
        let mut with_depth = RenderTarget::new(ctx.clone(), "a", true);
        with_depth.create_buffers(32, 32).unwrap();
        let mut without = RenderTarget::new(ctx, "b", false);
        without.create_buffers(32, 32).unwrap();

        assert!(matches!(
            without.copy_depth_from(&with_depth),
            Err(GpuError::InvalidState(_))
        ));

        let mut other = RenderTarget::new(with_depth.ctx.clone(), "c", true);
        other.create_buffers(32, 32).unwrap();
        with_depth.copy_depth_from(&other).unwrap();
    }

    #[test]
    fn filter_mode_is_idempotent_by_value() {
        let mut target = RenderTarget::new(context(), "main", false);

        // Unallocated, but the value is unchanged: no-op, not an error.
        target.set_filter_mode(FilterMode::Nearest).unwrap();

        // Unallocated and the value changes: state error.
        assert!(target.set_filter_mode(FilterMode::Linear).is_err());

        target.create_buffers(16, 16).unwrap();
        target.set_filter_mode(FilterMode::Linear).unwrap();
        let sampler = target.color_texture().unwrap().sampler();
        assert_eq!(sampler.min_filter, FilterMode::Linear);
    }

    #[test]
    fn blit_requires_an_allocation() {
        let target = RenderTarget::new(context(), "main", false);
        assert!(matches!(
            target.blit_to_screen(),
            Err(GpuError::InvalidState(_))
        ));
    }
}
