use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::{
    BufferUsages, Color, FilterMode, GpuBuffer, GpuBufferSlice, GpuError, GpuTexture,
    GpuTextureView, RenderContext, RenderPass, Std140Builder, TextureDescriptor, TextureFormat,
    TextureUsages,
};

/// The screen-space placement of a piece of offscreen-rendered content.
///
/// Implemented by the per-frame state objects that GUI code hands to an
/// [`OffscreenRenderer`]: a screen rectangle, a content scale, and the pose
/// the 3-D content should be drawn in.
pub trait OffscreenRenderState {
    /// The left edge of the destination rectangle, in logical GUI units.
    fn x0(&self) -> i32;
    /// The top edge of the destination rectangle, in logical GUI units.
    fn y0(&self) -> i32;
    /// The right edge of the destination rectangle, in logical GUI units.
    fn x1(&self) -> i32;
    /// The bottom edge of the destination rectangle, in logical GUI units.
    fn y1(&self) -> i32;

    /// The scale applied to the content, on top of the GUI scale.
    fn scale(&self) -> f32;

    /// The pose of the content.
    fn pose(&self) -> Mat4;

    /// An optional scissor rectangle the blit must be clipped to, in logical
    /// GUI units.
    fn scissor(&self) -> Option<[i32; 4]> {
        None
    }
}

/// A kind of 3-D content that can be rendered offscreen and composited into
/// the GUI: an entity, a book, a player skin.
///
/// Each implementation supplies its per-frame state type, a draw callback,
/// and a short label used to name the cached texture.
pub trait OffscreenContent {
    /// The per-frame state this content is drawn from.
    type State: OffscreenRenderState;

    /// A short label naming the cached texture in debug tooling.
    fn texture_label(&self) -> &str;

    /// A vertical offset applied to the content before the pose, in pixels.
    fn translate_y(&self) -> f32 {
        0.0
    }

    /// Whether the texture rendered for the previous frame can be blitted
    /// again without re-rendering.
    ///
    /// Only consulted when the cached texture's dimensions already match.
    /// The default re-renders every frame; content that knows its input did
    /// not change may override this to skip the offscreen pass entirely.
    fn ready_to_blit(&self, _state: &Self::State) -> bool {
        false
    }

    /// Draws the content into the offscreen pass.
    ///
    /// `transform` positions the content at the center of the offscreen
    /// texture, already scaled; `projection` is a uniform slice holding the
    /// orthographic projection sized to that texture.
    fn render(
        &mut self,
        state: &Self::State,
        pass: &mut dyn RenderPass,
        transform: &Mat4,
        projection: GpuBufferSlice<'_>,
    ) -> Result<(), GpuError>;
}

/// The 2-D layer that composited results are handed to.
///
/// The GUI renderer implements this; [`OffscreenRenderer::prepare`] calls it
/// exactly once per invocation with the view to sample and the destination
/// rectangle.
pub trait GuiBlitSink {
    /// Records a textured quad covering `x0..x1` × `y0..y1` (in logical GUI
    /// units), sampling `view`, optionally clipped by `scissor`.
    ///
    /// `premultiplied_alpha` is always set by the offscreen path: the
    /// offscreen pass renders onto transparent black, which leaves the color
    /// channels premultiplied.
    #[allow(clippy::too_many_arguments)]
    fn blit_textured_quad(
        &mut self,
        view: &GpuTextureView,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        scissor: Option<[i32; 4]>,
        premultiplied_alpha: bool,
    );
}

/// The cached allocation of an [`OffscreenRenderer`].
///
/// Either every field is populated or the cache slot is empty; the cache is
/// never partially constructed.
struct CacheEntry {
    color: Arc<GpuTexture>,
    color_view: GpuTextureView,
    depth: Arc<GpuTexture>,
    depth_view: GpuTextureView,
    width: u32,
    height: u32,
}

impl CacheEntry {
    fn close(self) {
        drop(self.color_view);
        drop(self.depth_view);
        self.color.close();
        self.depth.close();
    }
}

/// Renders a piece of 3-D content into a cached offscreen texture and
/// composites the result into the 2-D GUI layer.
///
/// The cache is keyed by required pixel dimensions only: when two consecutive
/// frames need the same size, the same color and depth textures are reused
/// (and, when the content reports [`ready_to_blit`], the offscreen pass is
/// skipped entirely). Any size change tears the whole allocation down and
/// re-creates it; there is no in-place resizing and no partial reuse.
///
/// [`ready_to_blit`]: OffscreenContent::ready_to_blit
pub struct OffscreenRenderer<C: OffscreenContent> {
    /// The context this renderer allocates from.
    ctx: Arc<RenderContext>,
    /// The content drawn by this renderer.
    content: C,
    /// The cached textures, when a frame has been rendered.
    cache: Option<CacheEntry>,
    /// The uniform buffer holding the orthographic projection.
    projection: Option<GpuBuffer>,
}

impl<C: OffscreenContent> OffscreenRenderer<C> {
    /// Creates a new [`OffscreenRenderer`] with an empty cache.
    pub fn new(ctx: Arc<RenderContext>, content: C) -> Self {
        Self {
            ctx,
            content,
            cache: None,
            projection: None,
        }
    }

    /// Returns the content drawn by this renderer.
    #[inline]
    pub fn content(&self) -> &C {
        &self.content
    }

    /// Returns the cached color view, if a frame has been rendered.
    #[inline]
    pub fn cached_view(&self) -> Option<&GpuTextureView> {
        self.cache.as_ref().map(|entry| &entry.color_view)
    }

    /// Renders the content (unless the cache can be reused as-is) and records
    /// the composited quad into `gui`.
    ///
    /// # Panics
    ///
    /// Panics if the state's rectangle, scaled by `gui_scale`, has a zero or
    /// negative pixel area. That is a caller bug, not a runtime condition.
    #[profiling::function]
    pub fn prepare(
        &mut self,
        state: &C::State,
        gui: &mut dyn GuiBlitSink,
        gui_scale: f32,
    ) -> Result<(), GpuError> {
        let logical_w = state.x1() - state.x0();
        let logical_h = state.y1() - state.y0();
        let width = (logical_w as f32 * gui_scale) as i32;
        let height = (logical_h as f32 * gui_scale) as i32;
        assert!(
            width > 0 && height > 0,
            "offscreen content `{}` computed a {width}x{height} pixel area",
            self.content.texture_label(),
        );
        let (width, height) = (width as u32, height as u32);

        let cache_hit = self
            .cache
            .as_ref()
            .is_some_and(|entry| entry.width == width && entry.height == height);

        if !cache_hit {
            if let Some(entry) = self.cache.take() {
                entry.close();
            }
            self.cache = Some(self.allocate(width, height)?);
        }

        if !cache_hit || !self.content.ready_to_blit(state) {
            self.render_offscreen(state, gui_scale)?;
        }

        // `allocate` ran above whenever the slot was empty.
        if let Some(entry) = self.cache.as_ref() {
            gui.blit_textured_quad(
                &entry.color_view,
                state.x0(),
                state.y0(),
                state.x1(),
                state.y1(),
                state.scissor(),
                true,
            );
        }

        Ok(())
    }

    /// Allocates a color and depth texture pair sized `width`×`height`.
    fn allocate(&self, width: u32, height: u32) -> Result<CacheEntry, GpuError> {
        let device = self.ctx.device();
        let label = self.content.texture_label();

        cobble_log::trace!("allocating {width}x{height} offscreen textures for `{label}`");

        let color = device.create_texture(&TextureDescriptor {
            label: &format!("{label} / offscreen color"),
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            format: TextureFormat::Rgba8,
            width,
            height,
            depth_or_layers: 1,
            mip_levels: 1,
            stencil: false,
        })?;
        color.set_filter(FilterMode::Nearest, false);

        let depth = device.create_texture(&TextureDescriptor {
            label: &format!("{label} / offscreen depth"),
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: TextureFormat::Depth32,
            width,
            height,
            depth_or_layers: 1,
            mip_levels: 1,
            stencil: false,
        });

        // A failed depth allocation must not leave the color texture behind.
        let depth = match depth {
            Ok(depth) => depth,
            Err(err) => {
                color.close();
                return Err(err);
            }
        };

        let color_view = device.create_texture_view(&color);
        let depth_view = device.create_texture_view(&depth);

        Ok(CacheEntry {
            color,
            color_view,
            depth,
            depth_view,
            width,
            height,
        })
    }

    /// Clears the cached textures, uploads the projection, and runs the
    /// content's draw callback into an offscreen pass.
    fn render_offscreen(&mut self, state: &C::State, gui_scale: f32) -> Result<(), GpuError> {
        let Some(entry) = self.cache.as_ref() else {
            return Ok(());
        };
        let device = self.ctx.device();

        let projection = Mat4::orthographic_rh(
            0.0,
            entry.width as f32,
            entry.height as f32,
            0.0,
            -1000.0,
            1000.0,
        );
        let mut packed = Std140Builder::new();
        packed.put_mat4(&projection);
        let packed = packed.finish();

        let mut encoder = device.create_command_encoder();
        encoder.clear_color_and_depth_textures(
            &entry.color,
            Color::TRANSPARENT,
            &entry.depth,
            1.0,
        )?;

        match &self.projection {
            Some(buffer) => encoder.write_buffer(buffer.slice_all(), &packed)?,
            None => {
                self.projection = Some(device.create_buffer_init(
                    "offscreen projection",
                    BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                    &packed,
                )?);
            }
        }

        // Center the content in the texture and apply the pose on top.
        let transform = Mat4::from_translation(Vec3::new(
            entry.width as f32 / 2.0,
            entry.height as f32 / 2.0 + self.content.translate_y(),
            0.0,
        )) * state.pose()
            * Mat4::from_scale(Vec3::splat(gui_scale * state.scale()));

        if let Some(projection) = self.projection.as_ref() {
            let mut pass = encoder.begin_render_pass(
                self.content.texture_label(),
                &entry.color_view,
                Some(&entry.depth_view),
            );
            self.content
                .render(state, &mut *pass, &transform, projection.slice_all())?;
        }

        Ok(())
    }

    /// Releases the cached textures and the projection buffer.
    pub fn close(&mut self) {
        if let Some(entry) = self.cache.take() {
            entry.close();
        }
        if let Some(projection) = self.projection.take() {
            projection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullDevice;

    struct Placement {
        rect: [i32; 4],
        scale: f32,
    }

    impl OffscreenRenderState for Placement {
        fn x0(&self) -> i32 {
            self.rect[0]
        }
        fn y0(&self) -> i32 {
            self.rect[1]
        }
        fn x1(&self) -> i32 {
            self.rect[2]
        }
        fn y1(&self) -> i32 {
            self.rect[3]
        }
        fn scale(&self) -> f32 {
            self.scale
        }
        fn pose(&self) -> Mat4 {
            Mat4::IDENTITY
        }
    }

    struct CountingContent {
        renders: usize,
        reusable: bool,
    }

    impl OffscreenContent for CountingContent {
        type State = Placement;

        fn texture_label(&self) -> &str {
            "test content"
        }

        fn ready_to_blit(&self, _state: &Placement) -> bool {
            self.reusable
        }

        fn render(
            &mut self,
            _state: &Placement,
            pass: &mut dyn RenderPass,
            _transform: &Mat4,
            projection: GpuBufferSlice<'_>,
        ) -> Result<(), GpuError> {
            self.renders += 1;
            pass.bind_uniform("projection", projection);
            pass.draw_indexed(0, 0, 6, 1);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        blits: Vec<(u64, [i32; 4], bool)>,
    }

    impl GuiBlitSink for RecordingSink {
        fn blit_textured_quad(
            &mut self,
            view: &GpuTextureView,
            x0: i32,
            y0: i32,
            x1: i32,
            y1: i32,
            _scissor: Option<[i32; 4]>,
            premultiplied_alpha: bool,
        ) {
            self.blits
                .push((view.texture().raw().id(), [x0, y0, x1, y1], premultiplied_alpha));
        }
    }

    fn context() -> Arc<RenderContext> {
        let device = Arc::new(NullDevice::new(16384));
        Arc::new(RenderContext::new(device).unwrap())
    }

    fn placement() -> Placement {
        Placement {
            rect: [10, 20, 74, 84],
            scale: 1.0,
        }
    }

    #[test]
    fn matching_dimensions_reuse_the_allocation() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: false,
            },
        );
        let mut sink = RecordingSink::default();

        renderer.prepare(&placement(), &mut sink, 2.0).unwrap();
        renderer.prepare(&placement(), &mut sink, 2.0).unwrap();

        // Same texture both frames, one blit per prepare, re-rendered twice
        // since the content never reports itself reusable.
        assert_eq!(sink.blits.len(), 2);
        assert_eq!(sink.blits[0].0, sink.blits[1].0);
        assert_eq!(renderer.content().renders, 2);
    }

    #[test]
    fn ready_to_blit_skips_the_offscreen_pass() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: true,
            },
        );
        let mut sink = RecordingSink::default();

        renderer.prepare(&placement(), &mut sink, 2.0).unwrap();
        renderer.prepare(&placement(), &mut sink, 2.0).unwrap();

        // The first frame always renders (the cache was empty); the second
        // reuses the texture as-is.
        assert_eq!(renderer.content().renders, 1);
        assert_eq!(sink.blits.len(), 2);
    }

    #[test]
    fn dimension_change_tears_down_and_reallocates() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: false,
            },
        );
        let mut sink = RecordingSink::default();

        renderer.prepare(&placement(), &mut sink, 2.0).unwrap();
        let first = renderer.cached_view().unwrap().texture().clone();

        // Doubling the GUI scale doubles the pixel dimensions.
        renderer.prepare(&placement(), &mut sink, 4.0).unwrap();
        let second = renderer.cached_view().unwrap().texture().clone();

        assert_ne!(first.raw().id(), second.raw().id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[test]
    fn blit_lands_on_the_state_rectangle_premultiplied() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: false,
            },
        );
        let mut sink = RecordingSink::default();

        renderer.prepare(&placement(), &mut sink, 1.0).unwrap();
        let (_, rect, premultiplied) = sink.blits[0];
        assert_eq!(rect, [10, 20, 74, 84]);
        assert!(premultiplied);
    }

    #[test]
    #[should_panic]
    fn empty_rectangle_is_a_caller_bug() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: false,
            },
        );
        let mut sink = RecordingSink::default();
        let state = Placement {
            rect: [10, 10, 10, 20],
            scale: 1.0,
        };
        let _ = renderer.prepare(&state, &mut sink, 2.0);
    }

    #[test]
    fn close_releases_everything() {
        let mut renderer = OffscreenRenderer::new(
            context(),
            CountingContent {
                renders: 0,
                reusable: false,
            },
        );
        let mut sink = RecordingSink::default();

        renderer.prepare(&placement(), &mut sink, 1.0).unwrap();
        let texture = renderer.cached_view().unwrap().texture().clone();

        renderer.close();
        assert!(renderer.cached_view().is_none());
        assert!(texture.is_closed());
    }
}
