use std::cell::Cell;
use std::sync::Arc;

use bitflags::bitflags;

use crate::{RawTexture, RawTextureView};

bitflags! {
    /// The ways in which a [`GpuTexture`] may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct TextureUsages: u32 {
        /// The texture may be the destination of a copy operation.
        const COPY_DST = 1 << 0;
        /// The texture may be the source of a copy operation.
        const COPY_SRC = 1 << 1;
        /// The texture may be sampled from a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// The texture may be used as a render pass attachment.
        const RENDER_ATTACHMENT = 1 << 3;
        /// The texture's layers may be viewed as a cubemap.
        const CUBEMAP_COMPATIBLE = 1 << 4;
    }
}

/// The texel format of a [`GpuTexture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA.
    Rgba8,
    /// 8-bit BGRA, the common swap-chain format.
    Bgra8,
    /// A single 8-bit channel.
    R8,
    /// 32-bit floating point depth.
    Depth32,
}

impl TextureFormat {
    /// Returns the size of a single texel of this format, in bytes.
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8 | Self::Bgra8 | Self::Depth32 => 4,
            Self::R8 => 1,
        }
    }

    /// Whether this format stores depth information.
    pub const fn has_depth(self) -> bool {
        matches!(self, Self::Depth32)
    }
}

/// How sampling outside of the `0.0..=1.0` texture coordinate range behaves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Coordinates wrap around the texture.
    Repeat,
    /// Coordinates are clamped to the edge of the texture.
    #[default]
    ClampToEdge,
}

/// How texels are interpolated when the sample footprint does not match the
/// texel grid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// The nearest texel is used.
    #[default]
    Nearest,
    /// Neighboring texels are linearly interpolated.
    Linear,
}

/// The sampler state attached to a [`GpuTexture`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    /// The wrap mode along the horizontal axis.
    pub address_mode_u: AddressMode,
    /// The wrap mode along the vertical axis.
    pub address_mode_v: AddressMode,
    /// The filter used when the texture is minified.
    pub min_filter: FilterMode,
    /// The filter used when the texture is magnified.
    pub mag_filter: FilterMode,
    /// Whether sampling reads from the mipmap chain.
    pub use_mipmaps: bool,
}

/// A GPU-resident image, plus the sampler state used to read from it.
///
/// Textures are created through [`GpuDevice::create_texture`] and shared via
/// [`Arc`]: whoever created the texture (typically a [`RenderTarget`] or an
/// offscreen-render cache) is responsible for closing it, and every
/// [`GpuTextureView`] keeps the texture alive while it exists.
///
/// The sampler state is interior-mutable: any holder of the texture may
/// change it, and the last writer wins. This is safe because all GPU resource
/// mutation happens on the single render thread.
///
/// [`GpuDevice::create_texture`]: crate::GpuDevice::create_texture
/// [`RenderTarget`]: crate::RenderTarget
pub struct GpuTexture {
    /// The backend handle of the texture.
    raw: Box<dyn RawTexture>,
    /// The debug label of the texture.
    label: String,
    /// The usage mask the texture was created with.
    usage: TextureUsages,
    /// The texel format of the texture.
    format: TextureFormat,
    /// The width of mip level 0, in texels.
    width: u32,
    /// The height of mip level 0, in texels.
    height: u32,
    /// The depth, or the number of array layers, of the texture.
    depth_or_layers: u32,
    /// The number of mip levels of the texture.
    mip_levels: u32,
    /// The sampler state used when reading from the texture.
    sampler: Cell<SamplerState>,
    /// Whether `close` has been called.
    closed: Cell<bool>,
}

impl GpuTexture {
    /// Wraps a backend texture handle.
    ///
    /// This is meant to be called by [`GpuDevice`] implementations.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions are zero or if `mip_levels` is zero.
    ///
    /// [`GpuDevice`]: crate::GpuDevice
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        raw: Box<dyn RawTexture>,
        label: impl Into<String>,
        usage: TextureUsages,
        format: TextureFormat,
        width: u32,
        height: u32,
        depth_or_layers: u32,
        mip_levels: u32,
    ) -> Self {
        assert!(
            width > 0 && height > 0 && depth_or_layers > 0,
            "texture dimensions must be strictly positive"
        );
        assert!(mip_levels >= 1, "a texture has at least one mip level");

        Self {
            raw,
            label: label.into(),
            usage,
            format,
            width,
            height,
            depth_or_layers,
            mip_levels,
            sampler: Cell::new(SamplerState::default()),
            closed: Cell::new(false),
        }
    }

    /// Returns the debug label of this texture.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the usage mask this texture was created with.
    #[inline]
    pub fn usage(&self) -> TextureUsages {
        self.usage
    }

    /// Returns the texel format of this texture.
    #[inline]
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Returns the width of the given mip level, in texels.
    #[inline]
    pub fn width_at(&self, mip_level: u32) -> u32 {
        self.width >> mip_level
    }

    /// Returns the height of the given mip level, in texels.
    #[inline]
    pub fn height_at(&self, mip_level: u32) -> u32 {
        self.height >> mip_level
    }

    /// Returns the depth, or the number of array layers, of this texture.
    #[inline]
    pub fn depth_or_layers(&self) -> u32 {
        self.depth_or_layers
    }

    /// Returns the number of mip levels of this texture.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Returns the backend handle of this texture.
    #[inline]
    pub fn raw(&self) -> &dyn RawTexture {
        &*self.raw
    }

    /// Returns the current sampler state of this texture.
    #[inline]
    pub fn sampler(&self) -> SamplerState {
        self.sampler.get()
    }

    /// Sets the wrap mode of both axes at once.
    pub fn set_address_mode(&self, mode: AddressMode) {
        self.set_address_modes(mode, mode);
    }

    /// Sets the wrap mode of each axis independently.
    pub fn set_address_modes(&self, u: AddressMode, v: AddressMode) {
        let mut sampler = self.sampler.get();
        sampler.address_mode_u = u;
        sampler.address_mode_v = v;
        self.sampler.set(sampler);
    }

    /// Sets both the minification and magnification filters to `filter`.
    ///
    /// Note that this *also* overwrites the mipmap flag: filter and mipmap
    /// state are not independent through this entry point.
    pub fn set_filter(&self, filter: FilterMode, use_mipmaps: bool) {
        self.set_filters(filter, filter, use_mipmaps);
    }

    /// Sets the minification and magnification filters independently.
    ///
    /// Like [`set_filter`], this overwrites the mipmap flag.
    ///
    /// [`set_filter`]: GpuTexture::set_filter
    pub fn set_filters(&self, min: FilterMode, mag: FilterMode, use_mipmaps: bool) {
        let mut sampler = self.sampler.get();
        sampler.min_filter = min;
        sampler.mag_filter = mag;
        sampler.use_mipmaps = use_mipmaps;
        self.sampler.set(sampler);
    }

    /// Toggles mipmapped sampling without touching the filters.
    pub fn set_use_mipmaps(&self, use_mipmaps: bool) {
        let mut sampler = self.sampler.get();
        sampler.use_mipmaps = use_mipmaps;
        self.sampler.set(sampler);
    }

    /// Releases the device memory backing this texture.
    ///
    /// Closing an already-closed texture is a no-op.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            self.raw.destroy();
        }
    }

    /// Whether [`close`] has been called on this texture.
    ///
    /// [`close`]: GpuTexture::close
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// A read-only window onto a subset of the mip chain of a [`GpuTexture`].
///
/// A texture may have any number of concurrent views; the view keeps the
/// texture alive but does not own it, and never closes it.
pub struct GpuTextureView {
    /// The backend handle of the view.
    raw: Box<dyn RawTextureView>,
    /// The texture this view reads from.
    texture: Arc<GpuTexture>,
    /// The first mip level visible through this view.
    base_mip_level: u32,
    /// The number of mip levels visible through this view.
    mip_levels: u32,
}

impl GpuTextureView {
    /// Wraps a backend view handle.
    ///
    /// This is meant to be called by [`GpuDevice`] implementations.
    ///
    /// # Panics
    ///
    /// Panics if the mip range does not fit in the texture's mip chain.
    ///
    /// [`GpuDevice`]: crate::GpuDevice
    pub fn from_raw(
        raw: Box<dyn RawTextureView>,
        texture: Arc<GpuTexture>,
        base_mip_level: u32,
        mip_levels: u32,
    ) -> Self {
        assert!(
            mip_levels >= 1 && base_mip_level + mip_levels <= texture.mip_levels(),
            "view mip range is out of bounds of the texture's mip chain"
        );

        Self {
            raw,
            texture,
            base_mip_level,
            mip_levels,
        }
    }

    /// Returns the texture this view reads from.
    #[inline]
    pub fn texture(&self) -> &Arc<GpuTexture> {
        &self.texture
    }

    /// Returns the first mip level visible through this view.
    #[inline]
    pub fn base_mip_level(&self) -> u32 {
        self.base_mip_level
    }

    /// Returns the number of mip levels visible through this view.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Returns the width of this view's mip level 0, in texels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width_at(0)
    }

    /// Returns the height of this view's mip level 0, in texels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height_at(0)
    }

    /// Returns the width of the given mip level *of this view*, in texels.
    ///
    /// The view's base mip level is added before delegating to the texture.
    #[inline]
    pub fn width_at(&self, mip_level: u32) -> u32 {
        self.texture.width_at(self.base_mip_level + mip_level)
    }

    /// Returns the height of the given mip level *of this view*, in texels.
    #[inline]
    pub fn height_at(&self, mip_level: u32) -> u32 {
        self.texture.height_at(self.base_mip_level + mip_level)
    }

    /// Returns the backend handle of this view.
    #[inline]
    pub fn raw(&self) -> &dyn RawTextureView {
        &*self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpuDevice, NullDevice, TextureDescriptor};

    fn texture(width: u32, height: u32, mip_levels: u32) -> Arc<GpuTexture> {
        NullDevice::new(16384)
            .create_texture(&TextureDescriptor {
                label: "test texture",
                usage: TextureUsages::TEXTURE_BINDING,
                format: TextureFormat::Rgba8,
                width,
                height,
                depth_or_layers: 1,
                mip_levels,
                stencil: false,
            })
            .unwrap()
    }

    #[test]
    fn mip_dimensions_halve() {
        let tex = texture(256, 128, 4);
        assert_eq!(tex.width_at(0), 256);
        assert_eq!(tex.height_at(0), 128);
        assert_eq!(tex.width_at(1), 128);
        assert_eq!(tex.width_at(3), 32);
        assert_eq!(tex.height_at(3), 16);
    }

    #[test]
    fn view_dimensions_account_for_the_base_mip() {
        let device = NullDevice::new(16384);
        let tex = texture(256, 256, 4);

        let view = device.create_texture_view_with_mips(&tex, 2, 2);
        assert_eq!(view.width(), 64);
        assert_eq!(view.height_at(1), 32);

        // The default view spans the whole mip chain.
        let view = device.create_texture_view(&tex);
        assert_eq!(view.base_mip_level(), 0);
        assert_eq!(view.mip_levels(), 4);
        assert_eq!(view.width(), 256);
    }

    #[test]
    fn set_filter_overwrites_the_mipmap_flag() {
        let tex = texture(16, 16, 1);
        tex.set_use_mipmaps(true);
        assert!(tex.sampler().use_mipmaps);

        // Setting a filter is documented to clobber the mipmap flag.
        tex.set_filter(FilterMode::Linear, false);
        let sampler = tex.sampler();
        assert_eq!(sampler.min_filter, FilterMode::Linear);
        assert_eq!(sampler.mag_filter, FilterMode::Linear);
        assert!(!sampler.use_mipmaps);
    }

    #[test]
    fn address_modes_are_independent_per_axis() {
        let tex = texture(16, 16, 1);
        tex.set_address_modes(AddressMode::Repeat, AddressMode::ClampToEdge);
        let sampler = tex.sampler();
        assert_eq!(sampler.address_mode_u, AddressMode::Repeat);
        assert_eq!(sampler.address_mode_v, AddressMode::ClampToEdge);
    }
}
