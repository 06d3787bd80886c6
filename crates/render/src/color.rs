use bytemuck::{Pod, Zeroable};

/// A color, represented as four 8-bit unsigned components.
///
/// This is the type used for clear values throughout the resource layer.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Color {
    /// The red component of the color.
    pub r: u8,
    /// The green component of the color.
    pub g: u8,
    /// The blue component of the color.
    pub b: u8,
    /// The alpha component of the color.
    pub a: u8,
}

impl Color {
    /// (0, 0, 0, 255)
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// (255, 255, 255, 255)
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// (255, 0, 0, 255)
    pub const RED: Self = Self::rgb(255, 0, 0);
    /// (0, 255, 0, 255)
    pub const GREEN: Self = Self::rgb(0, 255, 0);
    /// (0, 0, 255, 255)
    pub const BLUE: Self = Self::rgb(0, 0, 255);
    /// (0, 0, 0, 0)
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);

    /// Creates a new [`Color`] from its RGB components, with an opaque alpha.
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Creates a new [`Color`] from its RGBA components.
    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Changes the alpha component of the [`Color`], returning a new one.
    #[inline]
    pub fn with_alpha(self, alpha: u8) -> Self {
        Self::rgba(self.r, self.g, self.b, alpha)
    }

    /// Returns the components of this [`Color`] as normalized floats in the
    /// `0.0..=1.0` range, in RGBA order.
    ///
    /// This is the representation clear operations expect.
    pub fn to_f64_components(self) -> [f64; 4] {
        [
            self.r as f64 / 255.0,
            self.g as f64 / 255.0,
            self.b as f64 / 255.0,
            self.a as f64 / 255.0,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_is_opaque() {
        assert_eq!(Color::rgb(1, 2, 3), Color::rgba(1, 2, 3, 255));
    }

    #[test]
    fn normalized_components() {
        let c = Color::rgba(255, 0, 255, 0).to_f64_components();
        assert_eq!(c, [1.0, 0.0, 1.0, 0.0]);
    }
}
