use glam::{IVec4, Mat4, Vec2, Vec3, Vec4};

/// A writer that serializes uniform data into a byte buffer following the
/// std140 uniform-block layout rules.
///
/// Every `put_*` call first advances the write cursor to the next multiple of
/// the type's required alignment — 4 bytes for scalars, 8 for two-component
/// vectors, 16 for everything wider — measured *relative to the position the
/// builder started at*, then appends the value. This makes the output valid
/// as a sub-range of a larger uniform buffer.
///
/// The builder is pure and deterministic; it has no failure modes.
pub struct Std140Builder {
    /// The destination bytes.
    bytes: Vec<u8>,
    /// The position in `bytes` that alignment is measured from.
    start: usize,
}

impl Std140Builder {
    /// Creates a new [`Std140Builder`] writing into a fresh buffer.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            start: 0,
        }
    }

    /// Creates a new [`Std140Builder`] appending to `bytes`.
    ///
    /// Alignment is measured from the current end of `bytes`, not from its
    /// beginning.
    pub fn with_buffer(bytes: Vec<u8>) -> Self {
        let start = bytes.len();
        Self { bytes, start }
    }

    /// Pads the output with zeros until the cursor is aligned to `align`
    /// bytes relative to the start position.
    fn align_to(&mut self, align: usize) {
        let written = self.bytes.len() - self.start;
        let misalign = written % align;
        if misalign != 0 {
            let new_len = self.bytes.len() + align - misalign;
            self.bytes.resize(new_len, 0);
        }
    }

    /// Appends a 32-bit float, aligned to 4 bytes.
    pub fn put_float(&mut self, value: f32) -> &mut Self {
        self.align_to(4);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    /// Appends a 32-bit signed integer, aligned to 4 bytes.
    pub fn put_int(&mut self, value: i32) -> &mut Self {
        self.align_to(4);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    /// Appends a `vec2`, aligned to 8 bytes.
    pub fn put_vec2(&mut self, value: Vec2) -> &mut Self {
        self.align_to(8);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    /// Appends a `vec3`, aligned to 16 bytes.
    ///
    /// Per the std140 rules the three components are followed by 4 bytes of
    /// padding, so the next scalar lands 16 bytes after the vector, not 12.
    pub fn put_vec3(&mut self, value: Vec3) -> &mut Self {
        self.align_to(16);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self.bytes.extend_from_slice(&[0; 4]);
        self
    }

    /// Appends a `vec4`, aligned to 16 bytes.
    pub fn put_vec4(&mut self, value: Vec4) -> &mut Self {
        self.align_to(16);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    /// Appends an `ivec4`, aligned to 16 bytes.
    pub fn put_ivec4(&mut self, value: IVec4) -> &mut Self {
        self.align_to(16);
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    /// Appends a `mat4` in column-major order; each column is aligned to 16
    /// bytes.
    pub fn put_mat4(&mut self, value: &Mat4) -> &mut Self {
        self.align_to(16);
        self.bytes
            .extend_from_slice(bytemuck::cast_slice(&value.to_cols_array()));
        self
    }

    /// Returns the number of bytes written so far, measured from the start
    /// position.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() - self.start
    }

    /// Whether nothing has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finalizes the builder, returning the destination buffer.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for Std140Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{ivec4, vec2, vec3, vec4};

    #[test]
    fn scalars_are_packed_tightly() {
        let mut b = Std140Builder::new();
        b.put_float(1.0).put_int(2).put_float(3.0);
        assert_eq!(b.len(), 12);

        let bytes = b.finish();
        assert_eq!(&bytes[0..4], bytemuck::bytes_of(&1.0f32));
        assert_eq!(&bytes[4..8], bytemuck::bytes_of(&2i32));
        assert_eq!(&bytes[8..12], bytemuck::bytes_of(&3.0f32));
    }

    #[test]
    fn vec3_is_padded_to_sixteen_bytes() {
        let mut b = Std140Builder::new();
        b.put_vec3(vec3(1.0, 2.0, 3.0)).put_float(4.0);

        let bytes = b.finish();
        // The float must land at offset 16, after the vec3's padding.
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[16..20], bytemuck::bytes_of(&4.0f32));
    }

    #[test]
    fn vec2_aligns_to_eight() {
        let mut b = Std140Builder::new();
        b.put_float(0.0).put_vec2(vec2(1.0, 2.0));

        let bytes = b.finish();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], bytemuck::bytes_of(&1.0f32));
    }

    #[test]
    fn wide_types_align_to_sixteen() {
        let mut b = Std140Builder::new();
        b.put_int(7)
            .put_vec4(vec4(1.0, 2.0, 3.0, 4.0))
            .put_ivec4(ivec4(5, 6, 7, 8));

        let bytes = b.finish();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[16..20], bytemuck::bytes_of(&1.0f32));
        assert_eq!(&bytes[32..36], bytemuck::bytes_of(&5i32));
    }

    #[test]
    fn mat4_is_written_column_major() {
        let m = Mat4::from_cols(
            vec4(1.0, 2.0, 3.0, 4.0),
            vec4(5.0, 6.0, 7.0, 8.0),
            vec4(9.0, 10.0, 11.0, 12.0),
            vec4(13.0, 14.0, 15.0, 16.0),
        );

        let mut b = Std140Builder::new();
        b.put_mat4(&m);

        let bytes = b.finish();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], bytemuck::bytes_of(&1.0f32));
        assert_eq!(&bytes[16..20], bytemuck::bytes_of(&5.0f32));
        assert_eq!(&bytes[60..64], bytemuck::bytes_of(&16.0f32));
    }

    #[test]
    fn alignment_is_relative_to_the_start_position() {
        // Start from a buffer whose length is *not* a multiple of 16.
        let mut b = Std140Builder::with_buffer(vec![0xAB; 3]);
        b.put_vec4(vec4(1.0, 0.0, 0.0, 0.0));

        let bytes = b.finish();
        // No padding was inserted: offset 0 relative to the start is already
        // aligned.
        assert_eq!(bytes.len(), 3 + 16);
        assert_eq!(&bytes[3..7], bytemuck::bytes_of(&1.0f32));
    }
}
