use crate::{BufferUsages, GpuBuffer, GpuError, RenderContext};

/// The number of distinct vertex element identifiers.
pub const MAX_VERTEX_ELEMENTS: u32 = 32;

/// The scalar type of a vertex element's components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexType {
    /// A 32-bit float.
    Float,
    /// An unsigned 8-bit integer.
    UByte,
    /// A signed 8-bit integer.
    Byte,
    /// An unsigned 16-bit integer.
    UShort,
    /// A signed 16-bit integer.
    Short,
    /// An unsigned 32-bit integer.
    UInt,
    /// A signed 32-bit integer.
    Int,
}

impl VertexType {
    /// Returns the size of one component of this type, in bytes.
    pub const fn size(self) -> u32 {
        match self {
            Self::UByte | Self::Byte => 1,
            Self::UShort | Self::Short => 2,
            Self::Float | Self::UInt | Self::Int => 4,
        }
    }
}

/// One element of a [`VertexFormat`]: an identifier, a component type and a
/// component count.
///
/// The identifier is what shaders use to locate the element regardless of
/// where a particular format places it; it must be lower than
/// [`MAX_VERTEX_ELEMENTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexFormatElement {
    /// The well-known identifier of the element.
    pub id: u32,
    /// The scalar type of the components.
    pub ty: VertexType,
    /// The number of components.
    pub count: u32,
}

impl VertexFormatElement {
    /// Three-float position.
    pub const POSITION: Self = Self::new(0, VertexType::Float, 3);
    /// Four-byte RGBA color.
    pub const COLOR: Self = Self::new(1, VertexType::UByte, 4);
    /// Two-float texture coordinates, first set.
    pub const UV0: Self = Self::new(2, VertexType::Float, 2);
    /// Two-short texture coordinates, second set.
    pub const UV1: Self = Self::new(3, VertexType::Short, 2);
    /// Two-short texture coordinates, third set.
    pub const UV2: Self = Self::new(4, VertexType::Short, 2);
    /// Three-byte normal.
    pub const NORMAL: Self = Self::new(5, VertexType::Byte, 3);

    /// Creates a new [`VertexFormatElement`].
    pub const fn new(id: u32, ty: VertexType, count: u32) -> Self {
        assert!(id < MAX_VERTEX_ELEMENTS);
        Self { id, ty, count }
    }

    /// Returns the size of this element, in bytes.
    #[inline]
    pub const fn byte_size(&self) -> u32 {
        self.ty.size() * self.count
    }
}

/// Builds a [`VertexFormat`] by appending elements and padding in order.
#[derive(Default)]
pub struct VertexFormatBuilder {
    elements: Vec<(String, VertexFormatElement, u32)>,
    cursor: u32,
}

impl VertexFormatBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `element` under `name` at the current offset.
    ///
    /// # Panics
    ///
    /// Panics if an element with the same identifier was already added.
    pub fn element(mut self, name: impl Into<String>, element: VertexFormatElement) -> Self {
        assert!(
            !self.elements.iter().any(|(_, e, _)| e.id == element.id),
            "duplicate vertex element identifier {}",
            element.id,
        );

        self.elements.push((name.into(), element, self.cursor));
        self.cursor += element.byte_size();
        self
    }

    /// Appends `bytes` of unused space at the current offset.
    pub fn padding(mut self, bytes: u32) -> Self {
        self.cursor += bytes;
        self
    }

    /// Finalizes the layout.
    pub fn build(self) -> VertexFormat {
        let mut offsets = [-1i32; MAX_VERTEX_ELEMENTS as usize];
        let mut presence_mask = 0u32;
        for &(_, element, offset) in &self.elements {
            offsets[element.id as usize] = offset as i32;
            presence_mask |= 1 << element.id;
        }

        VertexFormat {
            elements: self.elements,
            offsets,
            presence_mask,
            stride: self.cursor,
            immediate_vertices: None,
            immediate_indices: None,
        }
    }
}

/// The memory layout of one vertex, plus the pair of buffers used for
/// immediate-mode geometry in this layout.
///
/// Immediate-mode buffers are a convenience for geometry that is rebuilt every
/// frame (debug overlays, GUI quads): [`upload_immediate_vertices`] and
/// [`upload_immediate_indices`] own a buffer each, grow it when the data does
/// not fit, and otherwise overwrite it in place — unless the context's
/// workaround policy forbids in-place overwrites, in which case the buffer is
/// re-created on every upload.
///
/// [`upload_immediate_vertices`]: VertexFormat::upload_immediate_vertices
/// [`upload_immediate_indices`]: VertexFormat::upload_immediate_indices
pub struct VertexFormat {
    /// The elements of the format, in layout order, with their offsets.
    elements: Vec<(String, VertexFormatElement, u32)>,
    /// The byte offset of each element identifier, or `-1` when absent.
    offsets: [i32; MAX_VERTEX_ELEMENTS as usize],
    /// A bit per element identifier present in this format.
    presence_mask: u32,
    /// The size of one vertex, in bytes, including padding.
    stride: u32,
    /// The immediate-mode vertex buffer, once something was uploaded.
    immediate_vertices: Option<GpuBuffer>,
    /// The immediate-mode index buffer, once something was uploaded.
    immediate_indices: Option<GpuBuffer>,
}

impl VertexFormat {
    /// Starts building a new [`VertexFormat`].
    pub fn builder() -> VertexFormatBuilder {
        VertexFormatBuilder::new()
    }

    /// Returns the size of one vertex, in bytes, including padding.
    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Returns the elements of this format, in layout order, with their
    /// names and byte offsets.
    #[inline]
    pub fn elements(&self) -> impl Iterator<Item = (&str, VertexFormatElement, u32)> {
        self.elements
            .iter()
            .map(|(name, element, offset)| (name.as_str(), *element, *offset))
    }

    /// A bit mask with bit *n* set when an element with identifier *n* is
    /// present in this format.
    #[inline]
    pub fn presence_mask(&self) -> u32 {
        self.presence_mask
    }

    /// Whether an element with the given identifier is present.
    #[inline]
    pub fn contains_id(&self, id: u32) -> bool {
        self.presence_mask & (1 << id) != 0
    }

    /// Returns the byte offset of `element` within a vertex.
    ///
    /// Fails with [`GpuError::MissingVertexElement`] when no element with the
    /// same identifier is part of this format.
    pub fn offset_of(&self, element: &VertexFormatElement) -> Result<u32, GpuError> {
        match self.offsets[element.id as usize] {
            -1 => Err(GpuError::MissingVertexElement { id: element.id }),
            offset => Ok(offset as u32),
        }
    }

    /// Returns the byte offset of the element with the given identifier, or
    /// `-1` when no such element is part of this format.
    ///
    /// This is the infallible counterpart of [`offset_of`], for callers that
    /// feed the offset (sentinel included) straight into shader constants.
    ///
    /// [`offset_of`]: VertexFormat::offset_of
    #[inline]
    pub fn offset_of_id(&self, id: u32) -> i32 {
        self.offsets[id as usize]
    }

    /// Returns the immediate-mode vertex buffer, if anything was uploaded.
    #[inline]
    pub fn immediate_vertex_buffer(&self) -> Option<&GpuBuffer> {
        self.immediate_vertices.as_ref()
    }

    /// Returns the immediate-mode index buffer, if anything was uploaded.
    #[inline]
    pub fn immediate_index_buffer(&self) -> Option<&GpuBuffer> {
        self.immediate_indices.as_ref()
    }

    /// Uploads `data` into the immediate-mode vertex buffer, re-allocating it
    /// when the data does not fit or when the workaround policy demands a
    /// fresh buffer.
    #[profiling::function]
    pub fn upload_immediate_vertices(
        &mut self,
        ctx: &RenderContext,
        data: &[u8],
    ) -> Result<(), GpuError> {
        Self::upload_immediate(
            ctx,
            &mut self.immediate_vertices,
            "immediate vertices",
            BufferUsages::VERTEX | BufferUsages::COPY_DST,
            data,
        )
    }

    /// Uploads `data` into the immediate-mode index buffer, re-allocating it
    /// when the data does not fit or when the workaround policy demands a
    /// fresh buffer.
    #[profiling::function]
    pub fn upload_immediate_indices(
        &mut self,
        ctx: &RenderContext,
        data: &[u8],
    ) -> Result<(), GpuError> {
        Self::upload_immediate(
            ctx,
            &mut self.immediate_indices,
            "immediate indices",
            BufferUsages::INDEX | BufferUsages::COPY_DST,
            data,
        )
    }

    fn upload_immediate(
        ctx: &RenderContext,
        slot: &mut Option<GpuBuffer>,
        label: &str,
        usage: BufferUsages,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let workarounds = ctx.workarounds();
        let needed = data.len() as u64;

        let reuse = !workarounds.always_fresh_immediate_buffers
            && slot.as_ref().is_some_and(|b| b.size() >= needed);

        if reuse {
            if let Some(buffer) = slot.as_ref() {
                let mut encoder = ctx.device().create_command_encoder();
                if workarounds.staged_immediate_uploads {
                    ctx.write_through_staging(&mut *encoder, buffer, data)?;
                } else {
                    encoder.write_buffer(buffer.slice(0, needed)?, data)?;
                }
            }
        } else {
            if let Some(old) = slot.take() {
                old.close();
            }
            *slot = Some(ctx.device().create_buffer_init(label, usage, data)?);
        }

        Ok(())
    }

    /// Releases the immediate-mode buffers, if any.
    pub fn close(&mut self) {
        if let Some(buffer) = self.immediate_vertices.take() {
            buffer.close();
        }
        if let Some(buffer) = self.immediate_indices.take() {
            buffer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpuWorkarounds, NullDevice};
    use std::sync::Arc;

    fn format() -> VertexFormat {
        VertexFormat::builder()
            .element("position", VertexFormatElement::POSITION)
            .element("color", VertexFormatElement::COLOR)
            .padding(4)
            .element("uv", VertexFormatElement::UV0)
            .build()
    }

    fn context(workarounds: GpuWorkarounds) -> Arc<RenderContext> {
        let device = Arc::new(NullDevice::new(16384));
        Arc::new(RenderContext::with_workarounds(device, workarounds).unwrap())
    }

    #[test]
    fn offsets_and_stride_account_for_padding() {
        let format = format();

        // position: 12 bytes, color: 4 bytes, 4 bytes of padding, uv: 8.
        assert_eq!(format.stride(), 28);
        assert_eq!(format.offset_of(&VertexFormatElement::POSITION), Ok(0));
        assert_eq!(format.offset_of(&VertexFormatElement::COLOR), Ok(12));
        assert_eq!(format.offset_of(&VertexFormatElement::UV0), Ok(20));
    }

    #[test]
    fn missing_elements_differ_by_entry_point() {
        let format = format();

        // The fallible entry point names the missing identifier.
        assert_eq!(
            format.offset_of(&VertexFormatElement::NORMAL),
            Err(GpuError::MissingVertexElement {
                id: VertexFormatElement::NORMAL.id
            })
        );

        // The raw entry point reports the sentinel instead.
        assert_eq!(format.offset_of_id(VertexFormatElement::NORMAL.id), -1);
        assert_eq!(format.offset_of_id(VertexFormatElement::COLOR.id), 12);
    }

    #[test]
    fn presence_mask_matches_the_elements() {
        let format = format();
        let expected = 1 << VertexFormatElement::POSITION.id
            | 1 << VertexFormatElement::COLOR.id
            | 1 << VertexFormatElement::UV0.id;
        assert_eq!(format.presence_mask(), expected);
        assert!(format.contains_id(VertexFormatElement::UV0.id));
        assert!(!format.contains_id(VertexFormatElement::NORMAL.id));
    }

    #[test]
    #[should_panic]
    fn duplicate_identifiers_are_rejected() {
        let _ = VertexFormat::builder()
            .element("a", VertexFormatElement::POSITION)
            .element("b", VertexFormatElement::POSITION);
    }

    #[test]
    fn immediate_upload_reuses_a_large_enough_buffer() {
        let ctx = context(GpuWorkarounds::none());
        let mut format = format();

        format.upload_immediate_vertices(&ctx, &[1; 64]).unwrap();
        let first_id = format.immediate_vertex_buffer().unwrap().raw().id();

        // A smaller upload lands in the same buffer.
        format.upload_immediate_vertices(&ctx, &[2; 32]).unwrap();
        assert_eq!(
            format.immediate_vertex_buffer().unwrap().raw().id(),
            first_id
        );

        // A larger one forces a re-allocation.
        format.upload_immediate_vertices(&ctx, &[3; 128]).unwrap();
        let grown = format.immediate_vertex_buffer().unwrap();
        assert_ne!(grown.raw().id(), first_id);
        assert_eq!(grown.size(), 128);
    }

    #[test]
    fn fresh_buffer_workaround_reallocates_every_time() {
        let ctx = context(GpuWorkarounds {
            always_fresh_immediate_buffers: true,
            staged_immediate_uploads: false,
        });
        let mut format = format();

        format.upload_immediate_vertices(&ctx, &[1; 16]).unwrap();
        let first_id = format.immediate_vertex_buffer().unwrap().raw().id();

        format.upload_immediate_vertices(&ctx, &[2; 16]).unwrap();
        assert_ne!(
            format.immediate_vertex_buffer().unwrap().raw().id(),
            first_id
        );
    }

    #[test]
    fn staged_uploads_land_the_same_bytes() {
        let device = Arc::new(NullDevice::new(16384));
        let ctx = RenderContext::with_workarounds(
            device.clone(),
            GpuWorkarounds {
                always_fresh_immediate_buffers: false,
                staged_immediate_uploads: true,
            },
        )
        .unwrap();
        let mut format = format();

        format.upload_immediate_indices(&ctx, &[7; 32]).unwrap();
        format.upload_immediate_indices(&ctx, &[9; 16]).unwrap();

        let buffer = format.immediate_index_buffer().unwrap();
        let contents = device.buffer_contents(buffer);
        assert_eq!(&contents[..16], &[9; 16]);
        assert_eq!(&contents[16..], &[7; 16]);
    }

    #[test]
    fn close_releases_both_buffers() {
        let ctx = context(GpuWorkarounds::none());
        let mut format = format();

        format.upload_immediate_vertices(&ctx, &[0; 8]).unwrap();
        format.upload_immediate_indices(&ctx, &[0; 8]).unwrap();
        format.close();
        assert!(format.immediate_vertex_buffer().is_none());
        assert!(format.immediate_index_buffer().is_none());
    }
}
