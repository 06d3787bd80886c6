use thiserror::Error;

use crate::{BufferUsages, TextureUsages};

/// The errors that the GPU resource layer can produce.
///
/// Most variants are *precondition violations*: they indicate a bug in the
/// calling code and are not expected to be caught and retried. The exception
/// is [`OutOfDeviceMemory`], which reports an environment condition that a
/// caller may choose to degrade on (for example by skipping a frame capture)
/// instead of crashing.
///
/// [`OutOfDeviceMemory`]: GpuError::OutOfDeviceMemory
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GpuError {
    /// A slice or copy operation addressed bytes outside of the resource it
    /// targets.
    #[error("range starting at {offset} with length {length} is out of bounds (limit is {bound})")]
    OutOfRange {
        /// The requested start of the range.
        offset: u64,
        /// The requested length of the range.
        length: u64,
        /// The size the range was validated against.
        bound: u64,
    },

    /// A texture allocation was requested with dimensions the device cannot
    /// provide.
    #[error("render target size {width}x{height} is outside of the supported range 1..={max}")]
    UnsupportedSize {
        /// The requested width, in pixels.
        width: u32,
        /// The requested height, in pixels.
        height: u32,
        /// The maximum dimension reported by the device.
        max: u32,
    },

    /// A named vertex element lookup was performed on a format that does not
    /// contain that element.
    #[error("vertex element with id {id} is not part of this vertex format")]
    MissingVertexElement {
        /// The id of the element that was looked up.
        id: u32,
    },

    /// A buffer was used in a way its usage mask does not allow.
    #[error("buffer `{label}` is missing the {missing:?} usage")]
    MissingBufferUsage {
        /// The label of the offending buffer.
        label: String,
        /// The usage bits that would have been required.
        missing: BufferUsages,
    },

    /// A texture was used in a way its usage mask does not allow.
    #[error("texture `{label}` is missing the {missing:?} usage")]
    MissingTextureUsage {
        /// The label of the offending texture.
        label: String,
        /// The usage bits that would have been required.
        missing: TextureUsages,
    },

    /// An operation was attempted on a resource that has already been closed.
    #[error("resource `{label}` has already been closed")]
    Closed {
        /// The label of the offending resource.
        label: String,
    },

    /// An operation was attempted in a state that does not allow it, such as
    /// blitting a render target that has no attachments.
    #[error("{0}")]
    InvalidState(&'static str),

    /// The device failed to allocate memory for a resource.
    ///
    /// Unlike the other variants, this one reports a runtime condition of the
    /// environment rather than a bug in the calling code.
    #[error("the GPU device is out of memory")]
    OutOfDeviceMemory,
}
