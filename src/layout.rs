//! Vertex attribute formats and interleaved attribute sequences.
//!
//! An [`AttributeSequence`] describes one vertex record: the ordered list of
//! attributes it contains, their storage formats, and the resulting stride
//! (including any explicit padding). Sequences are plain values; a section
//! store keeps one per section and the binding cache converts each attribute
//! into the matching device format call.

use crate::error::{GraphicsError, Result};

/// Base scalar type of attribute data as stored in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl ScalarType {
    /// Size of one scalar in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Whether this is an integer type (candidate for the native-integer
    /// attribute path or for float conversion).
    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }
}

/// Storage format and placement of one attribute within a vertex record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Base scalar type of the data in the buffer.
    pub scalar: ScalarType,
    /// Vector element count (1, 2, 3 or 4).
    pub len: u32,
    /// Byte offset relative to the start of the vertex record.
    pub offset: u32,
    /// Convert integer data to floating point on the device.
    pub float_cast: bool,
    /// With `float_cast`: normalize instead of a plain numeric cast.
    pub normalized: bool,
}

impl VertexAttribute {
    /// Size of this attribute in bytes.
    pub fn size(&self) -> u32 {
        self.scalar.size() * self.len
    }
}

/// Rust-side types usable as a single vertex attribute.
///
/// Implemented for the supported scalars and their `glam` vector forms.
/// The `bytemuck::Pod` bound lets attribute slices be viewed as raw bytes
/// when uploading.
pub trait VertexData: bytemuck::Pod {
    /// Base scalar type of the attribute.
    const SCALAR: ScalarType;
    /// Vector element count.
    const LEN: u32;
}

macro_rules! impl_vertex_data {
    ($($ty:ty => ($scalar:expr, $len:expr)),* $(,)?) => {
        $(impl VertexData for $ty {
            const SCALAR: ScalarType = $scalar;
            const LEN: u32 = $len;
        })*
    };
}

impl_vertex_data! {
    f32 => (ScalarType::F32, 1),
    f64 => (ScalarType::F64, 1),
    i32 => (ScalarType::I32, 1),
    u32 => (ScalarType::U32, 1),
    glam::Vec2 => (ScalarType::F32, 2),
    glam::Vec3 => (ScalarType::F32, 3),
    glam::Vec4 => (ScalarType::F32, 4),
    glam::IVec2 => (ScalarType::I32, 2),
    glam::IVec3 => (ScalarType::I32, 3),
    glam::IVec4 => (ScalarType::I32, 4),
    glam::UVec2 => (ScalarType::U32, 2),
    glam::UVec3 => (ScalarType::U32, 3),
    glam::UVec4 => (ScalarType::U32, 4),
}

/// The layout of a set of interleaved vertex attributes.
///
/// Attributes are appended in order; each records its offset at the point it
/// was added and the stride grows by its size. Padding advances the stride
/// without adding an attribute.
///
/// # Example
///
/// ```
/// use draw_batcher::{AttributeSequence, ScalarType};
///
/// let sequence = AttributeSequence::new()
///     .with_attribute_of::<glam::Vec3>() // position
///     .with_attribute_of::<glam::Vec2>() // uv
///     .with_padding(4);
///
/// assert_eq!(sequence.attribute_count(), 2);
/// assert_eq!(sequence.stride(), 24);
/// assert_eq!(sequence.attribute(1).unwrap().offset, 12);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeSequence {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

impl AttributeSequence {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte distance between consecutive vertex records, padding included.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of attributes in the sequence.
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the sequence has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The attribute at `index`, if any.
    pub fn attribute(&self, index: usize) -> Option<&VertexAttribute> {
        self.attributes.get(index)
    }

    /// All attributes in insertion order.
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Iterate over the attributes.
    pub fn iter(&self) -> std::slice::Iter<'_, VertexAttribute> {
        self.attributes.iter()
    }

    /// Append an attribute stored in its native format (floats stay floats,
    /// integers take the native-integer path).
    pub fn with_attribute(self, scalar: ScalarType, len: u32) -> Self {
        self.push(scalar, len, false, false)
    }

    /// Append an integer attribute that the device converts to float,
    /// by normalization when `normalized` is set.
    pub fn with_float_cast(self, scalar: ScalarType, len: u32, normalized: bool) -> Self {
        debug_assert!(scalar.is_integer(), "float cast applies to integer data");
        self.push(scalar, len, true, normalized)
    }

    /// Append an attribute of the Rust-side type `T`.
    pub fn with_attribute_of<T: VertexData>(self) -> Self {
        self.push(T::SCALAR, T::LEN, false, false)
    }

    /// Append padding after the last attribute; later attributes land after it.
    pub fn with_padding(mut self, bytes: u32) -> Self {
        self.stride += bytes;
        self
    }

    /// Remove all attributes and padding.
    pub fn clear(&mut self) {
        self.attributes.clear();
        self.stride = 0;
    }

    /// Total bytes for `vertex_count` records of this sequence.
    pub fn data_size(&self, vertex_count: u64) -> u64 {
        self.stride as u64 * vertex_count
    }

    /// Check that `locations` supplies one vertex-input location per attribute.
    pub(crate) fn check_locations(&self, locations: &[u32]) -> Result<()> {
        if locations.len() != self.attributes.len() {
            return Err(GraphicsError::FormatMismatch {
                expected: self.attributes.len(),
                provided: locations.len(),
            });
        }
        Ok(())
    }

    fn push(mut self, scalar: ScalarType, len: u32, float_cast: bool, normalized: bool) -> Self {
        debug_assert!((1..=4).contains(&len), "vector length must be 1..=4");
        self.attributes.push(VertexAttribute {
            scalar,
            len,
            offset: self.stride,
            float_cast,
            normalized,
        });
        self.stride += scalar.size() * len;
        self
    }
}
