//! Draw operations.
//!
//! A [`DrawOperation`] is the unit the command queue collects, sorts and
//! replays. The variant set is closed and mirrors the device's fixed draw
//! primitives; backends dispatch it with a single `match`.

/// Primitive topology of a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveMode {
    /// One point per vertex.
    Points,
    /// Independent line segments.
    Lines,
    /// Connected segments closing back on the first vertex.
    LineLoop,
    /// Connected segments.
    LineStrip,
    /// Independent triangles (default).
    #[default]
    Triangles,
    /// Triangle strip.
    TriangleStrip,
    /// Triangle fan.
    TriangleFan,
}

/// Element index width for indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// 8-bit indices.
    U8,
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexType {
    /// Size of one index in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// A non-indexed draw over a contiguous vertex range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawArrays {
    /// Primitive topology.
    pub mode: PrimitiveMode,
    /// Index of the first vertex.
    pub first: u32,
    /// Number of vertices.
    pub count: u32,
}

/// An indexed draw reading element indices from the bound index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawElements {
    /// Primitive topology.
    pub mode: PrimitiveMode,
    /// Number of indices.
    pub count: u32,
    /// Width of each index.
    pub index_type: IndexType,
    /// Byte offset of the first index within the index buffer.
    pub offset: u64,
}

/// One abstract draw call, closed over the device's draw primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawOperation {
    /// Plain array draw.
    Arrays(DrawArrays),
    /// Plain indexed draw.
    Elements(DrawElements),
    /// Instanced array draw.
    ArraysInstanced {
        /// The underlying array draw.
        call: DrawArrays,
        /// Number of instances.
        instances: u32,
    },
    /// Instanced indexed draw.
    ElementsInstanced {
        /// The underlying indexed draw.
        call: DrawElements,
        /// Number of instances.
        instances: u32,
    },
}

impl DrawOperation {
    /// Primitive topology of the operation.
    pub fn mode(&self) -> PrimitiveMode {
        match self {
            Self::Arrays(call) | Self::ArraysInstanced { call, .. } => call.mode,
            Self::Elements(call) | Self::ElementsInstanced { call, .. } => call.mode,
        }
    }

    /// Whether this is an instanced variant.
    pub fn is_instanced(&self) -> bool {
        matches!(
            self,
            Self::ArraysInstanced { .. } | Self::ElementsInstanced { .. }
        )
    }
}
