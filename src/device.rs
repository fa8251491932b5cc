//! Device abstraction.
//!
//! The [`Device`] trait is the narrow interface between the batching layer
//! and a stateful graphics device: buffer storage, vertex-format state,
//! pipeline/transform binding and draw issuance. Everything above it (the
//! section store, the binding cache, the command queue) talks to the device
//! exclusively through this trait, so a real GPU backend and the in-tree
//! [`SoftwareDevice`](crate::SoftwareDevice) are interchangeable.
//!
//! All operations execute synchronously in program order on the calling
//! thread; the device is assumed to be exclusively owned by that thread.

use bitflags::bitflags;
use glam::Mat4;

use crate::draw::DrawOperation;
use crate::error::Result;
use crate::layout::ScalarType;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can source vertex attributes.
        const VERTEX = 1 << 0;
        /// Buffer can source element indices.
        const INDEX = 1 << 1;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 2;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 3;
        /// Buffer is mappable for CPU reads.
        const MAP_READ = 1 << 4;
        /// Buffer is mappable for CPU writes.
        const MAP_WRITE = 1 << 5;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

/// Handle to a device vertex-format object (the per-mesh vertex-input state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexFormatHandle(u64);

/// Handle to an externally compiled pipeline program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(u64);

macro_rules! impl_handle {
    ($($ty:ident),*) => {
        $(impl $ty {
            /// Wrap a raw device-assigned id.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw device-assigned id.
            pub fn raw(self) -> u64 {
                self.0
            }
        })*
    };
}

impl_handle!(BufferHandle, VertexFormatHandle, PipelineHandle);

/// A pipeline program as seen by the command queue: its native handle plus
/// the fixed uniform location of the per-draw transform.
///
/// Compilation and linking happen outside this crate; the queue only sorts
/// on the handle and uploads the transform at the recorded location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderPipeline {
    handle: PipelineHandle,
    transform_location: u32,
}

impl ShaderPipeline {
    /// Describe an externally owned pipeline program.
    pub fn new(handle: PipelineHandle, transform_location: u32) -> Self {
        Self {
            handle,
            transform_location,
        }
    }

    /// The native pipeline handle.
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Uniform location of the per-draw transform.
    pub fn transform_location(&self) -> u32 {
        self.transform_location
    }
}

/// Camera / per-frame uniform state, bound once before replay.
pub trait CameraUniforms {
    /// Bind the camera's uniform state on the device.
    fn bind(&self, device: &mut dyn Device);
}

/// The stateful graphics device consumed by the batching layer.
///
/// Buffer mapping is scoped: [`map_buffer_mut`](Device::map_buffer_mut) hands
/// the mapped range to a closure and unmaps on every exit path, so a mapped
/// pointer can never outlive its window of validity.
pub trait Device {
    /// Create a buffer.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle>;

    /// Destroy a buffer. Destroying an unknown handle is a no-op.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Write `data` into the buffer at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `size` bytes from the buffer at `offset`.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> Result<Vec<u8>>;

    /// Copy `size` bytes between two buffers (which may be the same buffer,
    /// provided the ranges do not overlap).
    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    /// Map a writable buffer range and pass it to `init`; the range is
    /// unmapped when `init` returns.
    fn map_buffer_mut(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        init: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()>;

    /// Create a vertex-format object.
    fn create_vertex_format(&mut self) -> Result<VertexFormatHandle>;

    /// Destroy a vertex-format object. Unknown handles are a no-op.
    fn destroy_vertex_format(&mut self, format: VertexFormatHandle);

    /// Bind a buffer range to a vertex-input slot of the format.
    fn bind_format_buffer(
        &mut self,
        format: VertexFormatHandle,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        stride: u32,
    );

    /// Set the instance step rate (divisor) of a vertex-input slot.
    fn set_slot_step_rate(&mut self, format: VertexFormatHandle, slot: u32, step_rate: u32);

    /// Bind (or with `None`, unbind) the element index buffer of the format.
    fn bind_index_buffer(&mut self, format: VertexFormatHandle, buffer: Option<BufferHandle>);

    /// Associate a vertex-input location with a slot.
    fn set_attribute_slot(&mut self, format: VertexFormatHandle, location: u32, slot: u32);

    /// Specify a float-typed attribute format (native floats, or integers
    /// converted to float, normalized when `normalized` is set).
    fn set_attribute_format_float(
        &mut self,
        format: VertexFormatHandle,
        location: u32,
        scalar: ScalarType,
        len: u32,
        normalized: bool,
        relative_offset: u32,
    );

    /// Specify a native-integer attribute format.
    fn set_attribute_format_int(
        &mut self,
        format: VertexFormatHandle,
        location: u32,
        scalar: ScalarType,
        len: u32,
        relative_offset: u32,
    );

    /// Enable a vertex-input location.
    fn enable_attribute(&mut self, format: VertexFormatHandle, location: u32);

    /// Disable a vertex-input location.
    fn disable_attribute(&mut self, format: VertexFormatHandle, location: u32);

    /// Bind a pipeline program.
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind a vertex-format object for drawing.
    fn bind_vertex_format(&mut self, format: VertexFormatHandle);

    /// Upload the per-draw transform to the given uniform location.
    fn set_transform(&mut self, location: u32, transform: &Mat4);

    /// Issue a draw call.
    fn draw(&mut self, operation: &DrawOperation);
}
