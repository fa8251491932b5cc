//! # draw-batcher
//!
//! Device-memory management and draw-call batching for stateful graphics
//! devices.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`AllocationRegistry`] - First-fit sub-allocator over a fixed-size
//!   buffer address space
//! - [`VertexBuffer`] - Section store placing attribute arrays inside one
//!   device buffer
//! - [`AttributeBindings`] - Deduplicating cache for vertex-input bind calls
//! - [`Mesh`] / [`InstancedMesh`] - Drawable geometry emitting abstract
//!   draw operations
//! - [`CommandQueue`] - Per-frame collection, `(pipeline, vertex format)`
//!   sorting, and state-change-minimizing replay
//! - [`Device`] - The narrow device trait, with [`SoftwareDevice`] as the
//!   in-tree CPU backend for tests and development
//!
//! ## Example
//!
//! ```
//! use draw_batcher::{
//!     CommandQueue, Mesh, PipelineHandle, ShaderPipeline, SoftwareDevice,
//! };
//!
//! struct NoCamera;
//! impl draw_batcher::CameraUniforms for NoCamera {
//!     fn bind(&self, _device: &mut dyn draw_batcher::Device) {}
//! }
//!
//! let mut device = SoftwareDevice::new();
//! let triangle = [glam::Vec3::ZERO, glam::Vec3::X, glam::Vec3::Y];
//! let mesh = Mesh::new(&mut device, &triangle, &[], &[], &[]).unwrap();
//!
//! let pipeline = ShaderPipeline::new(PipelineHandle::from_raw(1), 0);
//! let mut queue = CommandQueue::new();
//! queue.draw(&mesh, &pipeline, glam::Mat4::IDENTITY);
//! queue.finish_frame(&mut device, &NoCamera);
//!
//! assert_eq!(device.stats().draw_calls, 1);
//! ```

pub mod backend;
pub mod bindings;
pub mod buffer;
pub mod device;
pub mod draw;
pub mod error;
pub mod layout;
pub mod mesh;
pub mod queue;
pub mod registry;

// Re-export main types for convenience
pub use backend::{DeviceStats, SoftwareDevice};
pub use bindings::{AttributeBindings, BufferBinding};
pub use buffer::{SectionDescriptor, SectionSource, VertexBuffer};
pub use device::{
    BufferDescriptor, BufferHandle, BufferUsage, CameraUniforms, Device, PipelineHandle,
    ShaderPipeline, VertexFormatHandle,
};
pub use draw::{DrawArrays, DrawElements, DrawOperation, IndexType, PrimitiveMode};
pub use error::{GraphicsError, Result};
pub use layout::{AttributeSequence, ScalarType, VertexAttribute, VertexData};
pub use mesh::{
    Drawable, InstanceDataHandle, InstancedMesh, Mesh, NORMAL_LOCATION, POSITION_LOCATION,
    UV_LOCATION,
};
pub use queue::{CommandQueue, DrawCollector};
pub use registry::AllocationRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the batching layer.
///
/// Optional; only emits the startup log line.
pub fn init() {
    log::info!("draw-batcher v{} initialized", VERSION);
}
