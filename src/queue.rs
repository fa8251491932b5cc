//! Per-frame draw collection, sorting and replay.
//!
//! A [`CommandQueue`] gathers every draw request of the current frame into
//! typed buckets, one per [`DrawOperation`] variant. [`finish_frame`]
//! flattens the buckets into a single sequence sorted by
//! `(pipeline, vertex format)`, the two most expensive device state
//! changes, and replays it, rebinding state only when the next entry
//! actually differs. The queue holds no cross-frame state.
//!
//! The per-frame protocol is single-threaded and cooperative: collection
//! ends when [`finish_frame`] begins, which the `&mut self` receivers
//! enforce by construction.
//!
//! [`finish_frame`]: CommandQueue::finish_frame

use glam::Mat4;

use crate::device::{CameraUniforms, Device, PipelineHandle, ShaderPipeline, VertexFormatHandle};
use crate::draw::{DrawArrays, DrawElements, DrawOperation};
use crate::mesh::Drawable;

/// Per-entry state shared by all bucket kinds.
#[derive(Debug, Clone, Copy)]
struct EntryKey {
    pipeline: PipelineHandle,
    transform_location: u32,
    format: VertexFormatHandle,
    transform_index: u32,
}

#[derive(Debug, Clone, Copy)]
struct SequenceEntry {
    key: EntryKey,
    operation: DrawOperation,
}

/// Hands a drawable somewhere to put its draw operations.
///
/// A collector is bound to the pipeline and per-draw transform of one
/// [`CommandQueue::draw`] call; every submitted operation is tagged with
/// them plus the vertex format it needs.
pub struct DrawCollector<'a> {
    queue: &'a mut CommandQueue,
    pipeline: PipelineHandle,
    transform_location: u32,
    transform_index: u32,
}

impl DrawCollector<'_> {
    /// Append one draw operation using the given vertex format.
    pub fn submit(&mut self, format: VertexFormatHandle, operation: DrawOperation) {
        let key = EntryKey {
            pipeline: self.pipeline,
            transform_location: self.transform_location,
            format,
            transform_index: self.transform_index,
        };
        match operation {
            DrawOperation::Arrays(call) => self.queue.arrays.push((call, key)),
            DrawOperation::Elements(call) => self.queue.elements.push((call, key)),
            DrawOperation::ArraysInstanced { call, instances } => {
                self.queue.arrays_instanced.push((call, instances, key))
            }
            DrawOperation::ElementsInstanced { call, instances } => {
                self.queue.elements_instanced.push((call, instances, key))
            }
        }
    }
}

/// Collects a frame's draw requests and replays them sorted.
///
/// # Example
///
/// ```no_run
/// use draw_batcher::{CommandQueue, PipelineHandle, ShaderPipeline};
///
/// # fn demo(device: &mut dyn draw_batcher::Device,
/// #         camera: &dyn draw_batcher::CameraUniforms,
/// #         mesh: &draw_batcher::Mesh) {
/// let pipeline = ShaderPipeline::new(PipelineHandle::from_raw(1), 0);
/// let mut queue = CommandQueue::new();
/// queue.draw(mesh, &pipeline, glam::Mat4::IDENTITY);
/// queue.finish_frame(device, camera);
/// # }
/// ```
#[derive(Default)]
pub struct CommandQueue {
    transforms: Vec<Mat4>,
    arrays: Vec<(DrawArrays, EntryKey)>,
    elements: Vec<(DrawElements, EntryKey)>,
    arrays_instanced: Vec<(DrawArrays, u32, EntryKey)>,
    elements_instanced: Vec<(DrawElements, u32, EntryKey)>,
    // Scratch for the sorted replay; kept to reuse its allocation.
    sequence: Vec<SequenceEntry>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations collected so far this frame.
    pub fn pending_draws(&self) -> usize {
        self.arrays.len()
            + self.elements.len()
            + self.arrays_instanced.len()
            + self.elements_instanced.len()
    }

    /// Enqueue a drawable with the pipeline and per-draw transform to use.
    ///
    /// The transform is shared by every operation the drawable emits for
    /// this call.
    pub fn draw(&mut self, drawable: &dyn Drawable, pipeline: &ShaderPipeline, transform: Mat4) {
        let transform_index = self.transforms.len() as u32;
        self.transforms.push(transform);

        let mut collector = DrawCollector {
            pipeline: pipeline.handle(),
            transform_location: pipeline.transform_location(),
            transform_index,
            queue: self,
        };
        drawable.collect_draws(&mut collector);
    }

    /// Sort and replay the collected frame, then clear all frame state.
    ///
    /// Entries are ordered by `(pipeline, vertex format)` so operations
    /// sharing those states run back to back; the replay rebinds pipeline,
    /// vertex format and transform only when the next entry's value differs,
    /// and issues every draw unconditionally. The camera binds once before
    /// replay. Tie-break order among entries sharing both sort keys is
    /// unspecified.
    pub fn finish_frame(&mut self, device: &mut dyn Device, camera: &dyn CameraUniforms) {
        for (call, key) in self.arrays.drain(..) {
            self.sequence.push(SequenceEntry {
                key,
                operation: DrawOperation::Arrays(call),
            });
        }
        for (call, key) in self.elements.drain(..) {
            self.sequence.push(SequenceEntry {
                key,
                operation: DrawOperation::Elements(call),
            });
        }
        for (call, instances, key) in self.arrays_instanced.drain(..) {
            self.sequence.push(SequenceEntry {
                key,
                operation: DrawOperation::ArraysInstanced { call, instances },
            });
        }
        for (call, instances, key) in self.elements_instanced.drain(..) {
            self.sequence.push(SequenceEntry {
                key,
                operation: DrawOperation::ElementsInstanced { call, instances },
            });
        }

        self.sequence
            .sort_unstable_by_key(|entry| (entry.key.pipeline, entry.key.format));

        camera.bind(device);

        let mut bound_pipeline: Option<PipelineHandle> = None;
        let mut bound_format: Option<VertexFormatHandle> = None;
        let mut uploaded_transform: Option<u32> = None;

        for entry in &self.sequence {
            if bound_pipeline != Some(entry.key.pipeline) {
                device.bind_pipeline(entry.key.pipeline);
                bound_pipeline = Some(entry.key.pipeline);
            }
            if bound_format != Some(entry.key.format) {
                device.bind_vertex_format(entry.key.format);
                bound_format = Some(entry.key.format);
            }
            if uploaded_transform != Some(entry.key.transform_index) {
                device.set_transform(
                    entry.key.transform_location,
                    &self.transforms[entry.key.transform_index as usize],
                );
                uploaded_transform = Some(entry.key.transform_index);
            }
            device.draw(&entry.operation);
        }

        log::trace!("frame replayed: {} draw operations", self.sequence.len());
        self.sequence.clear();
        self.transforms.clear();
    }
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareDevice;
    use crate::draw::PrimitiveMode;
    use crate::error::Result;
    use std::cell::Cell;

    struct TestDrawable {
        format: VertexFormatHandle,
        operation: DrawOperation,
    }

    impl TestDrawable {
        fn arrays(device: &mut SoftwareDevice, count: u32) -> Result<Self> {
            Ok(Self {
                format: device.create_vertex_format()?,
                operation: DrawOperation::Arrays(DrawArrays {
                    mode: PrimitiveMode::Triangles,
                    first: 0,
                    count,
                }),
            })
        }

        fn with_format(format: VertexFormatHandle, count: u32) -> Self {
            Self {
                format,
                operation: DrawOperation::Arrays(DrawArrays {
                    mode: PrimitiveMode::Triangles,
                    first: 0,
                    count,
                }),
            }
        }
    }

    impl Drawable for TestDrawable {
        fn collect_draws(&self, collector: &mut DrawCollector<'_>) {
            collector.submit(self.format, self.operation);
        }
    }

    #[derive(Default)]
    struct CountingCamera {
        binds: Cell<u32>,
    }

    impl CameraUniforms for CountingCamera {
        fn bind(&self, _device: &mut dyn Device) {
            self.binds.set(self.binds.get() + 1);
        }
    }

    fn pipeline(raw: u64) -> ShaderPipeline {
        ShaderPipeline::new(PipelineHandle::from_raw(raw), 0)
    }

    #[test]
    fn test_sort_clusters_by_pipeline() {
        let mut device = SoftwareDevice::new();
        let camera = CountingCamera::default();

        let format_x = device.create_vertex_format().unwrap();
        let format_y = device.create_vertex_format().unwrap();
        let on_x = TestDrawable::with_format(format_x, 3);
        let on_y = TestDrawable::with_format(format_y, 3);

        let a = pipeline(1);
        let b = pipeline(2);

        let mut queue = CommandQueue::new();
        // Interleaved on purpose: pipelines {A, B, A}, formats {X, X, Y}.
        queue.draw(&on_x, &a, Mat4::IDENTITY);
        queue.draw(&on_x, &b, Mat4::IDENTITY);
        queue.draw(&on_y, &a, Mat4::IDENTITY);
        assert_eq!(queue.pending_draws(), 3);

        queue.finish_frame(&mut device, &camera);

        // Both pipeline-A entries ran back to back: A is bound once, B once.
        let stats = device.stats();
        assert_eq!(stats.pipeline_binds, 2);
        assert_eq!(stats.draw_calls, 3);
        assert_eq!(camera.binds.get(), 1);
    }

    #[test]
    fn test_redundant_state_is_elided() {
        let mut device = SoftwareDevice::new();
        let camera = CountingCamera::default();

        let drawable = TestDrawable::arrays(&mut device, 6).unwrap();
        let p = pipeline(1);

        let mut queue = CommandQueue::new();
        for _ in 0..4 {
            queue.draw(&drawable, &p, Mat4::IDENTITY);
        }
        queue.finish_frame(&mut device, &camera);

        let stats = device.stats();
        assert_eq!(stats.pipeline_binds, 1);
        assert_eq!(stats.format_binds, 1);
        // Draws never collapse, and each has its own transform entry.
        assert_eq!(stats.draw_calls, 4);
        assert_eq!(stats.transform_uploads, 4);
    }

    #[test]
    fn test_shared_transform_uploads_once() {
        let mut device = SoftwareDevice::new();
        let camera = CountingCamera::default();

        let format = device.create_vertex_format().unwrap();

        // One drawable emitting two operations from a single draw() call:
        // both share the transform entry, so it uploads once.
        struct Pair {
            format: VertexFormatHandle,
        }
        impl Drawable for Pair {
            fn collect_draws(&self, collector: &mut DrawCollector<'_>) {
                let call = DrawArrays {
                    mode: PrimitiveMode::Points,
                    first: 0,
                    count: 1,
                };
                collector.submit(self.format, DrawOperation::Arrays(call));
                collector.submit(self.format, DrawOperation::Arrays(call));
            }
        }

        let mut queue = CommandQueue::new();
        queue.draw(&Pair { format }, &pipeline(1), Mat4::IDENTITY);
        queue.finish_frame(&mut device, &camera);

        let stats = device.stats();
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.transform_uploads, 1);
    }

    #[test]
    fn test_variant_buckets_all_replay() {
        let mut device = SoftwareDevice::new();
        let camera = CountingCamera::default();
        let format = device.create_vertex_format().unwrap();

        struct AllKinds {
            format: VertexFormatHandle,
        }
        impl Drawable for AllKinds {
            fn collect_draws(&self, collector: &mut DrawCollector<'_>) {
                let arrays = DrawArrays {
                    mode: PrimitiveMode::Triangles,
                    first: 0,
                    count: 3,
                };
                let elements = DrawElements {
                    mode: PrimitiveMode::Triangles,
                    count: 3,
                    index_type: crate::draw::IndexType::U32,
                    offset: 0,
                };
                collector.submit(self.format, DrawOperation::Arrays(arrays));
                collector.submit(self.format, DrawOperation::Elements(elements));
                collector.submit(
                    self.format,
                    DrawOperation::ArraysInstanced {
                        call: arrays,
                        instances: 2,
                    },
                );
                collector.submit(
                    self.format,
                    DrawOperation::ElementsInstanced {
                        call: elements,
                        instances: 2,
                    },
                );
            }
        }

        let mut queue = CommandQueue::new();
        queue.draw(&AllKinds { format }, &pipeline(1), Mat4::IDENTITY);
        assert_eq!(queue.pending_draws(), 4);

        queue.finish_frame(&mut device, &camera);
        assert_eq!(device.stats().draw_calls, 4);
    }

    #[test]
    fn test_frame_state_is_cleared() {
        let mut device = SoftwareDevice::new();
        let camera = CountingCamera::default();
        let drawable = TestDrawable::arrays(&mut device, 3).unwrap();

        let mut queue = CommandQueue::new();
        queue.draw(&drawable, &pipeline(1), Mat4::IDENTITY);
        queue.finish_frame(&mut device, &camera);
        assert_eq!(queue.pending_draws(), 0);

        device.reset_stats();
        queue.finish_frame(&mut device, &camera);
        assert_eq!(device.stats().draw_calls, 0);
        assert_eq!(camera.binds.get(), 2);
    }
}
