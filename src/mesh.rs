//! Drawable geometry.
//!
//! A [`Mesh`] composes a section store and an attribute binding cache into a
//! renderable primitive set. It never draws directly: through the
//! [`Drawable`] trait it emits abstract draw operations into a collector,
//! and the command queue decides when the device actually sees them.
//!
//! [`InstancedMesh`] extends a mesh with instance-attribute sections managed
//! through stable handles, growing its instance store on demand.

use std::collections::HashMap;

use glam::{Vec2, Vec3};

use crate::bindings::AttributeBindings;
use crate::buffer::{SectionSource, VertexBuffer};
use crate::device::Device;
use crate::draw::{DrawArrays, DrawElements, DrawOperation, IndexType, PrimitiveMode};
use crate::error::{GraphicsError, Result};
use crate::layout::AttributeSequence;
use crate::queue::DrawCollector;

/// Vertex-input location of the position attribute.
pub const POSITION_LOCATION: u32 = 0;
/// Vertex-input location of the normal attribute.
pub const NORMAL_LOCATION: u32 = 1;
/// Vertex-input location of the texture-coordinate attribute.
pub const UV_LOCATION: u32 = 2;

/// Anything that can be drawn by the command queue.
///
/// This is the sole extension point between geometry and the queue: a
/// drawable emits its operations into the collector it is handed and never
/// touches the device itself.
pub trait Drawable {
    /// Emit this drawable's draw operations into `collector`.
    fn collect_draws(&self, collector: &mut DrawCollector<'_>);
}

#[derive(Debug, Clone, Copy)]
enum Indexing {
    Arrays { first: u32 },
    Elements { index_type: IndexType, offset: u64 },
}

/// A geometric mesh with per-vertex attribute streams.
///
/// Each supplied stream (positions, optionally normals and texture
/// coordinates) becomes its own section of the mesh's buffer, bound to the
/// fixed locations [`POSITION_LOCATION`], [`NORMAL_LOCATION`] and
/// [`UV_LOCATION`]. A non-empty index slice switches the mesh to indexed
/// drawing.
pub struct Mesh {
    store: VertexBuffer,
    bindings: AttributeBindings,
    mode: PrimitiveMode,
    element_count: u32,
    indexing: Indexing,
}

impl Mesh {
    /// Create a mesh from vertex data.
    ///
    /// `positions` must be non-empty; `normals` and `uvs` must be empty or
    /// match its length; `indices` may be empty for non-indexed drawing.
    pub fn new(
        device: &mut dyn Device,
        positions: &[Vec3],
        normals: &[Vec3],
        uvs: &[Vec2],
        indices: &[u32],
    ) -> Result<Self> {
        if positions.is_empty() {
            return Err(GraphicsError::EmptyMesh);
        }
        if !normals.is_empty() && normals.len() != positions.len() {
            return Err(GraphicsError::FormatMismatch {
                expected: positions.len(),
                provided: normals.len(),
            });
        }
        if !uvs.is_empty() && uvs.len() != positions.len() {
            return Err(GraphicsError::FormatMismatch {
                expected: positions.len(),
                provided: uvs.len(),
            });
        }

        let capacity = (positions.len() * 12 + normals.len() * 12 + uvs.len() * 8) as u64
            + (indices.len() * 4) as u64;
        let mut store = VertexBuffer::new(device, capacity)?;
        let mut bindings = AttributeBindings::new(device)?;

        let vertex_count = positions.len() as u64;
        store.add_data(
            device,
            SectionSource::bytes_of(positions),
            vertex_count,
            AttributeSequence::new().with_attribute_of::<Vec3>(),
        )?;
        bindings.bind_attributes(device, &store, 0, &[POSITION_LOCATION], 0)?;

        if !normals.is_empty() {
            let index = store.section_count();
            store.add_data(
                device,
                SectionSource::bytes_of(normals),
                vertex_count,
                AttributeSequence::new().with_attribute_of::<Vec3>(),
            )?;
            bindings.bind_attributes(device, &store, index, &[NORMAL_LOCATION], 0)?;
        }

        if !uvs.is_empty() {
            let index = store.section_count();
            store.add_data(
                device,
                SectionSource::bytes_of(uvs),
                vertex_count,
                AttributeSequence::new().with_attribute_of::<Vec2>(),
            )?;
            bindings.bind_attributes(device, &store, index, &[UV_LOCATION], 0)?;
        }

        let (element_count, indexing) = if indices.is_empty() {
            (positions.len() as u32, Indexing::Arrays { first: 0 })
        } else {
            let index = store.section_count();
            store.add_data(
                device,
                SectionSource::bytes_of(indices),
                indices.len() as u64,
                AttributeSequence::new().with_attribute_of::<u32>(),
            )?;
            bindings.bind_index_buffer(device, &store);
            let offset = store.section(index)?.offset();
            (
                indices.len() as u32,
                Indexing::Elements {
                    index_type: IndexType::U32,
                    offset,
                },
            )
        };

        Ok(Self {
            store,
            bindings,
            mode: PrimitiveMode::Triangles,
            element_count,
            indexing,
        })
    }

    /// The primitive topology the mesh draws with.
    pub fn draw_mode(&self) -> PrimitiveMode {
        self.mode
    }

    /// Change the primitive topology.
    pub fn set_draw_mode(&mut self, mode: PrimitiveMode) {
        self.mode = mode;
    }

    /// Whether this mesh uses indexed drawing.
    pub fn is_indexed(&self) -> bool {
        matches!(self.indexing, Indexing::Elements { .. })
    }

    /// Number of vertices (or indices, when indexed) per draw.
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// The section store holding the mesh's attribute data.
    pub fn store(&self) -> &VertexBuffer {
        &self.store
    }

    /// The mesh's attribute binding cache.
    pub fn bindings(&self) -> &AttributeBindings {
        &self.bindings
    }

    /// Destroy the mesh's device resources.
    pub fn release(self, device: &mut dyn Device) {
        self.bindings.release(device);
        self.store.release(device);
    }

    fn arrays_call(&self) -> DrawArrays {
        let first = match self.indexing {
            Indexing::Arrays { first } => first,
            Indexing::Elements { .. } => 0,
        };
        DrawArrays {
            mode: self.mode,
            first,
            count: self.element_count,
        }
    }

    fn elements_call(&self, index_type: IndexType, offset: u64) -> DrawElements {
        DrawElements {
            mode: self.mode,
            count: self.element_count,
            index_type,
            offset,
        }
    }

    fn operation(&self) -> DrawOperation {
        match self.indexing {
            Indexing::Arrays { .. } => DrawOperation::Arrays(self.arrays_call()),
            Indexing::Elements { index_type, offset } => {
                DrawOperation::Elements(self.elements_call(index_type, offset))
            }
        }
    }
}

impl Drawable for Mesh {
    fn collect_draws(&self, collector: &mut DrawCollector<'_>) {
        collector.submit(self.bindings.format(), self.operation());
    }
}

/// Stable key for one instance-attribute section of an [`InstancedMesh`].
///
/// Handles increase monotonically and are never reused, so a stale handle is
/// always detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceDataHandle(u64);

impl InstanceDataHandle {
    /// The raw handle value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct InstanceData {
    locations: Vec<u32>,
    section_index: usize,
    step_rate: u32,
}

/// A mesh drawn many times per call, with per-instance attribute sections.
///
/// Instance data lives in its own section store that doubles in capacity
/// whenever a new section does not fit; every surviving section is rebound
/// after such a grow because its offset may have moved.
pub struct InstancedMesh {
    mesh: Mesh,
    instance_store: VertexBuffer,
    descriptors: HashMap<InstanceDataHandle, InstanceData>,
    next_handle: u64,
    instance_count: u32,
}

impl InstancedMesh {
    /// Create an instanced mesh; `instance_capacity` sizes the initial
    /// instance-data store in bytes.
    pub fn new(
        device: &mut dyn Device,
        positions: &[Vec3],
        normals: &[Vec3],
        uvs: &[Vec2],
        indices: &[u32],
        instance_capacity: u64,
    ) -> Result<Self> {
        Ok(Self {
            mesh: Mesh::new(device, positions, normals, uvs, indices)?,
            instance_store: VertexBuffer::new(device, instance_capacity.max(1))?,
            descriptors: HashMap::new(),
            next_handle: 0,
            instance_count: 0,
        })
    }

    /// Number of instances drawn per draw call.
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Set the number of instances drawn per draw call.
    pub fn set_instance_count(&mut self, count: u32) {
        self.instance_count = count;
    }

    /// The underlying non-instanced mesh.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// The store holding instance-attribute sections.
    pub fn instance_store(&self) -> &VertexBuffer {
        &self.instance_store
    }

    /// Whether `handle` refers to live instance data.
    pub fn contains_handle(&self, handle: InstanceDataHandle) -> bool {
        self.descriptors.contains_key(&handle)
    }

    /// Add a section of per-instance attributes and bind it to `locations`.
    ///
    /// Attributes advance once every `step_rate` instances (a step rate of
    /// zero makes them ordinary per-vertex attributes). The instance store
    /// doubles until the section fits, rebinding surviving sections whose
    /// offsets moved.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::FormatMismatch`] when `locations` does not supply one
    /// location per attribute; checked before any allocation.
    pub fn add_instance_data(
        &mut self,
        device: &mut dyn Device,
        locations: &[u32],
        attributes: AttributeSequence,
        count: u64,
        source: SectionSource<'_>,
        step_rate: u32,
    ) -> Result<InstanceDataHandle> {
        attributes.check_locations(locations)?;

        self.ensure_instance_capacity(device, attributes.data_size(count))?;
        self.instance_store
            .add_data(device, source, count, attributes)?;
        let section_index = self.instance_store.section_count() - 1;

        self.mesh.bindings.bind_attributes(
            device,
            &self.instance_store,
            section_index,
            locations,
            step_rate,
        )?;

        let handle = InstanceDataHandle(self.next_handle);
        self.next_handle += 1;
        self.descriptors.insert(
            handle,
            InstanceData {
                locations: locations.to_vec(),
                section_index,
                step_rate,
            },
        );
        Ok(handle)
    }

    /// Rewrite the instance data behind `handle`.
    ///
    /// With an unchanged `count` the section is updated in place. A changed
    /// count discards and rebuilds the section with the same attribute
    /// sequence, growing the store first when needed; if the rebuild fails,
    /// the instance data is removed and the handle invalidated.
    pub fn update_instance_data(
        &mut self,
        device: &mut dyn Device,
        handle: InstanceDataHandle,
        count: u64,
        source: SectionSource<'_>,
    ) -> Result<()> {
        let section_index = self
            .descriptors
            .get(&handle)
            .map(|data| data.section_index)
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))?;

        let section = self.instance_store.section(section_index)?;
        if count == section.vertex_count() {
            return self.instance_store.update_data(device, section_index, source);
        }

        // The count changed: rebuild the section with its old format. The
        // descriptor comes out of the map first so the rebind pass during a
        // grow never sees its dead index.
        let attributes = section.attributes().clone();
        let data = self
            .descriptors
            .remove(&handle)
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))?;
        self.discard_section_at(section_index)?;

        self.ensure_instance_capacity(device, attributes.data_size(count))?;
        self.instance_store
            .add_data(device, source, count, attributes)?;
        let new_index = self.instance_store.section_count() - 1;

        self.mesh.bindings.bind_attributes(
            device,
            &self.instance_store,
            new_index,
            &data.locations,
            data.step_rate,
        )?;

        self.descriptors.insert(
            handle,
            InstanceData {
                section_index: new_index,
                ..data
            },
        );
        Ok(())
    }

    /// Discard the instance data behind `handle` and unbind its locations.
    pub fn remove_instance_data(
        &mut self,
        device: &mut dyn Device,
        handle: InstanceDataHandle,
    ) -> Result<()> {
        let data = self
            .descriptors
            .remove(&handle)
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))?;
        self.discard_section_at(data.section_index)?;
        for location in &data.locations {
            self.mesh.bindings.unbind_attribute(device, *location);
        }
        Ok(())
    }

    /// Destroy the mesh's device resources, instance store included.
    pub fn release(self, device: &mut dyn Device) {
        self.instance_store.release(device);
        self.mesh.release(device);
    }

    /// Grow the instance store until a `section_size`-byte section fits,
    /// rebinding every surviving section afterwards.
    fn ensure_instance_capacity(
        &mut self,
        device: &mut dyn Device,
        section_size: u64,
    ) -> Result<()> {
        if self.instance_store.max_new_section_size() >= section_size {
            return Ok(());
        }

        let current = self.instance_store.capacity();
        let mut new_capacity = current.max(1) * 2;
        while new_capacity < current + section_size {
            new_capacity *= 2;
        }
        self.instance_store.grow(device, new_capacity)?;

        // Offsets may have moved with the data.
        for data in self.descriptors.values() {
            self.mesh.bindings.bind_attributes(
                device,
                &self.instance_store,
                data.section_index,
                &data.locations,
                data.step_rate,
            )?;
        }
        Ok(())
    }

    fn discard_section_at(&mut self, index: usize) -> Result<()> {
        self.instance_store.discard_data(index)?;
        for data in self.descriptors.values_mut() {
            if data.section_index > index {
                data.section_index -= 1;
            }
        }
        Ok(())
    }
}

impl Drawable for InstancedMesh {
    fn collect_draws(&self, collector: &mut DrawCollector<'_>) {
        let format = self.mesh.bindings.format();
        let operation = match self.mesh.indexing {
            Indexing::Arrays { .. } => DrawOperation::ArraysInstanced {
                call: self.mesh.arrays_call(),
                instances: self.instance_count,
            },
            Indexing::Elements { index_type, offset } => DrawOperation::ElementsInstanced {
                call: self.mesh.elements_call(index_type, offset),
                instances: self.instance_count,
            },
        };
        collector.submit(format, operation);
    }
}

static_assertions::assert_impl_all!(Mesh: Send, Sync);
static_assertions::assert_impl_all!(InstancedMesh: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareDevice;
    use crate::layout::ScalarType;

    fn triangle() -> Vec<Vec3> {
        vec![Vec3::ZERO, Vec3::X, Vec3::Y]
    }

    fn quad_positions() -> Vec<Vec3> {
        vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE]
    }

    #[test]
    fn test_mesh_requires_positions() {
        let mut device = SoftwareDevice::new();
        let result = Mesh::new(&mut device, &[], &[], &[], &[]);
        assert!(matches!(result, Err(GraphicsError::EmptyMesh)));
    }

    #[test]
    fn test_mesh_stream_length_mismatch() {
        let mut device = SoftwareDevice::new();
        let result = Mesh::new(&mut device, &triangle(), &[Vec3::Z; 2], &[], &[]);
        assert_eq!(
            result.err(),
            Some(GraphicsError::FormatMismatch {
                expected: 3,
                provided: 2
            })
        );
    }

    #[test]
    fn test_mesh_sections_per_stream() {
        let mut device = SoftwareDevice::new();
        let uvs = vec![Vec2::ZERO, Vec2::X, Vec2::Y];
        let mesh = Mesh::new(&mut device, &triangle(), &triangle(), &uvs, &[]).unwrap();

        assert_eq!(mesh.store().section_count(), 3);
        assert!(!mesh.is_indexed());
        assert_eq!(mesh.element_count(), 3);

        // Positions, normals and UVs each get their own enabled location.
        let format = mesh.bindings().format();
        assert!(device.attribute_enabled(format, POSITION_LOCATION));
        assert!(device.attribute_enabled(format, NORMAL_LOCATION));
        assert!(device.attribute_enabled(format, UV_LOCATION));
        assert_eq!(
            device.attribute_format(format, UV_LOCATION),
            Some((ScalarType::F32, 2, 0))
        );
    }

    #[test]
    fn test_indexed_mesh_binds_index_buffer() {
        let mut device = SoftwareDevice::new();
        let indices = [0u32, 1, 2, 2, 1, 3];
        let mesh = Mesh::new(&mut device, &quad_positions(), &[], &[], &indices).unwrap();

        assert!(mesh.is_indexed());
        assert_eq!(mesh.element_count(), 6);
        assert_eq!(
            device.index_buffer(mesh.bindings().format()),
            Some(mesh.store().handle())
        );

        // The index section's bytes are the indices verbatim.
        let section = mesh.store().section(1).unwrap();
        let bytes = device
            .read_buffer(mesh.store().handle(), section.offset(), section.size())
            .unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&indices));
    }

    #[test]
    fn test_mesh_operation_kinds() {
        let mut device = SoftwareDevice::new();
        let mut mesh = Mesh::new(&mut device, &triangle(), &[], &[], &[]).unwrap();
        mesh.set_draw_mode(PrimitiveMode::LineLoop);

        match mesh.operation() {
            DrawOperation::Arrays(call) => {
                assert_eq!(call.mode, PrimitiveMode::LineLoop);
                assert_eq!(call.count, 3);
            }
            other => panic!("expected array draw, got {:?}", other),
        }
    }

    fn instance_sequence() -> AttributeSequence {
        AttributeSequence::new().with_attribute_of::<glam::Vec4>()
    }

    const INSTANCE_LOCATION: u32 = 3;

    #[test]
    fn test_add_instance_data_binds_with_step_rate() {
        let mut device = SoftwareDevice::new();
        let mut mesh =
            InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 256).unwrap();

        let offsets = [glam::Vec4::ZERO, glam::Vec4::ONE];
        let handle = mesh
            .add_instance_data(
                &mut device,
                &[INSTANCE_LOCATION],
                instance_sequence(),
                2,
                SectionSource::bytes_of(&offsets),
                1,
            )
            .unwrap();

        assert!(mesh.contains_handle(handle));
        let format = mesh.mesh().bindings().format();
        let slot = device.attribute_slot(format, INSTANCE_LOCATION).unwrap();
        assert_eq!(device.slot_binding(format, slot).unwrap().3, 1);
    }

    #[test]
    fn test_add_instance_data_location_mismatch() {
        let mut device = SoftwareDevice::new();
        let mut mesh =
            InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 256).unwrap();

        let result = mesh.add_instance_data(
            &mut device,
            &[3, 4],
            instance_sequence(),
            1,
            SectionSource::bytes_of(&[glam::Vec4::ZERO]),
            1,
        );
        assert_eq!(
            result.err(),
            Some(GraphicsError::FormatMismatch {
                expected: 1,
                provided: 2
            })
        );
        assert_eq!(mesh.instance_store().section_count(), 0);
    }

    #[test]
    fn test_instance_store_grows_and_preserves_data() {
        let mut device = SoftwareDevice::new();
        let mut mesh = InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 32).unwrap();

        let first = [glam::Vec4::splat(1.0)];
        let handle = mesh
            .add_instance_data(
                &mut device,
                &[3],
                instance_sequence(),
                1,
                SectionSource::bytes_of(&first),
                1,
            )
            .unwrap();

        // 64 bytes cannot fit next to the 16 already used in a 32-byte store.
        let second = [glam::Vec4::splat(2.0); 4];
        mesh.add_instance_data(
            &mut device,
            &[4],
            instance_sequence(),
            4,
            SectionSource::bytes_of(&second),
            1,
        )
        .unwrap();

        assert!(mesh.instance_store().capacity() >= 80);
        assert!(mesh.contains_handle(handle));

        // The first section's bytes survived the move.
        let section = mesh.instance_store().section(0).unwrap();
        let bytes = device
            .read_buffer(
                mesh.instance_store().handle(),
                section.offset(),
                section.size(),
            )
            .unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<glam::Vec4, u8>(&first));

        // The rebind after growth points location 3 at the moved section.
        let format = mesh.mesh().bindings().format();
        let slot = device.attribute_slot(format, 3).unwrap();
        assert_eq!(
            device.slot_binding(format, slot).unwrap().1,
            section.offset()
        );
    }

    #[test]
    fn test_update_instance_data_in_place() {
        let mut device = SoftwareDevice::new();
        let mut mesh =
            InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 256).unwrap();

        let handle = mesh
            .add_instance_data(
                &mut device,
                &[3],
                instance_sequence(),
                2,
                SectionSource::bytes_of(&[glam::Vec4::ZERO; 2]),
                1,
            )
            .unwrap();
        let offset_before = mesh.instance_store().section(0).unwrap().offset();

        let replacement = [glam::Vec4::splat(5.0); 2];
        mesh.update_instance_data(
            &mut device,
            handle,
            2,
            SectionSource::bytes_of(&replacement),
        )
        .unwrap();

        let section = mesh.instance_store().section(0).unwrap();
        assert_eq!(section.offset(), offset_before);
        let bytes = device
            .read_buffer(
                mesh.instance_store().handle(),
                section.offset(),
                section.size(),
            )
            .unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<glam::Vec4, u8>(&replacement));
    }

    #[test]
    fn test_update_instance_data_with_new_count() {
        let mut device = SoftwareDevice::new();
        let mut mesh =
            InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 256).unwrap();

        let handle = mesh
            .add_instance_data(
                &mut device,
                &[3],
                instance_sequence(),
                1,
                SectionSource::bytes_of(&[glam::Vec4::ZERO]),
                1,
            )
            .unwrap();

        let replacement = [glam::Vec4::splat(9.0); 3];
        mesh.update_instance_data(
            &mut device,
            handle,
            3,
            SectionSource::bytes_of(&replacement),
        )
        .unwrap();

        assert!(mesh.contains_handle(handle));
        assert_eq!(mesh.instance_store().section_count(), 1);
        let section = mesh.instance_store().section(0).unwrap();
        assert_eq!(section.vertex_count(), 3);
    }

    #[test]
    fn test_remove_instance_data_unbinds() {
        let mut device = SoftwareDevice::new();
        let mut mesh =
            InstancedMesh::new(&mut device, &triangle(), &[], &[], &[], 256).unwrap();

        let a = mesh
            .add_instance_data(
                &mut device,
                &[3],
                instance_sequence(),
                1,
                SectionSource::bytes_of(&[glam::Vec4::ZERO]),
                1,
            )
            .unwrap();
        let b = mesh
            .add_instance_data(
                &mut device,
                &[4],
                instance_sequence(),
                1,
                SectionSource::bytes_of(&[glam::Vec4::ONE]),
                1,
            )
            .unwrap();

        mesh.remove_instance_data(&mut device, a).unwrap();

        assert!(!mesh.contains_handle(a));
        assert!(mesh.contains_handle(b));
        assert!(!device.attribute_enabled(mesh.mesh().bindings().format(), 3));
        assert_eq!(mesh.instance_store().section_count(), 1);

        // Removing again reports the stale handle.
        assert_eq!(
            mesh.remove_instance_data(&mut device, a),
            Err(GraphicsError::InvalidHandle(a.raw()))
        );
    }
}
