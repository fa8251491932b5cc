//! Vertex buffer section store.
//!
//! A [`VertexBuffer`] owns one fixed-capacity device buffer and divides it
//! into sections: independently sized arrays of interleaved attributes, each
//! described by a [`SectionDescriptor`]. Placement is handled by an
//! [`AllocationRegistry`] over the buffer's byte range.
//!
//! The store never resizes in place. When capacity runs out, callers invoke
//! [`grow`](VertexBuffer::grow), which allocates a larger buffer, copies
//! every live section across on the device, and discards the old buffer.
//! Section offsets may change during a grow, so the owner must re-run
//! attribute binding for each section afterwards.

use crate::device::{BufferDescriptor, BufferHandle, BufferUsage, Device};
use crate::error::{GraphicsError, Result};
use crate::layout::AttributeSequence;
use crate::registry::AllocationRegistry;

/// Describes the contents of one section of a [`VertexBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    attributes: AttributeSequence,
    vertex_count: u64,
    offset: u64,
}

impl SectionDescriptor {
    /// The sequence of attributes composing each vertex of the section.
    pub fn attributes(&self) -> &AttributeSequence {
        &self.attributes
    }

    /// Number of vertices (instances of the attribute sequence).
    pub fn vertex_count(&self) -> u64 {
        self.vertex_count
    }

    /// Byte offset of the section's data within the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the section in bytes.
    pub fn size(&self) -> u64 {
        self.attributes.data_size(self.vertex_count)
    }
}

/// The source of bytes for a new or updated section.
///
/// Covers the three initializer forms: host memory, a region of another
/// device buffer, and a custom callback over the mapped destination range.
pub enum SectionSource<'a> {
    /// Copy from host memory. The slice length must equal the section size.
    Bytes(&'a [u8]),
    /// Device-to-device copy from a region of another buffer.
    Buffer {
        /// Buffer to read from.
        buffer: BufferHandle,
        /// Byte offset into the source buffer.
        offset: u64,
    },
    /// Populate the mapped destination range in place.
    Init(&'a mut dyn FnMut(&mut [u8])),
}

impl<'a> SectionSource<'a> {
    /// View a typed slice as a host-memory source.
    pub fn bytes_of<T: bytemuck::Pod>(data: &'a [T]) -> Self {
        Self::Bytes(bytemuck::cast_slice(data))
    }
}

impl std::fmt::Debug for SectionSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            Self::Buffer { buffer, offset } => f
                .debug_struct("Buffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .finish(),
            Self::Init(_) => f.write_str("Init"),
        }
    }
}

/// A device buffer divided into attribute-data sections.
///
/// # Example
///
/// ```
/// use draw_batcher::{AttributeSequence, SectionSource, SoftwareDevice, VertexBuffer};
///
/// let mut device = SoftwareDevice::new();
/// let mut store = VertexBuffer::new(&mut device, 1024).unwrap();
///
/// let quad = [glam::Vec2::ZERO, glam::Vec2::X, glam::Vec2::Y, glam::Vec2::ONE];
/// let section = store
///     .add_data(
///         &mut device,
///         SectionSource::bytes_of(&quad),
///         quad.len() as u64,
///         AttributeSequence::new().with_attribute_of::<glam::Vec2>(),
///     )
///     .unwrap();
/// assert_eq!(section.size(), 32);
/// ```
#[derive(Debug)]
pub struct VertexBuffer {
    buffer: BufferHandle,
    capacity: u64,
    registry: AllocationRegistry,
    sections: Vec<SectionDescriptor>,
}

impl VertexBuffer {
    /// Create a store with a fixed-capacity device buffer.
    pub fn new(device: &mut dyn Device, capacity: u64) -> Result<Self> {
        let buffer = device.create_buffer(&Self::buffer_descriptor(capacity))?;
        Ok(Self {
            buffer,
            capacity,
            registry: AllocationRegistry::new(capacity),
            sections: Vec::new(),
        })
    }

    fn buffer_descriptor(capacity: u64) -> BufferDescriptor {
        BufferDescriptor::new(
            capacity,
            BufferUsage::VERTEX
                | BufferUsage::INDEX
                | BufferUsage::COPY_SRC
                | BufferUsage::COPY_DST
                | BufferUsage::MAP_WRITE,
        )
        .with_label("section_store")
    }

    /// Handle of the underlying device buffer.
    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    /// Size of the underlying buffer in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of sections the buffer's data is divided into.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Descriptors for all sections, in index order.
    pub fn sections(&self) -> &[SectionDescriptor] {
        &self.sections
    }

    /// The descriptor for the section with the given index.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::InvalidSection`] when `index` is out of range.
    pub fn section(&self, index: usize) -> Result<&SectionDescriptor> {
        self.sections.get(index).ok_or(GraphicsError::InvalidSection {
            index,
            count: self.sections.len(),
        })
    }

    /// The maximum size of a new section given the remaining space.
    pub fn max_new_section_size(&self) -> u64 {
        self.registry.max_allocation()
    }

    /// Copy vertex data into the buffer, creating a new section.
    ///
    /// Existing descriptors keep their index, format, count and offset.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::OutOfMemory`] when no free range fits; the store is
    /// left unchanged, so the caller may [`grow`](Self::grow) and retry.
    /// [`GraphicsError::SizeMismatch`] when a [`SectionSource::Bytes`] length
    /// disagrees with `stride * vertex_count`.
    pub fn add_data(
        &mut self,
        device: &mut dyn Device,
        source: SectionSource<'_>,
        vertex_count: u64,
        attributes: AttributeSequence,
    ) -> Result<&SectionDescriptor> {
        let requested = attributes.data_size(vertex_count);
        match self.try_add_data(device, source, vertex_count, attributes)? {
            Some(section) => Ok(section),
            None => Err(GraphicsError::OutOfMemory { requested }),
        }
    }

    /// Same as [`add_data`](Self::add_data), returning `Ok(None)` when the
    /// allocation fails instead of an error.
    pub fn try_add_data(
        &mut self,
        device: &mut dyn Device,
        source: SectionSource<'_>,
        vertex_count: u64,
        attributes: AttributeSequence,
    ) -> Result<Option<&SectionDescriptor>> {
        let size = attributes.data_size(vertex_count);
        let Some(offset) = self.registry.try_allocate(size) else {
            return Ok(None);
        };

        if let Err(error) = self.write_range(device, offset, size, source) {
            // No partial section: release the range before reporting.
            if size > 0 {
                self.registry.try_deallocate(offset);
            }
            return Err(error);
        }

        self.sections.push(SectionDescriptor {
            attributes,
            vertex_count,
            offset,
        });
        Ok(self.sections.last())
    }

    /// Copy a whole section from another store, creating a new section here.
    pub fn add_section_from(
        &mut self,
        device: &mut dyn Device,
        other: &VertexBuffer,
        index: usize,
    ) -> Result<&SectionDescriptor> {
        let section = other.section(index)?;
        self.add_data(
            device,
            SectionSource::Buffer {
                buffer: other.buffer,
                offset: section.offset,
            },
            section.vertex_count,
            section.attributes.clone(),
        )
    }

    /// Rewrite a section's bytes in place; its format, count and offset are
    /// unchanged and no descriptors are invalidated.
    pub fn update_data(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        source: SectionSource<'_>,
    ) -> Result<()> {
        let section = self.section(index)?;
        let (offset, size) = (section.offset, section.size());
        self.write_range(device, offset, size, source)
    }

    /// Discard the section with the given index.
    ///
    /// Descriptors at greater indices shift down by one; their offsets and
    /// byte contents are unaffected.
    pub fn discard_data(&mut self, index: usize) -> Result<()> {
        let section = self.section(index)?;
        if section.size() > 0 {
            self.registry.deallocate(section.offset)?;
        }
        self.sections.remove(index);
        Ok(())
    }

    /// Replace the backing buffer with a larger one, moving every section.
    ///
    /// Sections keep their identity, index, format, count and contents, but
    /// their offsets may change: the owner must re-run attribute binding for
    /// each section afterwards. The old buffer is destroyed on success.
    pub fn grow(&mut self, device: &mut dyn Device, new_capacity: u64) -> Result<()> {
        let new_buffer = device.create_buffer(&Self::buffer_descriptor(new_capacity))?;
        let mut new_registry = AllocationRegistry::new(new_capacity);
        let mut new_offsets = Vec::with_capacity(self.sections.len());

        for section in &self.sections {
            let size = section.size();
            let result = new_registry
                .allocate(size)
                .and_then(|new_offset| {
                    if size > 0 {
                        device.copy_buffer(
                            self.buffer,
                            section.offset,
                            new_buffer,
                            new_offset,
                            size,
                        )?;
                    }
                    Ok(new_offset)
                });
            match result {
                Ok(new_offset) => new_offsets.push(new_offset),
                Err(error) => {
                    device.destroy_buffer(new_buffer);
                    return Err(error);
                }
            }
        }

        device.destroy_buffer(self.buffer);
        self.buffer = new_buffer;
        self.registry = new_registry;
        for (section, new_offset) in self.sections.iter_mut().zip(new_offsets) {
            section.offset = new_offset;
        }
        log::debug!(
            "section store grown: {} -> {} bytes, {} sections moved",
            self.capacity,
            new_capacity,
            self.sections.len()
        );
        self.capacity = new_capacity;
        Ok(())
    }

    /// Destroy the underlying device buffer.
    pub fn release(self, device: &mut dyn Device) {
        device.destroy_buffer(self.buffer);
    }

    fn write_range(
        &self,
        device: &mut dyn Device,
        offset: u64,
        size: u64,
        source: SectionSource<'_>,
    ) -> Result<()> {
        match source {
            SectionSource::Bytes(data) => {
                if data.len() as u64 != size {
                    return Err(GraphicsError::SizeMismatch {
                        expected: size,
                        actual: data.len() as u64,
                    });
                }
                if size > 0 {
                    device.write_buffer(self.buffer, offset, data)?;
                }
                Ok(())
            }
            SectionSource::Buffer {
                buffer,
                offset: read_offset,
            } => {
                if size > 0 {
                    device.copy_buffer(buffer, read_offset, self.buffer, offset, size)?;
                }
                Ok(())
            }
            SectionSource::Init(init) => {
                if size > 0 {
                    device.map_buffer_mut(self.buffer, offset, size, init)?;
                }
                Ok(())
            }
        }
    }
}

static_assertions::assert_impl_all!(VertexBuffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareDevice;

    fn vec2_sequence() -> AttributeSequence {
        AttributeSequence::new().with_attribute_of::<glam::Vec2>()
    }

    fn byte_section(store: &mut VertexBuffer, device: &mut SoftwareDevice, bytes: &[u8]) -> u64 {
        let sequence = AttributeSequence::new().with_attribute_of::<u32>();
        assert_eq!(bytes.len() % 4, 0);
        store
            .add_data(
                device,
                SectionSource::Bytes(bytes),
                bytes.len() as u64 / 4,
                sequence,
            )
            .unwrap()
            .offset()
    }

    #[test]
    fn test_add_data_roundtrip() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 256).unwrap();

        let data: Vec<u8> = (0u8..64).collect();
        let offset = byte_section(&mut store, &mut device, &data);

        assert_eq!(store.section_count(), 1);
        assert_eq!(device.read_buffer(store.handle(), offset, 64).unwrap(), data);
    }

    #[test]
    fn test_add_data_size_mismatch() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 256).unwrap();

        let result = store.add_data(
            &mut device,
            SectionSource::Bytes(&[0u8; 24]),
            4,
            vec2_sequence(),
        );
        assert_eq!(
            result.unwrap_err(),
            GraphicsError::SizeMismatch {
                expected: 32,
                actual: 24
            }
        );
        // The failed add left no partial section behind.
        assert_eq!(store.section_count(), 0);
        assert_eq!(store.max_new_section_size(), 256);
    }

    #[test]
    fn test_try_add_data_out_of_memory() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 64).unwrap();

        let result = store
            .try_add_data(
                &mut device,
                SectionSource::Bytes(&[0u8; 128]),
                16,
                vec2_sequence(),
            )
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.section_count(), 0);
    }

    #[test]
    fn test_add_data_from_init_callback() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 128).unwrap();

        let section = store
            .add_data(
                &mut device,
                SectionSource::Init(&mut |bytes| {
                    for (i, byte) in bytes.iter_mut().enumerate() {
                        *byte = i as u8;
                    }
                }),
                4,
                vec2_sequence(),
            )
            .unwrap();
        let offset = section.offset();

        let expected: Vec<u8> = (0u8..32).collect();
        assert_eq!(
            device.read_buffer(store.handle(), offset, 32).unwrap(),
            expected
        );
    }

    #[test]
    fn test_add_section_from_other_store() {
        let mut device = SoftwareDevice::new();
        let mut source = VertexBuffer::new(&mut device, 128).unwrap();
        let mut target = VertexBuffer::new(&mut device, 128).unwrap();

        let data: Vec<u8> = (0u8..48).collect();
        byte_section(&mut source, &mut device, &data);

        let copied = target.add_section_from(&mut device, &source, 0).unwrap();
        let offset = copied.offset();
        assert_eq!(copied.vertex_count(), 12);
        assert_eq!(
            device.read_buffer(target.handle(), offset, 48).unwrap(),
            data
        );
    }

    #[test]
    fn test_update_data_in_place() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 128).unwrap();

        byte_section(&mut store, &mut device, &[1u8; 32]);
        let offset_before = store.section(0).unwrap().offset();

        store
            .update_data(&mut device, 0, SectionSource::Bytes(&[9u8; 32]))
            .unwrap();

        let section = store.section(0).unwrap();
        assert_eq!(section.offset(), offset_before);
        assert_eq!(
            device.read_buffer(store.handle(), section.offset(), 32).unwrap(),
            vec![9u8; 32]
        );
    }

    #[test]
    fn test_discard_shifts_later_indices() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 256).unwrap();

        byte_section(&mut store, &mut device, &[1u8; 16]);
        byte_section(&mut store, &mut device, &[2u8; 16]);
        byte_section(&mut store, &mut device, &[3u8; 16]);

        store.discard_data(0).unwrap();

        assert_eq!(store.section_count(), 2);
        let first = store.section(0).unwrap();
        let second = store.section(1).unwrap();
        assert_eq!(
            device.read_buffer(store.handle(), first.offset(), 16).unwrap(),
            vec![2u8; 16]
        );
        assert_eq!(
            device.read_buffer(store.handle(), second.offset(), 16).unwrap(),
            vec![3u8; 16]
        );
    }

    #[test]
    fn test_discard_out_of_range() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 64).unwrap();
        assert_eq!(
            store.discard_data(0),
            Err(GraphicsError::InvalidSection { index: 0, count: 0 })
        );
    }

    #[test]
    fn test_discard_then_reuse_space() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 64).unwrap();

        byte_section(&mut store, &mut device, &[1u8; 32]);
        byte_section(&mut store, &mut device, &[2u8; 32]);
        assert_eq!(store.max_new_section_size(), 0);

        store.discard_data(0).unwrap();
        assert_eq!(store.max_new_section_size(), 32);

        // First-fit places the new section in the freed range.
        let offset = byte_section(&mut store, &mut device, &[7u8; 32]);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_grow_preserves_sections() {
        let mut device = SoftwareDevice::new();
        let mut store = VertexBuffer::new(&mut device, 64).unwrap();

        byte_section(&mut store, &mut device, &[1u8; 32]);
        byte_section(&mut store, &mut device, &[2u8; 32]);
        assert!(store
            .try_add_data(
                &mut device,
                SectionSource::Bytes(&[3u8; 32]),
                8,
                AttributeSequence::new().with_attribute_of::<u32>(),
            )
            .unwrap()
            .is_none());

        store.grow(&mut device, 128).unwrap();
        assert_eq!(store.capacity(), 128);
        assert_eq!(store.section_count(), 2);
        assert_eq!(device.live_buffer_count(), 1);

        // Contents moved with the sections.
        let first = store.section(0).unwrap();
        assert_eq!(
            device.read_buffer(store.handle(), first.offset(), 32).unwrap(),
            vec![1u8; 32]
        );

        // The retried allocation now fits.
        byte_section(&mut store, &mut device, &[3u8; 32]);
        assert_eq!(store.section_count(), 3);
    }
}
