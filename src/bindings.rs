//! Attribute binding cache.
//!
//! [`AttributeBindings`] owns one device vertex-format object and centralizes
//! two rules: how a `(buffer, offset, stride, step_rate)` tuple maps to a
//! reusable vertex-input slot, and how a [`VertexAttribute`] turns into the
//! correct device format call (float vs. native-integer entry point).
//!
//! Slot lookup is a linear scan with exact tuple equality; the expected
//! binding count per mesh is small enough that hashing would not pay for
//! itself. A repeated bind of an identical tuple reuses its slot without any
//! device call.

use crate::buffer::VertexBuffer;
use crate::device::{BufferHandle, Device, VertexFormatHandle};
use crate::error::Result;
use crate::layout::VertexAttribute;

/// One vertex-input slot: the buffer range bound to it and how many
/// attribute locations currently source from it.
///
/// Slots live in an index-addressed arena; a slot with `ref_count == 0` is
/// free and may be reassigned to an unrelated binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    buffer: BufferHandle,
    offset: u64,
    stride: u32,
    step_rate: u32,
    ref_count: u32,
}

impl BufferBinding {
    /// The bound buffer.
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Byte offset of the bound range.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stride between consecutive elements.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Instance step rate (0 = per-vertex).
    pub fn step_rate(&self) -> u32 {
        self.step_rate
    }

    /// Number of attribute locations sourcing from this slot.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn matches(&self, buffer: BufferHandle, offset: u64, stride: u32, step_rate: u32) -> bool {
        self.buffer == buffer
            && self.offset == offset
            && self.stride == stride
            && self.step_rate == step_rate
    }
}

/// Groups attributes from one or more vertex buffer sections and deduplicates
/// the device calls that tie them to vertex-input slots.
#[derive(Debug)]
pub struct AttributeBindings {
    format: VertexFormatHandle,
    bindings: Vec<BufferBinding>,
    // location -> slot; `None` means the location is disabled.
    attribute_slots: Vec<Option<u32>>,
}

impl AttributeBindings {
    /// Create a cache over a fresh device vertex-format object.
    pub fn new(device: &mut dyn Device) -> Result<Self> {
        Ok(Self {
            format: device.create_vertex_format()?,
            bindings: Vec::new(),
            attribute_slots: Vec::new(),
        })
    }

    /// The device vertex-format object this cache drives.
    pub fn format(&self) -> VertexFormatHandle {
        self.format
    }

    /// The slot arena, in slot-index order.
    pub fn bindings(&self) -> &[BufferBinding] {
        &self.bindings
    }

    /// Bind the attributes of a buffer section to the given vertex-input
    /// locations, with `locations[i]` receiving the section's `i`-th
    /// attribute.
    ///
    /// A `step_rate` greater than zero marks the section as instanced
    /// attribute data advancing every `step_rate` instances.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::FormatMismatch`](crate::GraphicsError::FormatMismatch)
    /// when the location count differs from the section's attribute count;
    /// nothing is bound in that case.
    pub fn bind_attributes(
        &mut self,
        device: &mut dyn Device,
        store: &VertexBuffer,
        section_index: usize,
        locations: &[u32],
        step_rate: u32,
    ) -> Result<()> {
        let section = store.section(section_index)?;
        section.attributes().check_locations(locations)?;

        let slot = self.resolve_slot(
            device,
            store.handle(),
            section.offset(),
            section.attributes().stride(),
            step_rate,
        );

        for (location, attribute) in locations.iter().zip(section.attributes().iter()) {
            self.bind_attribute(device, *location, slot, attribute);
        }
        Ok(())
    }

    /// Disable a vertex-input location and drop its slot association.
    /// Unbinding a location that is not bound is a no-op.
    pub fn unbind_attribute(&mut self, device: &mut dyn Device, location: u32) {
        let Some(entry) = self.attribute_slots.get_mut(location as usize) else {
            return;
        };
        let Some(slot) = entry.take() else {
            return;
        };
        device.disable_attribute(self.format, location);
        self.bindings[slot as usize].ref_count -= 1;
    }

    /// Use a store's buffer for sourcing element indices.
    pub fn bind_index_buffer(&mut self, device: &mut dyn Device, store: &VertexBuffer) {
        device.bind_index_buffer(self.format, Some(store.handle()));
    }

    /// Clear the element index buffer binding.
    pub fn unbind_index_buffer(&mut self, device: &mut dyn Device) {
        device.bind_index_buffer(self.format, None);
    }

    /// Destroy the device vertex-format object.
    pub fn release(self, device: &mut dyn Device) {
        device.destroy_vertex_format(self.format);
    }

    /// Find or create the slot for a binding tuple. Only a miss touches the
    /// device.
    fn resolve_slot(
        &mut self,
        device: &mut dyn Device,
        buffer: BufferHandle,
        offset: u64,
        stride: u32,
        step_rate: u32,
    ) -> u32 {
        // Exact tuple match: the device-side slot already holds this state,
        // whether or not anything currently references it.
        for (index, binding) in self.bindings.iter().enumerate() {
            if binding.matches(buffer, offset, stride, step_rate) {
                return index as u32;
            }
        }

        let new_binding = BufferBinding {
            buffer,
            offset,
            stride,
            step_rate,
            ref_count: 0,
        };
        let slot = match self.bindings.iter().position(|b| b.ref_count == 0) {
            Some(index) => {
                self.bindings[index] = new_binding;
                index as u32
            }
            None => {
                self.bindings.push(new_binding);
                (self.bindings.len() - 1) as u32
            }
        };

        device.bind_format_buffer(self.format, slot, buffer, offset, stride);
        device.set_slot_step_rate(self.format, slot, step_rate);
        slot
    }

    fn bind_attribute(
        &mut self,
        device: &mut dyn Device,
        location: u32,
        slot: u32,
        attribute: &VertexAttribute,
    ) {
        device.set_attribute_slot(self.format, location, slot);

        if attribute.scalar.is_integer() && !attribute.float_cast {
            device.set_attribute_format_int(
                self.format,
                location,
                attribute.scalar,
                attribute.len,
                attribute.offset,
            );
        } else {
            // Native floats never normalize; converted integers may.
            let normalized = attribute.scalar.is_integer() && attribute.normalized;
            device.set_attribute_format_float(
                self.format,
                location,
                attribute.scalar,
                attribute.len,
                normalized,
                attribute.offset,
            );
        }

        if location as usize >= self.attribute_slots.len() {
            self.attribute_slots.resize(location as usize + 1, None);
        }
        let previous = self.attribute_slots[location as usize];
        if previous.is_none() {
            device.enable_attribute(self.format, location);
        }
        match previous {
            Some(old) if old != slot => self.bindings[old as usize].ref_count -= 1,
            _ => {}
        }
        if previous != Some(slot) {
            self.bindings[slot as usize].ref_count += 1;
        }
        self.attribute_slots[location as usize] = Some(slot);
    }
}

static_assertions::assert_impl_all!(AttributeBindings: Send, Sync);
