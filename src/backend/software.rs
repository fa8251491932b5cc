//! Software device backend.
//!
//! [`SoftwareDevice`] implements [`Device`] entirely on the CPU: buffers are
//! plain byte vectors, vertex-format state is tracked in full, and every
//! state-changing call bumps a counter in [`DeviceStats`]. Reads, writes,
//! copies and maps are byte-accurate, so data round-trips can be verified
//! without GPU hardware.

use std::collections::BTreeMap;

use glam::Mat4;

use crate::device::{BufferDescriptor, BufferHandle, Device, PipelineHandle, VertexFormatHandle};
use crate::draw::DrawOperation;
use crate::error::{GraphicsError, Result};
use crate::layout::ScalarType;

/// Counters for device calls that would be expensive on real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    /// Vertex-buffer-to-slot bind calls.
    pub buffer_binds: u64,
    /// Attribute format/association calls.
    pub attribute_binds: u64,
    /// Attribute enable calls.
    pub attribute_enables: u64,
    /// Pipeline program binds.
    pub pipeline_binds: u64,
    /// Vertex-format binds.
    pub format_binds: u64,
    /// Per-draw transform uploads.
    pub transform_uploads: u64,
    /// Draw calls issued.
    pub draw_calls: u64,
}

#[derive(Debug)]
struct SoftwareBuffer {
    data: Vec<u8>,
    label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotBinding {
    buffer: BufferHandle,
    offset: u64,
    stride: u32,
    step_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttributeState {
    slot: u32,
    scalar: ScalarType,
    len: u32,
    relative_offset: u32,
    enabled: bool,
}

#[derive(Debug, Default)]
struct FormatState {
    slots: BTreeMap<u32, SlotBinding>,
    attributes: BTreeMap<u32, AttributeState>,
    index_buffer: Option<BufferHandle>,
}

/// A CPU implementation of [`Device`].
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    buffers: Vec<Option<SoftwareBuffer>>,
    formats: Vec<Option<FormatState>>,
    bound_pipeline: Option<PipelineHandle>,
    bound_format: Option<VertexFormatHandle>,
    stats: DeviceStats,
}

impl SoftwareDevice {
    /// Create a new software device.
    pub fn new() -> Self {
        Self::default()
    }

    /// The call counters accumulated so far.
    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    /// Reset all call counters to zero.
    pub fn reset_stats(&mut self) {
        self.stats = DeviceStats::default();
    }

    /// Number of live (not yet destroyed) buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    /// Device-side view of a vertex-input slot: `(buffer, offset, stride,
    /// step_rate)`, if the slot has been bound.
    pub fn slot_binding(
        &self,
        format: VertexFormatHandle,
        slot: u32,
    ) -> Option<(BufferHandle, u64, u32, u32)> {
        self.format(format)?
            .slots
            .get(&slot)
            .map(|b| (b.buffer, b.offset, b.stride, b.step_rate))
    }

    /// Device-side view of a vertex-input location: `(scalar, len,
    /// relative_offset)`, if the location has a format.
    pub fn attribute_format(
        &self,
        format: VertexFormatHandle,
        location: u32,
    ) -> Option<(ScalarType, u32, u32)> {
        self.format(format)?
            .attributes
            .get(&location)
            .map(|a| (a.scalar, a.len, a.relative_offset))
    }

    /// The slot a vertex-input location sources its data from.
    pub fn attribute_slot(&self, format: VertexFormatHandle, location: u32) -> Option<u32> {
        self.format(format)?.attributes.get(&location).map(|a| a.slot)
    }

    /// Whether a vertex-input location is currently enabled.
    pub fn attribute_enabled(&self, format: VertexFormatHandle, location: u32) -> bool {
        self.format(format)
            .and_then(|s| s.attributes.get(&location))
            .map(|a| a.enabled)
            .unwrap_or(false)
    }

    /// The index buffer bound to a vertex format, if any.
    pub fn index_buffer(&self, format: VertexFormatHandle) -> Option<BufferHandle> {
        self.format(format)?.index_buffer
    }

    /// The most recently bound pipeline.
    pub fn bound_pipeline(&self) -> Option<PipelineHandle> {
        self.bound_pipeline
    }

    /// The most recently bound vertex format.
    pub fn bound_format(&self) -> Option<VertexFormatHandle> {
        self.bound_format
    }

    fn format(&self, handle: VertexFormatHandle) -> Option<&FormatState> {
        self.formats
            .get(handle.raw() as usize)
            .and_then(Option::as_ref)
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&SoftwareBuffer> {
        self.buffers
            .get(handle.raw() as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut SoftwareBuffer> {
        self.buffers
            .get_mut(handle.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))
    }

    fn format_mut(&mut self, handle: VertexFormatHandle) -> Option<&mut FormatState> {
        self.formats
            .get_mut(handle.raw() as usize)
            .and_then(Option::as_mut)
    }

    fn check_range(buffer: &SoftwareBuffer, offset: u64, size: u64) -> Result<()> {
        let end = offset.checked_add(size);
        match end {
            Some(end) if end <= buffer.data.len() as u64 => Ok(()),
            _ => Err(GraphicsError::SizeMismatch {
                expected: buffer.data.len() as u64,
                actual: offset.saturating_add(size),
            }),
        }
    }
}

impl Device for SoftwareDevice {
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle> {
        let handle = BufferHandle::from_raw(self.buffers.len() as u64);
        self.buffers.push(Some(SoftwareBuffer {
            data: vec![0; descriptor.size as usize],
            label: descriptor.label.clone(),
        }));
        log::trace!(
            "SoftwareDevice: created buffer {:?} (size: {}, usage: {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.get_mut(buffer.raw() as usize) {
            if let Some(destroyed) = entry.take() {
                log::trace!("SoftwareDevice: destroyed buffer {:?}", destroyed.label);
            }
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let entry = self.buffer_mut(buffer)?;
        Self::check_range(entry, offset, data.len() as u64)?;
        let start = offset as usize;
        entry.data[start..start + data.len()].copy_from_slice(data);
        log::trace!(
            "SoftwareDevice: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> Result<Vec<u8>> {
        let entry = self.buffer(buffer)?;
        Self::check_range(entry, offset, size)?;
        let start = offset as usize;
        Ok(entry.data[start..start + size as usize].to_vec())
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let bytes = {
            let source = self.buffer(src)?;
            Self::check_range(source, src_offset, size)?;
            let start = src_offset as usize;
            source.data[start..start + size as usize].to_vec()
        };
        let target = self.buffer_mut(dst)?;
        Self::check_range(target, dst_offset, size)?;
        let start = dst_offset as usize;
        target.data[start..start + size as usize].copy_from_slice(&bytes);
        log::trace!(
            "SoftwareDevice: copy_buffer {} -> {} ({} bytes)",
            src.raw(),
            dst.raw(),
            size
        );
        Ok(())
    }

    fn map_buffer_mut(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        init: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()> {
        let entry = self.buffer_mut(buffer)?;
        Self::check_range(entry, offset, size)?;
        let start = offset as usize;
        log::trace!("SoftwareDevice: map offset={} size={}", offset, size);
        init(&mut entry.data[start..start + size as usize]);
        log::trace!("SoftwareDevice: unmap offset={} size={}", offset, size);
        Ok(())
    }

    fn create_vertex_format(&mut self) -> Result<VertexFormatHandle> {
        let handle = VertexFormatHandle::from_raw(self.formats.len() as u64);
        self.formats.push(Some(FormatState::default()));
        log::trace!("SoftwareDevice: created vertex format {}", handle.raw());
        Ok(handle)
    }

    fn destroy_vertex_format(&mut self, format: VertexFormatHandle) {
        if let Some(entry) = self.formats.get_mut(format.raw() as usize) {
            if entry.take().is_some() {
                log::trace!("SoftwareDevice: destroyed vertex format {}", format.raw());
            }
        }
    }

    fn bind_format_buffer(
        &mut self,
        format: VertexFormatHandle,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        stride: u32,
    ) {
        self.stats.buffer_binds += 1;
        if let Some(state) = self.format_mut(format) {
            let binding = state.slots.entry(slot).or_insert(SlotBinding {
                buffer,
                offset,
                stride,
                step_rate: 0,
            });
            binding.buffer = buffer;
            binding.offset = offset;
            binding.stride = stride;
        }
        log::trace!(
            "SoftwareDevice: bind slot {} <- buffer {} offset={} stride={}",
            slot,
            buffer.raw(),
            offset,
            stride
        );
    }

    fn set_slot_step_rate(&mut self, format: VertexFormatHandle, slot: u32, step_rate: u32) {
        if let Some(state) = self.format_mut(format) {
            if let Some(binding) = state.slots.get_mut(&slot) {
                binding.step_rate = step_rate;
            }
        }
        log::trace!("SoftwareDevice: slot {} step rate {}", slot, step_rate);
    }

    fn bind_index_buffer(&mut self, format: VertexFormatHandle, buffer: Option<BufferHandle>) {
        if let Some(state) = self.format_mut(format) {
            state.index_buffer = buffer;
        }
        log::trace!(
            "SoftwareDevice: index buffer {:?}",
            buffer.map(BufferHandle::raw)
        );
    }

    fn set_attribute_slot(&mut self, format: VertexFormatHandle, location: u32, slot: u32) {
        if let Some(state) = self.format_mut(format) {
            let attribute = state.attributes.entry(location).or_insert(AttributeState {
                slot,
                scalar: ScalarType::F32,
                len: 0,
                relative_offset: 0,
                enabled: false,
            });
            attribute.slot = slot;
        }
    }

    fn set_attribute_format_float(
        &mut self,
        format: VertexFormatHandle,
        location: u32,
        scalar: ScalarType,
        len: u32,
        normalized: bool,
        relative_offset: u32,
    ) {
        self.stats.attribute_binds += 1;
        if let Some(state) = self.format_mut(format) {
            if let Some(attribute) = state.attributes.get_mut(&location) {
                attribute.scalar = scalar;
                attribute.len = len;
                attribute.relative_offset = relative_offset;
            }
        }
        log::trace!(
            "SoftwareDevice: attribute {} float {:?}x{} normalized={} offset={}",
            location,
            scalar,
            len,
            normalized,
            relative_offset
        );
    }

    fn set_attribute_format_int(
        &mut self,
        format: VertexFormatHandle,
        location: u32,
        scalar: ScalarType,
        len: u32,
        relative_offset: u32,
    ) {
        self.stats.attribute_binds += 1;
        if let Some(state) = self.format_mut(format) {
            if let Some(attribute) = state.attributes.get_mut(&location) {
                attribute.scalar = scalar;
                attribute.len = len;
                attribute.relative_offset = relative_offset;
            }
        }
        log::trace!(
            "SoftwareDevice: attribute {} int {:?}x{} offset={}",
            location,
            scalar,
            len,
            relative_offset
        );
    }

    fn enable_attribute(&mut self, format: VertexFormatHandle, location: u32) {
        self.stats.attribute_enables += 1;
        if let Some(state) = self.format_mut(format) {
            if let Some(attribute) = state.attributes.get_mut(&location) {
                attribute.enabled = true;
            }
        }
        log::trace!("SoftwareDevice: enable attribute {}", location);
    }

    fn disable_attribute(&mut self, format: VertexFormatHandle, location: u32) {
        if let Some(state) = self.format_mut(format) {
            if let Some(attribute) = state.attributes.get_mut(&location) {
                attribute.enabled = false;
            }
        }
        log::trace!("SoftwareDevice: disable attribute {}", location);
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.stats.pipeline_binds += 1;
        self.bound_pipeline = Some(pipeline);
        log::trace!("SoftwareDevice: bind pipeline {}", pipeline.raw());
    }

    fn bind_vertex_format(&mut self, format: VertexFormatHandle) {
        self.stats.format_binds += 1;
        self.bound_format = Some(format);
        log::trace!("SoftwareDevice: bind vertex format {}", format.raw());
    }

    fn set_transform(&mut self, location: u32, transform: &Mat4) {
        self.stats.transform_uploads += 1;
        log::trace!(
            "SoftwareDevice: transform at {} = {:?}",
            location,
            transform.to_cols_array()[12..15].to_vec()
        );
    }

    fn draw(&mut self, operation: &DrawOperation) {
        self.stats.draw_calls += 1;
        match operation {
            DrawOperation::Arrays(call) => {
                log::trace!(
                    "SoftwareDevice: draw arrays {:?} first={} count={}",
                    call.mode,
                    call.first,
                    call.count
                );
            }
            DrawOperation::Elements(call) => {
                log::trace!(
                    "SoftwareDevice: draw elements {:?} count={} offset={}",
                    call.mode,
                    call.count,
                    call.offset
                );
            }
            DrawOperation::ArraysInstanced { call, instances } => {
                log::trace!(
                    "SoftwareDevice: draw arrays {:?} count={} instances={}",
                    call.mode,
                    call.count,
                    instances
                );
            }
            DrawOperation::ElementsInstanced { call, instances } => {
                log::trace!(
                    "SoftwareDevice: draw elements {:?} count={} instances={}",
                    call.mode,
                    call.count,
                    instances
                );
            }
        }
    }
}
