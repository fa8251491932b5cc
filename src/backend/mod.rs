//! Device backends.
//!
//! Real GPU backends live outside this crate and implement
//! [`Device`](crate::Device) over their native API. The in-tree
//! [`SoftwareDevice`] keeps byte-accurate CPU buffers and per-call counters,
//! which makes it the backend of choice for tests and development without
//! GPU hardware.

pub mod software;

pub use software::{DeviceStats, SoftwareDevice};
