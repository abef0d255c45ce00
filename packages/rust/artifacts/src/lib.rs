//! Durable per-slot persistence for pipeline runs.
//!
//! - [`ArtifactStore`] reads and writes checkpoints and step results inside
//!   one slot directory, always through a temp file and an atomic rename.
//! - [`FlowAllocator`] hands out monotonically numbered `flow{N}` slots under
//!   the output root and scans them for resume.

pub mod flow;
pub mod store;

pub use flow::{FlowAllocator, FlowSlot, SlotEntry};
pub use store::{ArtifactMeta, ArtifactStore, StepValue};
