//! Headless testing helpers: in-memory row source, counting inputs, snapshots.
//!
//! Use [`MemoryRowSource`] to drive a [`Session`](crate::session::Session)
//! without a database, and [`render_to_string`] to capture a rendered tree as
//! plain text for snapshot-style assertions.

pub mod memory;
pub mod snapshot;

pub use memory::{records, CountingInputs, MemoryRowSource};
pub use snapshot::render_to_string;
