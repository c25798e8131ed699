//! Entry records, the value objects stored in the memdir.

pub mod model;

pub use model::{EntryMetadata, EntryType, MemoryEntry};
