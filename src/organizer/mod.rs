//! Inbox organizer.
//!
//! Every record in `new` flows through:
//! 1. `MemoryStorage::read()`: decode the record (unreadable → skipped)
//! 2. `StructuredGenerator`: LLM enrichment into `EntryMetadata`
//! 3. `TaggingRules::compute_flags()`: `S` plus suggested and payload flags
//! 4. `MemoryStorage::relocate()`: atomic move into `cur`
//!
//! Enrichment failures take the degraded path and never reach the caller.

pub mod processor;
pub mod prompts;
pub mod tagging;
pub mod types;

pub use processor::MemoryOrganizer;
pub use tagging::{FieldRule, TaggingRules};
pub use types::{BatchReport, EnrichmentStatus, RecordOutcome};
