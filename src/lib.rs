//! memdir: a maildir-style memory store with an LLM-backed organizer.

pub mod config;
pub mod entry;
pub mod error;
pub mod llm;
pub mod organizer;
pub mod storage;
