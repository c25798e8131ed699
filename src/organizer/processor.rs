//! Memory organizer: drives inbox records through enrich → tag → relocate.
//!
//! **Core invariant: enrichment failures degrade, storage failures abort.**
//! A record whose enrichment fails still reaches `cur`, tagged `S` only and
//! without metadata. A record whose relocation fails stays in `new`.
//!
//! Flow per record:
//! 1. Read from `new` (unreadable → skipped, nothing moved)
//! 2. Enrichment → structured metadata, or the degraded path
//! 3. Tagging → flag set for the filename
//! 4. Relocate `new → cur`

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_LLM_MODEL, MemdirConfig};
use crate::entry::{EntryMetadata, MemoryEntry};
use crate::error::{EnrichmentError, OrganizerError};
use crate::llm::{ResponseSchema, StructuredGenerator};
use crate::organizer::prompts::{build_tagging_prompt, metadata_schema};
use crate::organizer::tagging::TaggingRules;
use crate::organizer::types::{BatchReport, EnrichmentStatus, RecordOutcome};
use crate::storage::{MemoryState, MemoryStorage, flag_budget};

/// Memory organizer: enriches inbox records and files them into `cur`.
pub struct MemoryOrganizer {
    storage: MemoryStorage,
    generator: Arc<dyn StructuredGenerator>,
    tagging_model: String,
    rules: TaggingRules,
    schema: ResponseSchema,
    enrichment_timeout: Option<Duration>,
    batch_size: usize,
    /// Inbox names that failed to read; batches skip them.
    unreadable: Mutex<HashSet<String>>,
}

impl MemoryOrganizer {
    /// Create an organizer using the default model and tagging rules.
    pub fn new(storage: MemoryStorage, generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            storage,
            generator,
            tagging_model: DEFAULT_LLM_MODEL.to_string(),
            rules: TaggingRules::default_rules(),
            schema: metadata_schema(),
            enrichment_timeout: None,
            batch_size: DEFAULT_BATCH_SIZE,
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    /// Create an organizer with model, batch size and timeout from `config`.
    pub fn from_config(
        storage: MemoryStorage,
        generator: Arc<dyn StructuredGenerator>,
        config: &MemdirConfig,
    ) -> Self {
        let organizer = Self::new(storage, generator)
            .with_model(config.default_model.clone())
            .with_batch_size(config.batch_size);
        match config.enrichment_timeout {
            Some(timeout) => organizer.with_enrichment_timeout(timeout),
            None => organizer,
        }
    }

    /// Builder: model passed to the enrichment capability.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.tagging_model = model.into();
        self
    }

    /// Builder: payload-derived flag rules.
    pub fn with_rules(mut self, rules: TaggingRules) -> Self {
        self.rules = rules;
        self
    }

    /// Builder: bound each enrichment call. Expiry takes the degraded path.
    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = Some(timeout);
        self
    }

    /// Builder: limit used by [`process_new_memories`](Self::process_new_memories).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    pub fn tagging_model(&self) -> &str {
        &self.tagging_model
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    // ── Single record ───────────────────────────────────────────────

    /// Process one inbox record.
    ///
    /// `Ok(true)` once the record is in `cur` (enriched or degraded),
    /// `Ok(false)` if it could not be read, `Err` if relocation failed.
    pub async fn process_one(&self, filename: &str) -> Result<bool, OrganizerError> {
        Ok(self.process_record(filename).await?.is_relocated())
    }

    /// Process one inbox record and report how it went.
    pub async fn process_record(&self, filename: &str) -> Result<RecordOutcome, OrganizerError> {
        let entry = match self.storage.read(MemoryState::New, filename).await {
            Ok(entry) => entry,
            Err(e) => {
                if self.mark_unreadable(filename) {
                    error!(
                        filename = %filename,
                        error = %e,
                        "Unreadable inbox record, later batches will skip it"
                    );
                } else {
                    warn!(filename = %filename, error = %e, "Skipping unreadable inbox record");
                }
                return Ok(RecordOutcome::ReadFailed {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        debug!(
            filename = %filename,
            entry_id = %entry.entry_id,
            entry_type = entry.entry_type.label(),
            "Processing inbox record"
        );

        let (metadata, enrichment) = match self.enrich(&entry).await {
            Ok(metadata) => (Some(metadata), EnrichmentStatus::Enriched),
            Err(e) => {
                warn!(
                    filename = %filename,
                    entry_id = %entry.entry_id,
                    error = %e,
                    "Enrichment failed, relocating without metadata"
                );
                (None, EnrichmentStatus::Degraded {
                    reason: e.to_string(),
                })
            }
        };

        let flags =
            self.rules
                .compute_flags(metadata.as_ref(), &entry.payload, flag_budget(filename));
        let updated = MemoryEntry { metadata, ..entry };

        let new_filename = self
            .storage
            .relocate(MemoryState::New, filename, &updated, &flags)
            .await
            .inspect_err(|e| {
                error!(filename = %filename, error = %e, "Relocation failed, record left in inbox");
            })?;

        info!(
            filename = %filename,
            new_filename = %new_filename,
            degraded = enrichment.is_degraded(),
            "Organized inbox record"
        );

        Ok(RecordOutcome::Relocated {
            filename: filename.to_string(),
            new_filename,
            enrichment,
        })
    }

    /// Call the enrichment capability and parse its answer.
    async fn enrich(&self, entry: &MemoryEntry) -> Result<EntryMetadata, EnrichmentError> {
        let prompt =
            build_tagging_prompt(entry).map_err(|e| EnrichmentError::Prompt(e.to_string()))?;

        let call = self.generator.generate_structured_response(
            &prompt,
            &self.tagging_model,
            &self.schema,
        );
        let value = match self.enrichment_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| EnrichmentError::Timeout { timeout })??,
            None => call.await?,
        };

        EntryMetadata::from_structured(&value).map_err(|reason| EnrichmentError::Malformed { reason })
    }

    // ── Batches ─────────────────────────────────────────────────────

    /// Process up to `limit` inbox records in arrival order.
    ///
    /// Per-record failures are logged and skipped. Returns how many records
    /// reached `cur`. Only a failure to list the inbox is an error.
    pub async fn process_batch(&self, limit: usize) -> Result<usize, OrganizerError> {
        Ok(self.process_batch_report(limit).await?.relocated)
    }

    /// [`process_batch`](Self::process_batch) with the full tally.
    pub async fn process_batch_report(&self, limit: usize) -> Result<BatchReport, OrganizerError> {
        let names = self.claim_batch(limit).await?;
        let mut report = BatchReport {
            attempted: names.len(),
            ..Default::default()
        };
        if names.is_empty() {
            return Ok(report);
        }

        info!(count = names.len(), "Processing inbox batch");
        for name in &names {
            tally(&mut report, name, self.process_record(name).await);
        }
        log_report(&report);
        Ok(report)
    }

    /// Process the inbox using the configured batch size.
    pub async fn process_new_memories(&self) -> Result<usize, OrganizerError> {
        self.process_batch(self.batch_size).await
    }

    /// Same contract as [`process_batch`](Self::process_batch), but runs up
    /// to `concurrency` records at once. Each record's read → relocate stays
    /// in a single future.
    pub async fn process_batch_concurrent(
        &self,
        limit: usize,
        concurrency: usize,
    ) -> Result<usize, OrganizerError> {
        let names = self.claim_batch(limit).await?;
        let mut report = BatchReport {
            attempted: names.len(),
            ..Default::default()
        };
        if names.is_empty() {
            return Ok(0);
        }

        info!(
            count = names.len(),
            concurrency, "Processing inbox batch concurrently"
        );
        let results: Vec<_> = stream::iter(names)
            .map(|name| async move {
                let result = self.process_record(&name).await;
                (name, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (name, result) in results {
            tally(&mut report, &name, result);
        }
        log_report(&report);
        Ok(report.relocated)
    }

    /// The next `limit` inbox names, oldest first, minus known-unreadable ones.
    async fn claim_batch(&self, limit: usize) -> Result<Vec<String>, OrganizerError> {
        let listed = self.storage.list_inbox().await.inspect_err(|e| {
            error!(error = %e, "Failed to list inbox");
        })?;

        let mut unreadable = self.unreadable.lock().unwrap_or_else(|e| e.into_inner());
        // Forget names that have left the inbox
        let present: HashSet<&str> = listed.iter().map(String::as_str).collect();
        unreadable.retain(|name| present.contains(name.as_str()));
        if !unreadable.is_empty() {
            debug!(skipped = unreadable.len(), "Skipping unreadable inbox records");
        }

        Ok(listed
            .into_iter()
            .filter(|name| !unreadable.contains(name))
            .take(limit)
            .collect())
    }

    /// Remember an unreadable name. True the first time it is seen.
    fn mark_unreadable(&self, filename: &str) -> bool {
        self.unreadable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(filename.to_string())
    }
}

fn tally(report: &mut BatchReport, name: &str, result: Result<RecordOutcome, OrganizerError>) {
    match result {
        Ok(outcome) => report.record(&outcome),
        Err(e) => {
            report.storage_failures += 1;
            error!(filename = %name, error = %e, "Failed to process record in batch");
        }
    }
}

fn log_report(report: &BatchReport) {
    info!(
        relocated = report.relocated,
        degraded = report.degraded,
        read_failures = report.read_failures,
        storage_failures = report.storage_failures,
        total = report.attempted,
        "Inbox batch complete"
    );
}
