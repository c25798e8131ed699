//! Outcome types for the organizer.

use serde::Serialize;

// ── Per-record outcome ──────────────────────────────────────────────

/// How the enrichment step went for a relocated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Metadata attached, suggested and derived flags applied.
    Enriched,
    /// Enrichment failed; relocated with `S` only and no metadata.
    Degraded { reason: String },
}

impl EnrichmentStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Result of processing one inbox record.
///
/// Relocation failures are not an outcome; they surface as
/// [`OrganizerError`](crate::error::OrganizerError).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// The record now lives in `cur` as `new_filename`.
    Relocated {
        filename: String,
        new_filename: String,
        enrichment: EnrichmentStatus,
    },
    /// The record could not be read; nothing was moved.
    ReadFailed { filename: String, reason: String },
}

impl RecordOutcome {
    pub fn is_relocated(&self) -> bool {
        matches!(self, Self::Relocated { .. })
    }
}

// ── Batch report ────────────────────────────────────────────────────

/// Tally of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records the batch picked up from the inbox.
    pub attempted: usize,
    /// Records that reached `cur`, enriched or degraded.
    pub relocated: usize,
    /// Subset of `relocated` that went through the degraded path.
    pub degraded: usize,
    /// Records skipped because they could not be read.
    pub read_failures: usize,
    /// Records left in the inbox because relocation failed.
    pub storage_failures: usize,
}

impl BatchReport {
    pub(crate) fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Relocated { enrichment, .. } => {
                self.relocated += 1;
                if enrichment.is_degraded() {
                    self.degraded += 1;
                }
            }
            RecordOutcome::ReadFailed { .. } => self.read_failures += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tallies_outcomes() {
        let mut report = BatchReport::default();
        report.record(&RecordOutcome::Relocated {
            filename: "a".into(),
            new_filename: "a:2,S".into(),
            enrichment: EnrichmentStatus::Enriched,
        });
        report.record(&RecordOutcome::Relocated {
            filename: "b".into(),
            new_filename: "b:2,S".into(),
            enrichment: EnrichmentStatus::Degraded {
                reason: "timeout".into(),
            },
        });
        report.record(&RecordOutcome::ReadFailed {
            filename: "c".into(),
            reason: "gone".into(),
        });
        assert_eq!(report.relocated, 2);
        assert_eq!(report.degraded, 1);
        assert_eq!(report.read_failures, 1);
    }

    #[test]
    fn outcome_serializes_tagged() {
        let outcome = RecordOutcome::ReadFailed {
            filename: "x".into(),
            reason: "missing".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "read_failed");
    }
}
