//! Prompt construction for entry enrichment.

use serde_json::json;

use crate::entry::MemoryEntry;
use crate::llm::ResponseSchema;

/// Build the schema hint for `{keywords, summary, suggested_flags}`.
pub fn metadata_schema() -> ResponseSchema {
    ResponseSchema::new(
        "entry_metadata",
        json!({
            "keywords": ["string"],
            "summary": "string",
            "suggested_flags": ["string"]
        }),
    )
}

/// Build the enrichment prompt around the entry's canonical serialization.
///
/// The entry is embedded unmodified, exactly as [`MemoryEntry::canonical_json`]
/// renders it.
pub fn build_tagging_prompt(entry: &MemoryEntry) -> Result<String, serde_json::Error> {
    let canonical = entry.canonical_json()?;

    let mut prompt = String::with_capacity(canonical.len() + 512);
    prompt.push_str(
        "Analyze the following memory entry and produce metadata for indexing.\n\n\
         Provide:\n\
         - \"keywords\": 3 to 8 short keywords describing the entry\n\
         - \"summary\": one sentence summarising what happened\n\
         - \"suggested_flags\": short tags such as Flag_Important, Status_Success, \
         Status_Failure, Action_Buy, Action_Sell. Use Word_Word form, no spaces or commas.\n\n",
    );
    prompt.push_str(&format!(
        "Entry type: {}\nSource: {}\n\n",
        entry.entry_type.label(),
        entry.source_service
    ));
    prompt.push_str("Entry JSON:\n");
    prompt.push_str(&canonical);
    prompt.push_str("\n\nRespond with the JSON object only.");
    Ok(prompt)
}
