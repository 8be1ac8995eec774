//! Queue entry decoding
//!
//! An entry is either a JSON job descriptor or a bare job id that the
//! orchestrator resolves.

use serde_json::Value;

use common::error::Error;
use common::utils::truncate_string;
use common::Job;

/// What a raw queue entry turned out to be
#[derive(Debug)]
pub enum Entry {
    /// A complete descriptor
    Descriptor(Job),
    /// A job id to look up
    JobId(String),
    /// An entry that cannot be executed; `job_id` is recovered when possible
    Malformed { job_id: String, error: Error },
}

/// Classifies a raw queue entry
pub fn decode_entry(raw: &str) -> Entry {
    let raw = raw.trim();
    if !raw.starts_with('{') {
        if raw.is_empty() {
            return Entry::Malformed {
                job_id: String::new(),
                error: Error::Internal("empty queue entry".to_string()),
            };
        }
        return Entry::JobId(raw.to_string());
    }

    match serde_json::from_str::<Job>(raw) {
        Ok(job) => Entry::Descriptor(job),
        Err(e) => {
            let job_id = serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|value| value.get("job_id").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| truncate_string(raw, 64));
            Entry::Malformed {
                job_id,
                error: Error::Serialization(e),
            }
        }
    }
}

/// Stand-in descriptor used to key results of jobs that never resolved
pub fn placeholder_job(job_id: impl Into<String>) -> Job {
    Job {
        job_id: job_id.into(),
        model_reference: String::new(),
        target_compute_unit: String::new(),
        run_count: 0,
        submitted_at: None,
        campaign_id: None,
    }
}
