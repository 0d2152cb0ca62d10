//! Timing derivation from client-side UI event logs.
//!
//! The page layer records an ordered log of `{eventType, localTime}`
//! entries. Button press times are reported relative to the first
//! `promptStart`. A log without a start event is a harness error and is
//! reported as such, never defaulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};

/// Event type that anchors all offsets.
pub const PROMPT_START: &str = "promptStart";

/// Event type of a button press.
pub const BUTTON_CLICKED: &str = "pushButtonClicked";

/// One entry of the client event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "localTime")]
    pub local_time: DateTime<Utc>,
    #[serde(default)]
    pub info: Option<Value>,
}

#[derive(Default)]
struct Fold {
    start: Option<DateTime<Utc>>,
    offsets: Vec<f64>,
}

/// Fold an ordered event log into button offsets, in seconds since start.
///
/// Presses logged before the first `promptStart` are rejected.
pub fn derive_offsets(log: &[EventLogEntry]) -> DomainResult<Vec<f64>> {
    let folded = log.iter().try_fold(Fold::default(), |mut acc, entry| {
        match entry.event_type.as_str() {
            PROMPT_START if acc.start.is_none() => acc.start = Some(entry.local_time),
            BUTTON_CLICKED => {
                let start = acc.start.ok_or_else(|| {
                    DomainError::TimingError(format!(
                        "{BUTTON_CLICKED} at {} precedes any {PROMPT_START}",
                        entry.local_time.to_rfc3339()
                    ))
                })?;
                let elapsed = entry.local_time - start;
                acc.offsets.push(elapsed.num_microseconds().map_or_else(
                    || elapsed.num_milliseconds() as f64 / 1_000.0,
                    |us| us as f64 / 1_000_000.0,
                ));
            }
            _ => {}
        }
        Ok::<_, DomainError>(acc)
    })?;

    if folded.start.is_none() {
        return Err(DomainError::TimingError(format!(
            "event log has no {PROMPT_START} event"
        )));
    }
    Ok(folded.offsets)
}
