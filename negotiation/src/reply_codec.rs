//! Decoding of reply payloads into availability and confirmation data.
//!
//! Replies are structured JSON records. Anything else (no reply, broken JSON,
//! wrong field types) decodes to the neutral default: empty availability or
//! disagreement. Nothing here returns an error.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::types::AvailabilityPayload;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_set(self) -> BTreeSet<String> {
        let values = match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        };
        values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityWire {
    #[serde(default)]
    times: Option<OneOrMany>,
    #[serde(default)]
    dates: Option<OneOrMany>,
    #[serde(default)]
    places: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationWire {
    #[serde(default)]
    agree: Option<bool>,
}

/// Parse `raw` as a JSON object, retrying on the outermost `{...}` span so a
/// record wrapped in a greeting or a quoted mail tail still decodes.
fn parse_record<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(raw.trim()) {
        return Some(value);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&raw[start..=end]).ok()
}

/// Decode an availability reply. `None`, malformed input and schema
/// mismatches all yield an empty payload.
pub fn decode_availability(raw: Option<&str>) -> AvailabilityPayload {
    let Some(raw) = raw else {
        return AvailabilityPayload::default();
    };
    match parse_record::<AvailabilityWire>(raw) {
        Some(wire) => AvailabilityPayload {
            times: wire.times.map(OneOrMany::into_set).unwrap_or_default(),
            dates: wire.dates.map(OneOrMany::into_set).unwrap_or_default(),
            places: wire.places.map(OneOrMany::into_set).unwrap_or_default(),
        },
        None => {
            debug!(len = raw.len(), "Unreadable availability reply, treating as no preference");
            AvailabilityPayload::default()
        }
    }
}

/// Decode a confirmation reply. Only an explicit `"agree": true` counts as agreement.
pub fn decode_confirmation(raw: Option<&str>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    match parse_record::<ConfirmationWire>(raw) {
        Some(wire) => wire.agree.unwrap_or(false),
        None => {
            debug!(len = raw.len(), "Unreadable confirmation reply, treating as disagreement");
            false
        }
    }
}
