//! Plurality tally over availability records.
//!
//! Each dimension (time, date, place) is counted independently. A record casts
//! one vote for every distinct value it lists. The winner is the value with the
//! strictly highest count; ties go to the lexicographically smallest value so
//! the same votes always produce the same slot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{AvailabilityRecord, ProposedSlot};

/// Vote counts for one dimension, ordered by value.
pub type VoteCounts = BTreeMap<String, u32>;

/// Per-dimension vote breakdown of a tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub times: VoteCounts,
    pub dates: VoteCounts,
    pub places: VoteCounts,
    /// Number of records that expressed at least one preference.
    pub voters: usize,
}

impl TallyReport {
    /// The plurality winner of each dimension.
    pub fn proposal(&self) -> ProposedSlot {
        ProposedSlot {
            time: plurality_winner(&self.times),
            date: plurality_winner(&self.dates),
            place: plurality_winner(&self.places),
        }
    }
}

/// Count votes per dimension.
pub fn tally(records: &[AvailabilityRecord]) -> TallyReport {
    let mut report = TallyReport::default();
    for record in records {
        if !record.is_empty() {
            report.voters += 1;
        }
        for time in &record.times {
            *report.times.entry(time.clone()).or_insert(0) += 1;
        }
        for date in &record.dates {
            *report.dates.entry(date.clone()).or_insert(0) += 1;
        }
        for place in &record.places {
            *report.places.entry(place.clone()).or_insert(0) += 1;
        }
    }
    report
}

/// Derive the proposed slot from a set of records.
pub fn aggregate(records: &[AvailabilityRecord]) -> ProposedSlot {
    tally(records).proposal()
}

/// Highest count wins; iteration is in ascending value order and only a
/// strictly greater count replaces the leader, so ties keep the smallest value.
fn plurality_winner(counts: &VoteCounts) -> String {
    let mut best: Option<(&String, u32)> = None;
    for (value, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value.clone()).unwrap_or_default()
}
