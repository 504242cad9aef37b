//! # Timeline Recorder
//!
//! Append-only audit history attached to kit orders, consultations, and
//! subscriptions. Each accepted change appends one `(timestamp, label)`
//! entry. Entries are never removed or reordered.
//!
//! ## Ordering
//!
//! Timestamps have second resolution. Two changes in the same second produce
//! two entries with equal timestamps; both are kept, in append order. A
//! timestamp earlier than the last entry (clock step backwards) is clamped
//! to the last entry's timestamp, so the sequence is monotonically
//! non-decreasing.
//!
//! ## Persisted Form
//!
//! ```json
//! [{"at": "2026-01-15T12:00:00Z", "label": "in_review"}]
//! ```
//!
//! Rows written by the older map form (`{"<timestamp>": "<label>"}`) are still
//! readable; they load sorted by timestamp. [`Timeline::to_legacy_map`]
//! produces that view for display.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use kc_core::Timestamp;

use crate::transition::WorkflowState;

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the change was recorded.
    pub at: Timestamp,
    /// Status label (or ledger event label) recorded.
    pub label: String,
}

/// Ordered, append-only list of [`TimelineEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimelineRepr")]
pub struct Timeline(Vec<TimelineEntry>);

impl Timeline {
    /// An empty timeline.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append `label` at the current time.
    pub fn record(&mut self, label: &str) -> &TimelineEntry {
        self.record_at(Timestamp::now(), label)
    }

    /// Append `label` at `at`, clamped so time never goes backwards.
    pub fn record_at(&mut self, at: Timestamp, label: &str) -> &TimelineEntry {
        let at = match self.0.last() {
            Some(last) if last.at > at => last.at,
            _ => at,
        };
        self.0.push(TimelineEntry {
            at,
            label: label.to_string(),
        });
        &self.0[self.0.len() - 1]
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.0
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&TimelineEntry> {
        self.0.last()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Labels in append order.
    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.label.as_str()).collect()
    }

    /// Legacy `{timestamp → label}` view. Same-second entries collapse to
    /// the last one recorded in that second.
    pub fn to_legacy_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|e| (e.at.to_iso8601(), e.label.clone()))
            .collect()
    }

    /// Whether replaying the timeline as statuses of `S` only ever takes
    /// legal steps. Every label must parse as an `S`.
    pub fn replay_is_consistent<S: WorkflowState>(&self) -> bool {
        let mut previous: Option<S> = None;
        for entry in &self.0 {
            let Some(status) = S::from_name(&entry.label) else {
                return false;
            };
            if let Some(prev) = previous {
                if !prev.can_transition_to(status) {
                    return false;
                }
            }
            previous = Some(status);
        }
        self.0.windows(2).all(|w| w[0].at <= w[1].at)
    }
}

/// Accepted on-disk shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimelineRepr {
    Entries(Vec<TimelineEntry>),
    Legacy(BTreeMap<String, String>),
}

impl TryFrom<TimelineRepr> for Timeline {
    type Error = String;

    fn try_from(repr: TimelineRepr) -> Result<Self, Self::Error> {
        match repr {
            TimelineRepr::Entries(entries) => {
                if entries.windows(2).any(|w| w[0].at > w[1].at) {
                    return Err("timeline entries are not in timestamp order".to_string());
                }
                Ok(Self(entries))
            }
            TimelineRepr::Legacy(map) => {
                let mut entries = map
                    .into_iter()
                    .map(|(key, label)| {
                        parse_legacy_key(&key).map(|at| TimelineEntry { at, label })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                entries.sort_by_key(|e| e.at);
                Ok(Self(entries))
            }
        }
    }
}

/// Legacy keys are RFC 3339 or `YYYY-MM-DD HH:MM:SS` (implicitly UTC).
fn parse_legacy_key(key: &str) -> Result<Timestamp, String> {
    if let Ok(ts) = Timestamp::parse_lenient(key) {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(key, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Timestamp::from_utc(Utc.from_utc_datetime(&naive)))
        .map_err(|e| format!("invalid timeline key {key:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KitOrderStatus;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn record_appends_in_order() {
        let mut t = Timeline::new();
        t.record_at(ts("2026-01-15T12:00:00Z"), "in_review");
        t.record_at(ts("2026-01-15T13:00:00Z"), "shipping");
        assert_eq!(t.labels(), vec!["in_review", "shipping"]);
        assert_eq!(t.last().unwrap().label, "shipping");
    }

    #[test]
    fn same_second_entries_are_kept() {
        let mut t = Timeline::new();
        let at = ts("2026-01-15T12:00:00Z");
        t.record_at(at, "in_review");
        t.record_at(at, "shipping");
        assert_eq!(t.len(), 2);
        // The legacy map view collapses them.
        let legacy = t.to_legacy_map();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy["2026-01-15T12:00:00Z"], "shipping");
    }

    #[test]
    fn backwards_clock_is_clamped() {
        let mut t = Timeline::new();
        t.record_at(ts("2026-01-15T12:00:05Z"), "in_review");
        let entry = t.record_at(ts("2026-01-15T12:00:00Z"), "shipping").clone();
        assert_eq!(entry.at, ts("2026-01-15T12:00:05Z"));
    }

    #[test]
    fn serializes_as_entry_list() {
        let mut t = Timeline::new();
        t.record_at(ts("2026-01-15T12:00:00Z"), "in_review");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"at": "2026-01-15T12:00:00Z", "label": "in_review"}])
        );
        let back: Timeline = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn reads_legacy_map_form() {
        let json = serde_json::json!({
            "2026-01-15 13:00:00": "shipping",
            "2026-01-15 12:00:00": "in_review",
        });
        let t: Timeline = serde_json::from_value(json).unwrap();
        assert_eq!(t.labels(), vec!["in_review", "shipping"]);
        assert!(t.replay_is_consistent::<KitOrderStatus>());
    }

    #[test]
    fn rejects_out_of_order_entry_list() {
        let json = serde_json::json!([
            {"at": "2026-01-15T13:00:00Z", "label": "shipping"},
            {"at": "2026-01-15T12:00:00Z", "label": "in_review"},
        ]);
        assert!(serde_json::from_value::<Timeline>(json).is_err());
    }

    #[test]
    fn replay_detects_illegal_step() {
        let mut t = Timeline::new();
        t.record_at(ts("2026-01-15T12:00:00Z"), "in_review");
        t.record_at(ts("2026-01-15T12:00:01Z"), "received");
        assert!(!t.replay_is_consistent::<KitOrderStatus>());
    }

    #[test]
    fn replay_rejects_unknown_label() {
        let mut t = Timeline::new();
        t.record_at(ts("2026-01-15T12:00:00Z"), "accepted");
        assert!(!t.replay_is_consistent::<KitOrderStatus>());
    }
}
