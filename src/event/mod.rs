//! Split and redemption records.
//!
//! Upstream records are kept verbatim as [`RawEvent`] so persisted files
//! mirror what the subgraph returned. [`Event`] is the resolved form used
//! for aggregation: one `kind`, one lowercase `wallet`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which subgraph entity a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Split,
    Redemption,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Split, EventKind::Redemption];

    /// GraphQL collection name.
    pub fn entity(self) -> &'static str {
        match self {
            Self::Split => "splits",
            Self::Redemption => "redemptions",
        }
    }

    pub fn wallet_field(self) -> &'static str {
        match self {
            Self::Split => "stakeholder",
            Self::Redemption => "redeemer",
        }
    }

    pub fn amount_field(self) -> &'static str {
        match self {
            Self::Split => "amount",
            Self::Redemption => "payout",
        }
    }

    /// Prefix for persisted files, e.g. `splits_2025-03.json`.
    pub fn file_prefix(self) -> &'static str {
        self.entity()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity())
    }
}

/// One record exactly as the subgraph returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub serde_json::Map<String, serde_json::Value>);

impl RawEvent {
    /// Timestamp in unix seconds. The subgraph encodes BigInt fields as
    /// decimal strings, but plain numbers are accepted too.
    pub fn timestamp(&self) -> Option<i64> {
        match self.0.get("timestamp")? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Normalized wallet for `kind`, or `None` if the field is absent or blank.
    pub fn wallet(&self, kind: EventKind) -> Option<String> {
        match self.0.get(kind.wallet_field())? {
            serde_json::Value::String(s) => normalize_wallet(s),
            _ => None,
        }
    }

    pub fn amount(&self, kind: EventKind) -> u128 {
        match self.0.get(kind.amount_field()) {
            Some(serde_json::Value::Number(n)) => n.as_u64().map(u128::from).unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Resolve into an [`Event`]. Records without a wallet are dropped
    /// here and never reach aggregation; the timestamp is optional.
    pub fn resolve(&self, kind: EventKind) -> Option<Event> {
        Some(Event {
            kind,
            wallet: self.wallet(kind)?,
            timestamp: self.timestamp(),
            amount: self.amount(kind),
        })
    }
}

/// Lowercase, trimmed address; `None` when nothing is left.
pub fn normalize_wallet(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

/// A resolved split or redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Lowercase address.
    pub wallet: String,
    /// Unix seconds, when the record carried a readable one.
    pub timestamp: Option<i64>,
    /// Collateral base units (`amount` for splits, `payout` for redemptions).
    pub amount: u128,
}

/// Resolve a batch, skipping unusable records.
pub fn resolve_all(kind: EventKind, raw: &[RawEvent]) -> Vec<Event> {
    raw.iter().filter_map(|r| r.resolve(kind)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_split_resolves_lowercase() {
        let r = raw(json!({
            "stakeholder": "0xABCdef0000000000000000000000000000000001",
            "timestamp": "1764547200",
            "amount": "2500000"
        }));
        let event = r.resolve(EventKind::Split).unwrap();
        assert_eq!(event.wallet, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(event.timestamp, Some(1_764_547_200));
        assert_eq!(event.amount, 2_500_000);
        assert_eq!(event.kind, EventKind::Split);
    }

    #[test]
    fn test_redemption_uses_its_own_fields() {
        let r = raw(json!({ "redeemer": "0xAA", "timestamp": 5, "payout": 7 }));
        let event = r.resolve(EventKind::Redemption).unwrap();
        assert_eq!(event.wallet, "0xaa");
        assert_eq!(event.amount, 7);
        // Same record read as a split has no stakeholder.
        assert!(r.resolve(EventKind::Split).is_none());
    }

    #[test]
    fn test_missing_or_blank_wallet_excluded() {
        let batch = vec![
            raw(json!({ "stakeholder": "0x01", "timestamp": "1" })),
            raw(json!({ "timestamp": "2" })),
            raw(json!({ "stakeholder": "   ", "timestamp": "3" })),
            raw(json!({ "stakeholder": null, "timestamp": "4" })),
        ];
        let events = resolve_all(EventKind::Split, &batch);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wallet, "0x01");
        assert_eq!(events[0].amount, 0);
    }

    #[test]
    fn test_wallet_without_timestamp_still_resolves() {
        let batch = vec![
            raw(json!({ "redeemer": "0xBB" })),
            raw(json!({ "redeemer": "0xCC", "timestamp": "not a number" })),
        ];
        let events = resolve_all(EventKind::Redemption, &batch);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].wallet, "0xbb");
        assert_eq!(events[0].timestamp, None);
        assert_eq!(events[1].timestamp, None);
    }

    #[test]
    fn test_raw_round_trips_field_names() {
        let original = json!({ "redeemer": "0xAbC", "timestamp": "9", "payout": "1" });
        let r = raw(original.clone());
        assert_eq!(serde_json::to_value(&r).unwrap(), original);
    }
}
