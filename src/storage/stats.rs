//! Capacity reports and capability sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Byte counts for a module's backing medium.
///
/// `-1` in all three fields means the medium could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub total: i64,
    pub free: i64,
    pub used: i64,
}

impl Capacity {
    /// Sentinel reported when the medium is unreachable (e.g. not mounted).
    pub const UNREACHABLE: Self = Self {
        total: -1,
        free: -1,
        used: -1,
    };

    /// Build a report from total and free bytes; `used` is the difference.
    #[must_use]
    pub fn from_space(total: u64, free: u64) -> Self {
        let total = i64::try_from(total).unwrap_or(i64::MAX);
        let free = i64::try_from(free).unwrap_or(i64::MAX);
        Self {
            total,
            free,
            used: total.saturating_sub(free),
        }
    }

    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        *self == Self::UNREACHABLE
    }
}

/// Statistics returned by a module, encoded as `{"capacity": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub capacity: Capacity,
}

impl Statistics {
    #[must_use]
    pub fn new(capacity: Capacity) -> Self {
        Self { capacity }
    }

    #[must_use]
    pub fn unreachable() -> Self {
        Self::new(Capacity::UNREACHABLE)
    }
}

/// Optional features a module offers, keyed by capability name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<String, Value>);

impl CapabilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// True when the capability is present and set to `true`.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
