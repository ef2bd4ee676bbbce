use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{GroupKind, GroupUpsert};

/// Field names that have carried the group path across vendor API versions,
/// in lookup order. The first non-empty match wins.
pub const NAME_FIELDS: &[&str] = &["group", "name", "group_name", "path"];

/// Field names that may carry an explicit live/demo marker
pub const KIND_FIELDS: &[&str] = &["type", "group_type", "server_type"];

pub const CURRENCY_FIELDS: &[&str] = &["currency", "deposit_currency"];

/// Raw group record as returned by GroupNext
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDescriptor {
    fields: BTreeMap<String, String>,
}

impl GroupDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.fields.get(*key))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.lookup(NAME_FIELDS)
    }

    /// Explicit marker first, then the `demo` path prefix convention
    pub fn kind(&self) -> GroupKind {
        if let Some(kind) = self
            .lookup(KIND_FIELDS)
            .and_then(|raw| GroupKind::try_from(raw).ok())
        {
            return kind;
        }
        match self.name() {
            Some(name) if name.to_ascii_lowercase().starts_with("demo") => GroupKind::Demo,
            _ => GroupKind::Live,
        }
    }

    pub fn currency(&self) -> Option<&str> {
        self.lookup(CURRENCY_FIELDS)
    }

    /// Map to the mirror's upsert payload; descriptors without a name are skipped
    pub fn to_upsert(&self, synced_at: DateTime<Utc>) -> Option<GroupUpsert> {
        let name = self.name()?;
        Some(GroupUpsert {
            name: name.to_string(),
            kind: self.kind(),
            currency: self.currency().map(str::to_string),
            synced_at,
        })
    }
}
