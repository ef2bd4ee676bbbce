use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Live,
    Demo,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Demo => "demo",
        }
    }
}

impl TryFrom<&str> for GroupKind {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "live" | "real" => Ok(Self::Live),
            "demo" => Ok(Self::Demo),
            other => Err(format!("unknown group kind: {other}")),
        }
    }
}

/// Local mirror of a venue trading group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingGroup {
    pub name: String,
    pub kind: GroupKind,
    pub active: bool,
    pub alias: Option<String>,
    pub currency: Option<String>,
    pub is_default: bool,
    pub is_demo_default: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl TradingGroup {
    pub fn display_name(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|alias| !alias.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// Fields refreshed from the venue on every sync. Alias and the default
/// flags are owned locally and never overwritten by a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpsert {
    pub name: String,
    pub kind: GroupKind,
    pub currency: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Which of the two independent default designations to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSlot {
    /// Real-server default for new live accounts
    Live,
    /// Default for new demo accounts
    Demo,
}

impl DefaultSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "default",
            Self::Demo => "demo_default",
        }
    }
}
