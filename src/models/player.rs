//! Player record and related read/write shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A validated, normalized player as written to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Stable upstream identifier (natural key)
    pub external_id: String,

    /// Trimmed display name as shown upstream
    pub display_name: String,

    /// Crew tag extracted from the display name, upper-cased
    pub crew_tag: Option<String>,

    /// Tag of the source the record was fetched from
    pub source_tag: String,

    /// When upstream last saw the player
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl PlayerRecord {
    /// Fields overwritten on the update path of an upsert.
    pub fn update_fields(&self) -> PlayerUpdate {
        PlayerUpdate {
            display_name: self.display_name.clone(),
            crew_tag: self.crew_tag.clone(),
            last_seen_at: self.last_seen_at,
        }
    }
}

/// Mutable columns of a stored player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerUpdate {
    pub display_name: String,
    pub crew_tag: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Why a raw entry was not turned into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    NullRecord,
    MissingId,
    TransformError,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NullRecord => "null record",
            Self::MissingId => "missing id",
            Self::TransformError => "transform error",
        };
        f.write_str(label)
    }
}

/// Diagnostic for a rejected raw entry. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectEntry {
    /// Position of the entry in the cycle's flattened entry list
    pub index: usize,
    pub reason: RejectReason,
    /// Extra detail for transform errors
    pub detail: Option<String>,
    pub source_tag: String,
    /// Best-effort display name for the log line
    pub raw_label: String,
}

/// Server the player is currently listed on, when known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAnnotation {
    pub server_id: String,
    pub time: Option<String>,
    pub restart_at: Option<DateTime<Utc>>,
}

/// A stored player as returned by the read path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerView {
    #[serde(flatten)]
    pub player: PlayerRecord,
    pub server: Option<ServerAnnotation>,
}

/// Lookup filter for the read path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct PlayerFilter {
    pub uid: Option<String>,
    pub username: Option<String>,
}

/// Longest key or name a lookup will accept.
const MAX_FILTER_LEN: usize = 64;

impl PlayerFilter {
    /// Trim the filter and check it names at least one field.
    pub fn normalized(&self) -> Result<Self> {
        let uid = normalize_field("uid", self.uid.as_deref())?;
        let username = normalize_field("username", self.username.as_deref())?;
        if uid.is_none() && username.is_none() {
            return Err(AppError::config(
                "Filter must contain a uid or a username",
            ));
        }
        Ok(Self { uid, username })
    }

    /// Whether a record satisfies every set field.
    pub fn matches(&self, record: &PlayerRecord) -> bool {
        self.uid.as_deref().is_none_or(|uid| record.external_id == uid)
            && self
                .username
                .as_deref()
                .is_none_or(|name| record.display_name == name)
    }
}

fn normalize_field(field: &str, value: Option<&str>) -> Result<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_FILTER_LEN {
        return Err(AppError::config(format!(
            "Filter field {field} exceeds {MAX_FILTER_LEN} characters"
        )));
    }
    Ok(Some(value.to_string()))
}
