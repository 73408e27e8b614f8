//! Section model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProfileId;

/// A unique identifier for a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(Uuid);

impl SectionId {
    /// Create a new random section ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A titled group of links belonging to one profile.
///
/// `position` orders a section among its siblings: positions of a profile's
/// sections form a dense zero-based permutation after any successful
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub profile_id: ProfileId,
    pub title: String,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

impl Section {
    /// Create a new section at the given position
    #[must_use]
    pub fn new(profile_id: ProfileId, title: impl Into<String>, position: u32) -> Self {
        Self {
            id: SectionId::new(),
            profile_id,
            title: title.into(),
            position,
            created_at: Utc::now(),
        }
    }
}

/// Partial update for a section row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPatch {
    pub title: Option<String>,
    pub position: Option<u32>,
}

impl SectionPatch {
    /// Patch setting only the position
    #[must_use]
    pub const fn position(position: u32) -> Self {
        Self {
            title: None,
            position: Some(position),
        }
    }

    /// Patch setting only the title
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            position: None,
        }
    }

    /// Apply this patch to an in-memory section record
    pub fn apply(&self, section: &mut Section) {
        if let Some(title) = &self.title {
            section.title = title.clone();
        }
        if let Some(position) = self.position {
            section.position = position;
        }
    }

    /// Render the patch as a row-update JSON body
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(title) = &self.title {
            body.insert("title".to_string(), title.clone().into());
        }
        if let Some(position) = self.position {
            body.insert("position".to_string(), position.into());
        }
        serde_json::Value::Object(body)
    }
}
