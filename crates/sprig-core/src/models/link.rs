//! Link model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SectionId;

/// A unique identifier for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(Uuid);

impl LinkId {
    /// Create a new random link ID
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

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LinkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A single outbound link belonging to one section.
///
/// `position` orders a link among the links of the same section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub section_id: SectionId,
    pub title: String,
    pub url: String,
    pub icon_url: Option<String>,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// Create a new link at the given position
    #[must_use]
    pub fn new(
        section_id: SectionId,
        title: impl Into<String>,
        url: impl Into<String>,
        position: u32,
    ) -> Self {
        Self {
            id: LinkId::new(),
            section_id,
            title: title.into(),
            url: url.into(),
            icon_url: None,
            position,
            created_at: Utc::now(),
        }
    }
}

/// Partial update for a link row.
///
/// `clear_icon` writes an explicit null so a removed icon does not linger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub icon_url: Option<String>,
    pub clear_icon: bool,
    pub position: Option<u32>,
}

impl LinkPatch {
    /// Patch setting only the position
    #[must_use]
    pub const fn position(position: u32) -> Self {
        Self {
            title: None,
            url: None,
            icon_url: None,
            clear_icon: false,
            position: Some(position),
        }
    }

    /// Apply this patch to an in-memory link record
    pub fn apply(&self, link: &mut Link) {
        if let Some(title) = &self.title {
            link.title = title.clone();
        }
        if let Some(url) = &self.url {
            link.url = url.clone();
        }
        if self.clear_icon {
            link.icon_url = None;
        } else if let Some(icon) = &self.icon_url {
            link.icon_url = Some(icon.clone());
        }
        if let Some(position) = self.position {
            link.position = position;
        }
    }

    /// Render the patch as a row-update JSON body
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(title) = &self.title {
            body.insert("title".to_string(), title.clone().into());
        }
        if let Some(url) = &self.url {
            body.insert("url".to_string(), url.clone().into());
        }
        if self.clear_icon {
            body.insert("icon_url".to_string(), serde_json::Value::Null);
        } else if let Some(icon) = &self.icon_url {
            body.insert("icon_url".to_string(), icon.clone().into());
        }
        if let Some(position) = self.position {
            body.insert("position".to_string(), position.into());
        }
        serde_json::Value::Object(body)
    }
}
