//! Profile model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page background color for new profiles.
pub const DEFAULT_BACKGROUND_COLOR: &str = "#0f0f23";
/// Default text color for new profiles.
pub const DEFAULT_TEXT_COLOR: &str = "#e8e8e8";
/// Default link-button color for new profiles.
pub const DEFAULT_BUTTON_COLOR: &str = "#1a1a2e";
/// Default link-button text color for new profiles.
pub const DEFAULT_BUTTON_TEXT_COLOR: &str = "#ffffff";

/// A unique identifier for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Create a new random profile ID
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

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A profile owning the page: display attributes plus the owner's credential hash.
///
/// `username` is globally unique and immutable after creation; routing and
/// store lookups key on it. Only a salted hash of the admin password is ever
/// stored, never the secret itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique identifier
    pub id: ProfileId,
    /// Unique, immutable page handle
    pub username: String,
    /// Salted hash of the admin password (`salt$hexdigest`)
    pub password_hash: String,
    /// Page background color (hex)
    pub background_color: String,
    /// Page text color (hex)
    pub text_color: String,
    /// Link button color (hex)
    pub button_color: String,
    /// Link button text color (hex)
    pub button_text_color: String,
    /// Public URL of the profile image, when set
    pub profile_image: Option<String>,
    /// Short free-form bio
    pub bio: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Create a new profile with default styling
    #[must_use]
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            username: username.into(),
            password_hash: password_hash.into(),
            background_color: DEFAULT_BACKGROUND_COLOR.to_string(),
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            button_color: DEFAULT_BUTTON_COLOR.to_string(),
            button_text_color: DEFAULT_BUTTON_TEXT_COLOR.to_string(),
            profile_image: None,
            bio: None,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Profile")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("background_color", &self.background_color)
            .field("text_color", &self.text_color)
            .field("button_color", &self.button_color)
            .field("button_text_color", &self.button_text_color)
            .field("profile_image", &self.profile_image)
            .field("bio", &self.bio)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Partial update for a profile row.
///
/// Unset fields are left untouched; `clear_profile_image` writes an explicit
/// null so a stale image reference can be removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub bio: Option<String>,
    pub background_color: Option<String>,
    pub text_color: Option<String>,
    pub button_color: Option<String>,
    pub button_text_color: Option<String>,
    pub profile_image: Option<String>,
    pub clear_profile_image: bool,
    pub password_hash: Option<String>,
}

impl ProfilePatch {
    /// True when the patch would not change anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply this patch to an in-memory profile record
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
        if let Some(color) = &self.background_color {
            profile.background_color = color.clone();
        }
        if let Some(color) = &self.text_color {
            profile.text_color = color.clone();
        }
        if let Some(color) = &self.button_color {
            profile.button_color = color.clone();
        }
        if let Some(color) = &self.button_text_color {
            profile.button_text_color = color.clone();
        }
        if self.clear_profile_image {
            profile.profile_image = None;
        } else if let Some(image) = &self.profile_image {
            profile.profile_image = Some(image.clone());
        }
        if let Some(hash) = &self.password_hash {
            profile.password_hash = hash.clone();
        }
    }

    /// Render the patch as a row-update JSON body
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(bio) = &self.bio {
            body.insert("bio".to_string(), bio.clone().into());
        }
        if let Some(color) = &self.background_color {
            body.insert("background_color".to_string(), color.clone().into());
        }
        if let Some(color) = &self.text_color {
            body.insert("text_color".to_string(), color.clone().into());
        }
        if let Some(color) = &self.button_color {
            body.insert("button_color".to_string(), color.clone().into());
        }
        if let Some(color) = &self.button_text_color {
            body.insert("button_text_color".to_string(), color.clone().into());
        }
        if self.clear_profile_image {
            body.insert("profile_image".to_string(), serde_json::Value::Null);
        } else if let Some(image) = &self.profile_image {
            body.insert("profile_image".to_string(), image.clone().into());
        }
        if let Some(hash) = &self.password_hash {
            body.insert("password_hash".to_string(), hash.clone().into());
        }
        serde_json::Value::Object(body)
    }
}
