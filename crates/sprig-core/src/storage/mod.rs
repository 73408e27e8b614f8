//! Object storage for profile images and link icons.
//!
//! The ordering core never touches bytes; it only stores the public URL a
//! successful upload yields. Key layout is deterministic so an owner's
//! uploads stay grouped under their username.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::util::{compact_text, file_extension, is_http_url, unix_timestamp_ms};

/// What an uploaded image decorates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Profile,
    LinkIcon,
}

impl ImageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::LinkIcon => "link",
        }
    }
}

/// Upload capability turning image bytes into a stable public URL
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Build a deterministic object key for an owner's upload
    fn build_image_key(
        &self,
        username: &str,
        kind: ImageKind,
        item: &str,
        file_name: &str,
    ) -> Result<String>;

    /// Public URL serving an object key
    fn public_url(&self, object_key: &str) -> String;

    /// Upload object bytes and return their public URL
    async fn upload(
        &self,
        object_key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String>;
}

/// Content type for a known image file extension
#[must_use]
pub fn image_content_type(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Object key `{username}/{kind}_{item}_{timestamp}.{extension}`
pub(crate) fn image_key(
    username: &str,
    kind: ImageKind,
    item: &str,
    file_name: &str,
) -> Result<String> {
    let username = username.trim();
    let item = item.trim();
    if username.is_empty() || item.is_empty() {
        return Err(Error::InvalidInput(
            "image key needs a username and an item id".to_string(),
        ));
    }
    let extension = file_extension(file_name).ok_or_else(|| {
        Error::InvalidInput(format!("file name '{file_name}' has no extension"))
    })?;
    Ok(format!(
        "{username}/{}_{item}_{}.{extension}",
        kind.as_str(),
        unix_timestamp_ms()
    ))
}

/// Supabase Storage-backed image uploads
pub struct SupabaseImageStorage {
    storage_url: String,
    anon_key: String,
    bucket: String,
    client: Client,
}

impl SupabaseImageStorage {
    /// Create an upload client for the configured project bucket.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let storage_url = normalize_storage_url(&config.url)?;
        Ok(Self {
            storage_url,
            anon_key: config.anon_key.clone(),
            bucket: config.storage_bucket.clone(),
            client: Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ImageStorage for SupabaseImageStorage {
    fn build_image_key(
        &self,
        username: &str,
        kind: ImageKind,
        item: &str,
        file_name: &str,
    ) -> Result<String> {
        image_key(username, kind, item, file_name)
    }

    fn public_url(&self, object_key: &str) -> String {
        format!(
            "{}/object/public/{}/{object_key}",
            self.storage_url, self.bucket
        )
    }

    async fn upload(
        &self,
        object_key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String> {
        let mut request = self
            .client
            .post(format!(
                "{}/object/{}/{object_key}",
                self.storage_url, self.bucket
            ))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .body(bytes.to_vec());

        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "upload of {object_key} failed: {} ({status})",
                compact_text(&body)
            )));
        }

        Ok(self.public_url(object_key))
    }
}

fn normalize_storage_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() || !is_http_url(trimmed) {
        return Err(Error::InvalidInput(
            "storage URL must include http:// or https://".to_string(),
        ));
    }
    if trimmed.ends_with("/storage/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/storage/v1"))
    }
}
