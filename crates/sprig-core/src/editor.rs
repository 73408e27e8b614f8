//! Password-gated editing surface for one profile.
//!
//! A `ProfileEditor` is constructed from a live aggregate plus the
//! [`AuthToken`] a successful login produced; the token's username must
//! match the aggregate's. Every operation writes through the store and
//! relies on the aggregate's change feeds to refresh the visible state.

#![allow(clippy::cast_possible_truncation)] // sibling lists are tiny

use std::sync::Arc;

use crate::auth::{AuthToken, CredentialVerifier, MIN_PASSWORD_LENGTH};
use crate::error::{Error, Result};
use crate::live::LiveProfile;
use crate::models::{Link, LinkId, LinkPatch, ProfilePatch, Section, SectionId, SectionPatch};
use crate::storage::{image_content_type, ImageKind, ImageStorage};
use crate::store::ProfileStore;
use crate::util::{file_extension, is_http_url};

/// A password-change request; validated locally before anything reaches the
/// store.
#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub current: String,
    pub new_password: String,
    pub confirm: String,
}

/// Editing operations of the owner dashboard
pub struct ProfileEditor {
    store: Arc<dyn ProfileStore>,
    live: Arc<LiveProfile>,
    verifier: Arc<dyn CredentialVerifier>,
    token: AuthToken,
}

impl ProfileEditor {
    /// Gate the editor on a session token scoped to this aggregate's
    /// username.
    pub fn new(
        store: Arc<dyn ProfileStore>,
        live: Arc<LiveProfile>,
        verifier: Arc<dyn CredentialVerifier>,
        token: AuthToken,
    ) -> Result<Self> {
        if token.username != live.username() {
            return Err(Error::InvalidInput(format!(
                "session token is for '{}', not '{}'",
                token.username,
                live.username()
            )));
        }
        Ok(Self {
            store,
            live,
            verifier,
            token,
        })
    }

    /// The aggregate this editor writes through
    pub fn live(&self) -> &Arc<LiveProfile> {
        &self.live
    }

    /// Update bio and color styling
    pub async fn update_style(&self, patch: ProfilePatch) -> Result<()> {
        self.store
            .update_profile(&self.token.username, patch)
            .await
    }

    /// Change the admin password.
    ///
    /// Confirmation mismatch, a too-short password, and a wrong current
    /// password are all rejected locally; only a successful validation
    /// writes the new salted hash.
    pub async fn change_password(&self, change: PasswordChange) -> Result<()> {
        if change.new_password != change.confirm {
            return Err(Error::InvalidInput(
                "new passwords do not match".to_string(),
            ));
        }
        if change.new_password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        // Verify against the freshest hash, not the possibly-stale snapshot.
        let profile = self
            .store
            .fetch_profile(&self.token.username)
            .await?
            .ok_or_else(|| Error::NotFound(self.token.username.clone()))?;
        if !self.verifier.verify(&change.current, &profile.password_hash) {
            return Err(Error::InvalidInput(
                "current password is incorrect".to_string(),
            ));
        }

        let patch = ProfilePatch {
            password_hash: Some(self.verifier.hash_password(&change.new_password)),
            ..Default::default()
        };
        self.store.update_profile(&self.token.username, patch).await
    }

    /// Append a new section at the end of the page
    pub async fn add_section(&self, title: &str) -> Result<Section> {
        let title = normalize_title(title)?;
        let position = self.live.snapshot().sections.len() as u32;
        self.store
            .insert_section(self.live.profile_id(), &title, position)
            .await
    }

    /// Rename a section
    pub async fn rename_section(&self, id: SectionId, title: &str) -> Result<()> {
        let title = normalize_title(title)?;
        self.store
            .update_section(id, SectionPatch::title(title))
            .await
    }

    /// Delete a section and, through the store's cascade, all its links
    pub async fn delete_section(&self, id: SectionId) -> Result<()> {
        self.store.delete_section(id).await
    }

    /// Append a new link at the end of a section
    pub async fn add_link(&self, section_id: SectionId, title: &str, url: &str) -> Result<Link> {
        let title = normalize_title(title)?;
        let url = url.trim();
        if !is_http_url(url) {
            return Err(Error::InvalidInput(format!(
                "link URL must include http:// or https://, got '{url}'"
            )));
        }

        let snapshot = self.live.snapshot();
        if !snapshot.sections.iter().any(|section| section.id == section_id) {
            return Err(Error::InvalidInput(format!("unknown section: {section_id}")));
        }
        let position = snapshot.links_for(section_id).len() as u32;
        self.store
            .insert_link(section_id, &title, url, position)
            .await
    }

    /// Update a link's title, URL, or icon
    pub async fn update_link(&self, id: LinkId, patch: LinkPatch) -> Result<()> {
        if let Some(url) = &patch.url {
            if !is_http_url(url.trim()) {
                return Err(Error::InvalidInput(format!(
                    "link URL must include http:// or https://, got '{url}'"
                )));
            }
        }
        self.store.update_link(id, patch).await
    }

    /// Delete a link
    pub async fn delete_link(&self, id: LinkId) -> Result<()> {
        self.store.delete_link(id).await
    }

    /// Point the profile image at an already-uploaded URL
    pub async fn set_profile_image(&self, url: &str) -> Result<()> {
        let patch = ProfilePatch {
            profile_image: Some(url.trim().to_string()),
            ..Default::default()
        };
        self.store.update_profile(&self.token.username, patch).await
    }

    /// Clear the profile image
    pub async fn remove_profile_image(&self) -> Result<()> {
        let patch = ProfilePatch {
            clear_profile_image: true,
            ..Default::default()
        };
        self.store.update_profile(&self.token.username, patch).await
    }

    /// Point a link's icon at an already-uploaded URL
    pub async fn set_link_icon(&self, id: LinkId, url: &str) -> Result<()> {
        let patch = LinkPatch {
            icon_url: Some(url.trim().to_string()),
            ..Default::default()
        };
        self.store.update_link(id, patch).await
    }

    /// Clear a link's icon
    pub async fn remove_link_icon(&self, id: LinkId) -> Result<()> {
        let patch = LinkPatch {
            clear_icon: true,
            ..Default::default()
        };
        self.store.update_link(id, patch).await
    }

    /// Upload image bytes and set them as the profile image.
    ///
    /// Returns the public URL the image now lives at.
    pub async fn upload_profile_image(
        &self,
        storage: &dyn ImageStorage,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String> {
        let key = storage.build_image_key(
            &self.token.username,
            ImageKind::Profile,
            &self.live.profile_id().as_str(),
            file_name,
        )?;
        let content_type = file_extension(file_name)
            .as_deref()
            .and_then(image_content_type);
        let url = storage.upload(&key, bytes, content_type).await?;
        self.set_profile_image(&url).await?;
        Ok(url)
    }

    /// Upload image bytes and set them as a link's icon.
    pub async fn upload_link_icon(
        &self,
        storage: &dyn ImageStorage,
        link_id: LinkId,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String> {
        let key = storage.build_image_key(
            &self.token.username,
            ImageKind::LinkIcon,
            &link_id.as_str(),
            file_name,
        )?;
        let content_type = file_extension(file_name)
            .as_deref()
            .and_then(image_content_type);
        let url = storage.upload(&key, bytes, content_type).await?;
        self.set_link_icon(link_id, &url).await?;
        Ok(url)
    }

    /// Drag-reorder sections; see [`LiveProfile::reorder_sections`]
    pub async fn reorder_sections(&self, moved: SectionId, target: SectionId) -> Result<()> {
        self.live.reorder_sections(moved, target).await
    }

    /// Drag-reorder links within a section; see [`LiveProfile::reorder_links`]
    pub async fn reorder_links(&self, moved: LinkId, target: LinkId) -> Result<()> {
        self.live.reorder_links(moved, target).await
    }
}

fn normalize_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::auth::{login, MemorySessionStore, SaltedSha256Verifier};
    use crate::storage::image_key;
    use crate::store::MemoryStore;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        editor: ProfileEditor,
    }

    async fn fixture() -> Fixture {
        let verifier = SaltedSha256Verifier;
        let store = Arc::new(MemoryStore::new());
        store
            .create_profile("alice", verifier.hash_password("open sesame"))
            .await;

        let sessions = MemorySessionStore::new();
        let token = login(
            store.as_ref(),
            &verifier,
            &sessions,
            "alice",
            "open sesame",
        )
        .await
        .unwrap();

        let live = Arc::new(
            LiveProfile::activate(Arc::clone(&store) as Arc<dyn ProfileStore>, "alice")
                .await
                .unwrap(),
        );
        let editor = ProfileEditor::new(
            Arc::clone(&store) as Arc<dyn ProfileStore>,
            live,
            Arc::new(verifier),
            token,
        )
        .unwrap();

        Fixture { store, editor }
    }

    /// Records uploads without any remote calls.
    struct FakeStorage {
        uploads: Mutex<Vec<(String, usize, Option<String>)>>,
    }

    impl FakeStorage {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageStorage for FakeStorage {
        fn build_image_key(
            &self,
            username: &str,
            kind: ImageKind,
            item: &str,
            file_name: &str,
        ) -> crate::error::Result<String> {
            image_key(username, kind, item, file_name)
        }

        fn public_url(&self, object_key: &str) -> String {
            format!("https://cdn.example.com/{object_key}")
        }

        async fn upload(
            &self,
            object_key: &str,
            bytes: &[u8],
            content_type: Option<&str>,
        ) -> crate::error::Result<String> {
            self.uploads.lock().unwrap().push((
                object_key.to_string(),
                bytes.len(),
                content_type.map(ToString::to_string),
            ));
            Ok(self.public_url(object_key))
        }
    }

    #[tokio::test]
    async fn editor_rejects_token_for_other_profile() {
        let verifier = SaltedSha256Verifier;
        let store = Arc::new(MemoryStore::new());
        store
            .create_profile("alice", verifier.hash_password("pw-alice"))
            .await;

        let live = Arc::new(
            LiveProfile::activate(Arc::clone(&store) as Arc<dyn ProfileStore>, "alice")
                .await
                .unwrap(),
        );
        let result = ProfileEditor::new(
            Arc::clone(&store) as Arc<dyn ProfileStore>,
            live,
            Arc::new(verifier),
            AuthToken::new("mallory"),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn change_password_validates_locally_first() {
        let f = fixture().await;

        let mismatch = f
            .editor
            .change_password(PasswordChange {
                current: "open sesame".to_string(),
                new_password: "new-password".to_string(),
                confirm: "different".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(mismatch, Error::InvalidInput(_)));

        let too_short = f
            .editor
            .change_password(PasswordChange {
                current: "open sesame".to_string(),
                new_password: "tiny".to_string(),
                confirm: "tiny".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(too_short, Error::InvalidInput(_)));

        // Neither validation failure produced a store write.
        let profile = f.store.fetch_profile("alice").await.unwrap().unwrap();
        assert!(SaltedSha256Verifier.verify("open sesame", &profile.password_hash));
    }

    #[tokio::test]
    async fn change_password_rejects_wrong_current() {
        let f = fixture().await;

        let error = f
            .editor
            .change_password(PasswordChange {
                current: "wrong".to_string(),
                new_password: "new-password".to_string(),
                confirm: "new-password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn change_password_stores_new_salted_hash() {
        let f = fixture().await;

        f.editor
            .change_password(PasswordChange {
                current: "open sesame".to_string(),
                new_password: "brand new pw".to_string(),
                confirm: "brand new pw".to_string(),
            })
            .await
            .unwrap();

        let profile = f.store.fetch_profile("alice").await.unwrap().unwrap();
        let verifier = SaltedSha256Verifier;
        assert!(verifier.verify("brand new pw", &profile.password_hash));
        assert!(!verifier.verify("open sesame", &profile.password_hash));
        assert!(!profile.password_hash.contains("brand new pw"));
    }

    #[tokio::test]
    async fn add_section_appends_at_end() {
        let f = fixture().await;
        let profile_id = f.editor.live().profile_id();
        f.store
            .insert_section(profile_id, "Existing", 0)
            .await
            .unwrap();
        // Let the aggregate absorb the insert before appending.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let section = f.editor.add_section("  Fresh  ").await.unwrap();
        assert_eq!(section.title, "Fresh");
        assert_eq!(section.position, 1);
    }

    #[tokio::test]
    async fn add_link_appends_within_its_section() {
        let f = fixture().await;
        let profile_id = f.editor.live().profile_id();
        let section = f
            .store
            .insert_section(profile_id, "Links", 0)
            .await
            .unwrap();
        f.store
            .insert_link(section.id, "First", "https://first.example", 0)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let link = f
            .editor
            .add_link(section.id, "Second", "https://second.example")
            .await
            .unwrap();
        assert_eq!(link.position, 1);
        assert_eq!(link.section_id, section.id);
    }

    #[tokio::test]
    async fn add_link_validates_inputs() {
        let f = fixture().await;
        let profile_id = f.editor.live().profile_id();
        let section = f
            .store
            .insert_section(profile_id, "Links", 0)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let bad_url = f
            .editor
            .add_link(section.id, "Title", "example.com")
            .await
            .unwrap_err();
        assert!(matches!(bad_url, Error::InvalidInput(_)));

        let bad_section = f
            .editor
            .add_link(SectionId::new(), "Title", "https://ok.example")
            .await
            .unwrap_err();
        assert!(matches!(bad_section, Error::InvalidInput(_)));

        let empty_title = f
            .editor
            .add_link(section.id, "   ", "https://ok.example")
            .await
            .unwrap_err();
        assert!(matches!(empty_title, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn link_icon_set_and_remove() {
        let f = fixture().await;
        let profile_id = f.editor.live().profile_id();
        let section = f
            .store
            .insert_section(profile_id, "Links", 0)
            .await
            .unwrap();
        let link = f
            .store
            .insert_link(section.id, "Blog", "https://blog.example", 0)
            .await
            .unwrap();

        f.editor
            .set_link_icon(link.id, "https://cdn.example.com/icon.png")
            .await
            .unwrap();
        let fetched = f.store.fetch_links(&[section.id]).await.unwrap();
        assert_eq!(
            fetched[0].icon_url.as_deref(),
            Some("https://cdn.example.com/icon.png")
        );

        f.editor.remove_link_icon(link.id).await.unwrap();
        let fetched = f.store.fetch_links(&[section.id]).await.unwrap();
        assert!(fetched[0].icon_url.is_none());
    }

    #[tokio::test]
    async fn upload_profile_image_stores_public_url() {
        let f = fixture().await;
        let storage = FakeStorage::new();

        let url = f
            .editor
            .upload_profile_image(&storage, &[1, 2, 3], "me.png")
            .await
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/alice/profile_"));

        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, 3);
        assert_eq!(uploads[0].2.as_deref(), Some("image/png"));
        drop(uploads);

        let profile = f.store.fetch_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.profile_image.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn style_update_reaches_store() {
        let f = fixture().await;

        f.editor
            .update_style(ProfilePatch {
                bio: Some("new bio".to_string()),
                background_color: Some("#101010".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let profile = f.store.fetch_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.bio.as_deref(), Some("new bio"));
        assert_eq!(profile.background_color, "#101010");
    }
}
