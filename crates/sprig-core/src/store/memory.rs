//! In-memory profile store.
//!
//! Backs tests and local experimentation with the same contract as the
//! remote store: Mutex-guarded tables, synchronous change broadcasts on
//! every mutation, and cascading section deletes. Carries call counters, a
//! position-write log, and failure-injection knobs so reconciliation and
//! aggregate behavior can be observed from the outside.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, Result};
use crate::models::{
    Link, LinkId, LinkPatch, Profile, ProfileId, ProfilePatch, Section, SectionId, SectionPatch,
};

use super::{ChangeEvent, ChangeFeed, ChangeKind, ProfileStore};

const CHANNEL_CAPACITY: usize = 64;

/// In-memory `ProfileStore` implementation
pub struct MemoryStore {
    profiles: Mutex<Vec<Profile>>,
    sections: Mutex<Vec<Section>>,
    links: Mutex<Vec<Link>>,
    profile_tx: broadcast::Sender<ChangeEvent<Profile>>,
    section_tx: broadcast::Sender<ChangeEvent<Section>>,
    link_tx: broadcast::Sender<ChangeEvent<Link>>,
    update_calls: AtomicU64,
    position_write_attempts: AtomicU64,
    position_writes: StdMutex<Vec<(String, u32)>>,
    fail_position_writes_after: AtomicI64,
    fail_section_fetches: AtomicBool,
    fail_link_fetches: AtomicBool,
    scramble_fetch_order: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (profile_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (section_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (link_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            profiles: Mutex::new(Vec::new()),
            sections: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            profile_tx,
            section_tx,
            link_tx,
            update_calls: AtomicU64::new(0),
            position_write_attempts: AtomicU64::new(0),
            position_writes: StdMutex::new(Vec::new()),
            fail_position_writes_after: AtomicI64::new(-1),
            fail_section_fetches: AtomicBool::new(false),
            fail_link_fetches: AtomicBool::new(false),
            scramble_fetch_order: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a profile row directly; profiles are created out-of-band and
    /// have no insert operation in the store contract.
    pub async fn create_profile(
        &self,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Profile {
        let profile = Profile::new(username, password_hash);
        self.profiles.lock().await.push(profile.clone());
        let _ = self.profile_tx.send(ChangeEvent {
            kind: ChangeKind::Insert,
            record: profile.clone(),
        });
        profile
    }

    /// Total update calls received across sections and links
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }

    /// Successful position writes, in the order the store received them
    pub fn position_writes(&self) -> Vec<(String, u32)> {
        self.position_writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Let the first `allowed` position writes succeed and fail every one
    /// after that
    pub fn fail_position_writes_after(&self, allowed: u64) {
        #[allow(clippy::cast_possible_wrap)] // test knob, never near i64::MAX
        self.fail_position_writes_after
            .store(allowed as i64, Ordering::Relaxed);
    }

    /// Make every subsequent sections fetch fail
    pub fn fail_section_fetches(&self, fail: bool) {
        self.fail_section_fetches.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent links fetch fail
    pub fn fail_link_fetches(&self, fail: bool) {
        self.fail_link_fetches.store(fail, Ordering::Relaxed);
    }

    /// Return fetched rows in descending-position order, violating the
    /// contract's ordering guarantee on purpose
    pub fn scramble_fetch_order(&self, scramble: bool) {
        self.scramble_fetch_order.store(scramble, Ordering::Relaxed);
    }

    fn check_position_write_budget(&self) -> Result<()> {
        let prior = self.position_write_attempts.fetch_add(1, Ordering::Relaxed);
        let limit = self.fail_position_writes_after.load(Ordering::Relaxed);
        #[allow(clippy::cast_possible_wrap)]
        if limit >= 0 && prior as i64 >= limit {
            return Err(Error::Api("injected position write failure".to_string()));
        }
        Ok(())
    }

    fn order_rows<T, K: Ord>(&self, rows: &mut [T], key: impl Fn(&T) -> K) {
        rows.sort_by_key(key);
        if self.scramble_fetch_order.load(Ordering::Relaxed) {
            rows.reverse();
        }
    }

    fn record_position_write(&self, id: String, position: Option<u32>) {
        if let Some(position) = position {
            self.position_writes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((id, position));
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn fetch_profile(&self, username: &str) -> Result<Option<Profile>> {
        let profiles = self.profiles.lock().await;
        Ok(profiles
            .iter()
            .find(|profile| profile.username == username)
            .cloned())
    }

    async fn fetch_sections(&self, profile_id: ProfileId) -> Result<Vec<Section>> {
        if self.fail_section_fetches.load(Ordering::Relaxed) {
            return Err(Error::Api("injected sections fetch failure".to_string()));
        }
        let sections = self.sections.lock().await;
        let mut rows: Vec<Section> = sections
            .iter()
            .filter(|section| section.profile_id == profile_id)
            .cloned()
            .collect();
        self.order_rows(&mut rows, |section| section.position);
        Ok(rows)
    }

    async fn fetch_links(&self, section_ids: &[SectionId]) -> Result<Vec<Link>> {
        if self.fail_link_fetches.load(Ordering::Relaxed) {
            return Err(Error::Api("injected links fetch failure".to_string()));
        }
        let links = self.links.lock().await;
        let mut rows: Vec<Link> = links
            .iter()
            .filter(|link| section_ids.contains(&link.section_id))
            .cloned()
            .collect();
        self.order_rows(&mut rows, |link| link.position);
        Ok(rows)
    }

    async fn update_profile(&self, username: &str, patch: ProfilePatch) -> Result<()> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .iter_mut()
            .find(|profile| profile.username == username)
            .ok_or_else(|| Error::NotFound(username.to_string()))?;
        patch.apply(profile);
        let _ = self.profile_tx.send(ChangeEvent {
            kind: ChangeKind::Update,
            record: profile.clone(),
        });
        Ok(())
    }

    async fn insert_section(
        &self,
        profile_id: ProfileId,
        title: &str,
        position: u32,
    ) -> Result<Section> {
        let section = Section::new(profile_id, title, position);
        self.sections.lock().await.push(section.clone());
        let _ = self.section_tx.send(ChangeEvent {
            kind: ChangeKind::Insert,
            record: section.clone(),
        });
        Ok(section)
    }

    async fn update_section(&self, id: SectionId, patch: SectionPatch) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        if patch.position.is_some() {
            self.check_position_write_budget()?;
        }
        let mut sections = self.sections.lock().await;
        let section = sections
            .iter_mut()
            .find(|section| section.id == id)
            .ok_or_else(|| Error::Api(format!("section not found: {id}")))?;
        patch.apply(section);
        self.record_position_write(id.as_str(), patch.position);
        let _ = self.section_tx.send(ChangeEvent {
            kind: ChangeKind::Update,
            record: section.clone(),
        });
        Ok(())
    }

    async fn delete_section(&self, id: SectionId) -> Result<()> {
        let mut sections = self.sections.lock().await;
        let index = sections
            .iter()
            .position(|section| section.id == id)
            .ok_or_else(|| Error::Api(format!("section not found: {id}")))?;
        let removed = sections.remove(index);
        drop(sections);

        // Cascade: a section takes its links with it.
        let mut links = self.links.lock().await;
        let mut orphaned = Vec::new();
        links.retain(|link| {
            if link.section_id == id {
                orphaned.push(link.clone());
                false
            } else {
                true
            }
        });
        drop(links);

        for link in orphaned {
            let _ = self.link_tx.send(ChangeEvent {
                kind: ChangeKind::Delete,
                record: link,
            });
        }
        let _ = self.section_tx.send(ChangeEvent {
            kind: ChangeKind::Delete,
            record: removed,
        });
        Ok(())
    }

    async fn insert_link(
        &self,
        section_id: SectionId,
        title: &str,
        url: &str,
        position: u32,
    ) -> Result<Link> {
        let link = Link::new(section_id, title, url, position);
        self.links.lock().await.push(link.clone());
        let _ = self.link_tx.send(ChangeEvent {
            kind: ChangeKind::Insert,
            record: link.clone(),
        });
        Ok(link)
    }

    async fn update_link(&self, id: LinkId, patch: LinkPatch) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        if patch.position.is_some() {
            self.check_position_write_budget()?;
        }
        let mut links = self.links.lock().await;
        let link = links
            .iter_mut()
            .find(|link| link.id == id)
            .ok_or_else(|| Error::Api(format!("link not found: {id}")))?;
        patch.apply(link);
        self.record_position_write(id.as_str(), patch.position);
        let _ = self.link_tx.send(ChangeEvent {
            kind: ChangeKind::Update,
            record: link.clone(),
        });
        Ok(())
    }

    async fn delete_link(&self, id: LinkId) -> Result<()> {
        let mut links = self.links.lock().await;
        let index = links
            .iter()
            .position(|link| link.id == id)
            .ok_or_else(|| Error::Api(format!("link not found: {id}")))?;
        let removed = links.remove(index);
        drop(links);
        let _ = self.link_tx.send(ChangeEvent {
            kind: ChangeKind::Delete,
            record: removed,
        });
        Ok(())
    }

    fn subscribe_profile(&self, username: &str) -> ChangeFeed<Profile> {
        let username = username.to_string();
        ChangeFeed::filtered(self.profile_tx.subscribe(), move |profile: &Profile| {
            profile.username == username
        })
    }

    fn subscribe_sections(&self) -> ChangeFeed<Section> {
        ChangeFeed::new(self.section_tx.subscribe())
    }

    fn subscribe_links(&self) -> ChangeFeed<Link> {
        ChangeFeed::new(self.link_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn fetch_profile_by_username() {
        let store = MemoryStore::new();
        store.create_profile("alice", "hash").await;

        let found = store.fetch_profile("alice").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(store.fetch_profile("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sections_and_links_fetch_sorted_by_position() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;

        let second = store.insert_section(profile.id, "Second", 1).await.unwrap();
        let first = store.insert_section(profile.id, "First", 0).await.unwrap();

        let sections = store.fetch_sections(profile.id).await.unwrap();
        assert_eq!(
            sections.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let b = store
            .insert_link(first.id, "B", "https://b.example", 1)
            .await
            .unwrap();
        let a = store
            .insert_link(first.id, "A", "https://a.example", 0)
            .await
            .unwrap();

        let links = store.fetch_links(&[first.id]).await.unwrap();
        assert_eq!(
            links.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
    }

    #[tokio::test]
    async fn fetch_links_scopes_to_requested_sections() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;
        let one = store.insert_section(profile.id, "One", 0).await.unwrap();
        let two = store.insert_section(profile.id, "Two", 1).await.unwrap();
        store
            .insert_link(one.id, "In one", "https://a.example", 0)
            .await
            .unwrap();
        let in_two = store
            .insert_link(two.id, "In two", "https://b.example", 0)
            .await
            .unwrap();

        let links = store.fetch_links(&[two.id]).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, in_two.id);

        assert!(store.fetch_links(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_section_cascades_to_links() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;
        let section = store.insert_section(profile.id, "One", 0).await.unwrap();
        store
            .insert_link(section.id, "A", "https://a.example", 0)
            .await
            .unwrap();

        let mut link_feed = store.subscribe_links();
        let mut section_feed = store.subscribe_sections();

        store.delete_section(section.id).await.unwrap();

        assert!(store.fetch_links(&[section.id]).await.unwrap().is_empty());
        assert!(store.fetch_sections(profile.id).await.unwrap().is_empty());

        let link_event = link_feed.next().await.unwrap();
        assert_eq!(link_event.kind, ChangeKind::Delete);
        let section_event = section_feed.next().await.unwrap();
        assert_eq!(section_event.kind, ChangeKind::Delete);
        assert_eq!(section_event.record.id, section.id);
    }

    #[tokio::test]
    async fn profile_feed_filters_by_username() {
        let store = MemoryStore::new();
        store.create_profile("alice", "hash").await;
        store.create_profile("bob", "hash").await;

        let mut feed = store.subscribe_profile("alice");

        store
            .update_profile(
                "bob",
                ProfilePatch {
                    bio: Some("bob bio".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_profile(
                "alice",
                ProfilePatch {
                    bio: Some("alice bio".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let event = feed.next().await.unwrap();
        assert_eq!(event.record.username, "alice");
        assert_eq!(event.record.bio.as_deref(), Some("alice bio"));
    }

    #[tokio::test]
    async fn position_writes_are_logged_in_order() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;
        let section = store.insert_section(profile.id, "One", 0).await.unwrap();
        let a = store
            .insert_link(section.id, "A", "https://a.example", 0)
            .await
            .unwrap();
        let b = store
            .insert_link(section.id, "B", "https://b.example", 1)
            .await
            .unwrap();

        store
            .update_link(b.id, LinkPatch::position(0))
            .await
            .unwrap();
        store
            .update_link(a.id, LinkPatch::position(1))
            .await
            .unwrap();

        assert_eq!(
            store.position_writes(),
            vec![(b.id.as_str(), 0), (a.id.as_str(), 1)]
        );
        assert_eq!(store.update_calls(), 2);
    }

    #[tokio::test]
    async fn injected_failure_stops_position_writes() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;
        let section = store.insert_section(profile.id, "One", 0).await.unwrap();

        store.fail_position_writes_after(1);

        store
            .update_section(section.id, SectionPatch::position(0))
            .await
            .unwrap();
        let error = store
            .update_section(section.id, SectionPatch::position(1))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Api(_)));
        assert_eq!(store.position_writes().len(), 1);
    }

    #[tokio::test]
    async fn scrambled_fetch_violates_ordering() {
        let store = MemoryStore::new();
        let profile = store.create_profile("alice", "hash").await;
        store.insert_section(profile.id, "First", 0).await.unwrap();
        store.insert_section(profile.id, "Second", 1).await.unwrap();

        store.scramble_fetch_order(true);
        let sections = store.fetch_sections(profile.id).await.unwrap();
        assert_eq!(sections[0].position, 1);
    }
}
