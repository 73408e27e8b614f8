//! Remote profile store contract: row CRUD plus subscribe-to-changes feeds.
//!
//! All operations are asynchronous network calls and any of them may fail;
//! nothing in this layer retries automatically. Failures propagate to the
//! caller.

mod memory;
mod supabase;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{
    Link, LinkId, LinkPatch, Profile, ProfileId, ProfilePatch, Section, SectionId, SectionPatch,
};

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// What happened to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single change notification for one row.
///
/// For deletes, `record` carries the last-known state of the row so
/// consumers can filter by parent scope without another fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub record: T,
}

/// A cancellable live feed of change events for one table.
///
/// Dropping the feed unsubscribes. A slow consumer that lags behind the
/// channel simply skips to the next available event; consumers refresh from
/// the store on every event anyway, so missed intermediate events are
/// harmless.
pub struct ChangeFeed<T> {
    receiver: broadcast::Receiver<ChangeEvent<T>>,
    filter: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

impl<T: Clone> ChangeFeed<T> {
    /// Wrap a broadcast receiver into a feed
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<ChangeEvent<T>>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Wrap a broadcast receiver, delivering only events whose record
    /// matches the predicate
    #[must_use]
    pub fn filtered(
        receiver: broadcast::Receiver<ChangeEvent<T>>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            filter: Some(Box::new(filter)),
        }
    }

    /// Next change event, or `None` once the feed's source is gone
    pub async fn next(&mut self) -> Option<ChangeEvent<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().map_or(true, |keep| keep(&event.record)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change feed lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Contract over the external row store: fetch/update/insert/delete plus
/// subscribe-to-table-changes.
///
/// Fetches return rows ordered by ascending `position`. Inserts return the
/// created row. Subscriptions are cancelled by dropping the returned feed.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    /// Fetch a profile by its unique username
    async fn fetch_profile(&self, username: &str) -> Result<Option<Profile>>;

    /// Fetch all sections of a profile, position ascending
    async fn fetch_sections(&self, profile_id: ProfileId) -> Result<Vec<Section>>;

    /// Fetch all links belonging to the given sections, position ascending
    async fn fetch_links(&self, section_ids: &[SectionId]) -> Result<Vec<Link>>;

    /// Apply a partial update to the profile row with this username
    async fn update_profile(&self, username: &str, patch: ProfilePatch) -> Result<()>;

    /// Insert a new section at the given position
    async fn insert_section(
        &self,
        profile_id: ProfileId,
        title: &str,
        position: u32,
    ) -> Result<Section>;

    /// Apply a partial update to a section row
    async fn update_section(&self, id: SectionId, patch: SectionPatch) -> Result<()>;

    /// Delete a section; the store cascades the delete to its links
    async fn delete_section(&self, id: SectionId) -> Result<()>;

    /// Insert a new link at the given position within a section
    async fn insert_link(
        &self,
        section_id: SectionId,
        title: &str,
        url: &str,
        position: u32,
    ) -> Result<Link>;

    /// Apply a partial update to a link row
    async fn update_link(&self, id: LinkId, patch: LinkPatch) -> Result<()>;

    /// Delete a link
    async fn delete_link(&self, id: LinkId) -> Result<()>;

    /// Live changes to the profile row with this username
    fn subscribe_profile(&self, username: &str) -> ChangeFeed<Profile>;

    /// Live changes to the sections table
    fn subscribe_sections(&self) -> ChangeFeed<Section>;

    /// Live changes to the links table
    fn subscribe_links(&self) -> ChangeFeed<Link>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_ends_when_sender_dropped() {
        let (sender, receiver) = broadcast::channel::<ChangeEvent<u32>>(4);
        let mut feed = ChangeFeed::new(receiver);
        drop(sender);
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn feed_filter_skips_non_matching_events() {
        let (sender, receiver) = broadcast::channel(4);
        let mut feed = ChangeFeed::filtered(receiver, |record: &u32| *record % 2 == 0);

        for record in [1u32, 3, 4] {
            sender
                .send(ChangeEvent {
                    kind: ChangeKind::Update,
                    record,
                })
                .unwrap();
        }
        drop(sender);

        let event = feed.next().await.unwrap();
        assert_eq!(event.record, 4);
        assert!(feed.next().await.is_none());
    }
}
