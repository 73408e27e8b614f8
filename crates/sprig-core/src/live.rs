//! Live profile aggregate.
//!
//! Maintains an in-memory `{profile, sections, links}` snapshot for one
//! username, kept consistent with the remote store via an initial load plus
//! change notifications. Profile events merge the updated record in place;
//! section and link events trigger a full re-fetch of that table
//! (refresh-on-notification; the datasets are small). Consumers read the
//! snapshot through a watch channel.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::models::{Link, Profile, ProfileId, Section, SectionId};
use crate::store::{ChangeFeed, ChangeKind, ProfileStore};

/// Point-in-time view of a profile page.
///
/// `sections` is ordered by ascending position; `links` holds the links of
/// all sections, ordered by ascending position within each section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSnapshot {
    pub profile: Profile,
    pub sections: Vec<Section>,
    pub links: Vec<Link>,
}

impl ProfileSnapshot {
    /// Links of one section, in display order
    pub fn links_for(&self, section_id: SectionId) -> Vec<Link> {
        self.links
            .iter()
            .filter(|link| link.section_id == section_id)
            .cloned()
            .collect()
    }

    fn section_ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|section| section.id).collect()
    }
}

/// A live, self-refreshing aggregate for one username.
///
/// Dropping the aggregate (or calling [`close`](Self::close)) cancels its
/// feed subscriptions; no snapshot mutation can occur afterwards.
pub struct LiveProfile {
    pub(crate) store: Arc<dyn ProfileStore>,
    username: String,
    profile_id: ProfileId,
    pub(crate) state: Arc<watch::Sender<ProfileSnapshot>>,
    pub(crate) write_gate: Arc<Mutex<()>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LiveProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveProfile")
            .field("username", &self.username)
            .field("profile_id", &self.profile_id)
            .finish_non_exhaustive()
    }
}

impl LiveProfile {
    /// Load the aggregate for `username` and start listening for changes.
    ///
    /// A missing profile row — or any failure fetching it — is terminal
    /// `NotFound`. Failures fetching sections or links degrade to empty
    /// lists: a stale-but-present page beats a broken one.
    pub async fn activate(store: Arc<dyn ProfileStore>, username: &str) -> Result<Self> {
        let profile = match store.fetch_profile(username).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return Err(Error::NotFound(username.to_string())),
            Err(error) => {
                tracing::warn!("Initial profile fetch failed for {username}: {error}");
                return Err(Error::NotFound(username.to_string()));
            }
        };
        let profile_id = profile.id;

        let mut sections = match store.fetch_sections(profile_id).await {
            Ok(sections) => sections,
            Err(error) => {
                tracing::warn!("Initial sections fetch failed for {username}: {error}");
                Vec::new()
            }
        };
        sections.sort_by_key(|section| section.position);

        let section_ids: Vec<SectionId> = sections.iter().map(|section| section.id).collect();
        let mut links = match store.fetch_links(&section_ids).await {
            Ok(links) => links,
            Err(error) => {
                tracing::warn!("Initial links fetch failed for {username}: {error}");
                Vec::new()
            }
        };
        links.sort_by_key(|link| link.position);

        let (state, _) = watch::channel(ProfileSnapshot {
            profile,
            sections,
            links,
        });

        let live = Self {
            store,
            username: username.to_string(),
            profile_id,
            state: Arc::new(state),
            write_gate: Arc::new(Mutex::new(())),
            tasks: StdMutex::new(Vec::new()),
        };
        live.spawn_listeners();
        Ok(live)
    }

    /// Username this aggregate tracks
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Id of the tracked profile
    pub const fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ProfileSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<ProfileSnapshot> {
        self.state.subscribe()
    }

    /// Cancel the change subscriptions.
    ///
    /// After this returns, queued or future store events no longer reach the
    /// snapshot. Idempotent; also invoked on drop.
    pub fn close(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn_listeners(&self) {
        let profile_task = tokio::spawn(run_profile_listener(
            self.store.subscribe_profile(&self.username),
            Arc::clone(&self.state),
        ));
        let section_task = tokio::spawn(run_section_refresh(
            Arc::clone(&self.store),
            self.store.subscribe_sections(),
            Arc::clone(&self.state),
            Arc::clone(&self.write_gate),
            self.profile_id,
        ));
        let link_task = tokio::spawn(run_link_refresh(
            Arc::clone(&self.store),
            self.store.subscribe_links(),
            Arc::clone(&self.state),
            Arc::clone(&self.write_gate),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([profile_task, section_task, link_task]);
    }
}

impl Drop for LiveProfile {
    fn drop(&mut self) {
        self.close();
    }
}

/// Merge profile updates in place; the event payload already carries the
/// whole row, so no round trip is needed.
async fn run_profile_listener(
    mut feed: ChangeFeed<Profile>,
    state: Arc<watch::Sender<ProfileSnapshot>>,
) {
    while let Some(event) = feed.next().await {
        if event.kind == ChangeKind::Update {
            let record = event.record;
            state.send_modify(|snapshot| snapshot.profile = record);
        }
    }
}

async fn run_section_refresh(
    store: Arc<dyn ProfileStore>,
    mut feed: ChangeFeed<Section>,
    state: Arc<watch::Sender<ProfileSnapshot>>,
    write_gate: Arc<Mutex<()>>,
    profile_id: ProfileId,
) {
    while let Some(_event) = feed.next().await {
        // The gate keeps this refresh from interleaving with an in-flight
        // reorder's sequential position writes.
        let _guard = write_gate.lock().await;
        match store.fetch_sections(profile_id).await {
            Ok(mut sections) => {
                sections.sort_by_key(|section| section.position);
                state.send_modify(|snapshot| snapshot.sections = sections);
            }
            Err(error) => tracing::warn!("Failed to refresh sections: {error}"),
        }
    }
}

async fn run_link_refresh(
    store: Arc<dyn ProfileStore>,
    mut feed: ChangeFeed<Link>,
    state: Arc<watch::Sender<ProfileSnapshot>>,
    write_gate: Arc<Mutex<()>>,
) {
    while let Some(_event) = feed.next().await {
        let _guard = write_gate.lock().await;
        let section_ids = state.borrow().section_ids();
        match store.fetch_links(&section_ids).await {
            Ok(mut links) => {
                links.sort_by_key(|link| link.position);
                state.send_modify(|snapshot| snapshot.links = links);
            }
            Err(error) => tracing::warn!("Failed to refresh links: {error}"),
        }
    }
}
