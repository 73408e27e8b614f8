//! Supabase-backed profile store.
//!
//! CRUD goes through the PostgREST endpoint (`/rest/v1/<table>`). Change
//! feeds are produced by per-table polling watchers: each watcher re-fetches
//! its table on an interval, diffs the row set against the previous poll,
//! and broadcasts typed insert/update/delete events. Watchers start lazily
//! on the first subscription and stop once the last feed is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{
    Link, LinkId, LinkPatch, Profile, ProfileId, ProfilePatch, Section, SectionId, SectionPatch,
};
use crate::util::{compact_text, is_http_url};

use super::{ChangeEvent, ChangeFeed, ChangeKind, ProfileStore};

const CHANNEL_CAPACITY: usize = 64;

/// Rows the polling watchers can track between polls
trait TrackedRow: Clone + PartialEq + Send + Sync + 'static {
    fn row_key(&self) -> String;
}

impl TrackedRow for Profile {
    fn row_key(&self) -> String {
        self.id.as_str()
    }
}

impl TrackedRow for Section {
    fn row_key(&self) -> String {
        self.id.as_str()
    }
}

impl TrackedRow for Link {
    fn row_key(&self) -> String {
        self.id.as_str()
    }
}

/// Remote `ProfileStore` over the Supabase REST API
pub struct SupabaseStore {
    rest: RestClient,
    poll_interval: Duration,
    watchers: StdMutex<Watchers>,
}

impl SupabaseStore {
    /// Create a store client for the configured project.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let rest_url = normalize_rest_url(&config.url)?;
        Ok(Self {
            rest: RestClient {
                client: Client::builder().build()?,
                rest_url,
                anon_key: config.anon_key.clone(),
            },
            poll_interval: config.poll_interval,
            watchers: StdMutex::new(Watchers::default()),
        })
    }

    fn spawn_watcher<T, F, Fut>(&self, fetch: F) -> Watcher<T>
    where
        T: TrackedRow,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(poll_changes(self.poll_interval, sender.clone(), fetch));
        Watcher { sender, handle }
    }
}

impl Drop for SupabaseStore {
    fn drop(&mut self) {
        let watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for watcher in watchers.profiles.values() {
            watcher.handle.abort();
        }
        if let Some(watcher) = &watchers.sections {
            watcher.handle.abort();
        }
        if let Some(watcher) = &watchers.links {
            watcher.handle.abort();
        }
    }
}

struct Watcher<T> {
    sender: broadcast::Sender<ChangeEvent<T>>,
    handle: JoinHandle<()>,
}

impl<T: TrackedRow> Watcher<T> {
    fn feed(&self) -> ChangeFeed<T> {
        ChangeFeed::new(self.sender.subscribe())
    }

    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Default)]
struct Watchers {
    profiles: HashMap<String, Watcher<Profile>>,
    sections: Option<Watcher<Section>>,
    links: Option<Watcher<Link>>,
}

#[async_trait]
impl ProfileStore for SupabaseStore {
    async fn fetch_profile(&self, username: &str) -> Result<Option<Profile>> {
        let rows: Vec<Profile> = self
            .rest
            .select("profiles", profile_query(username))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_sections(&self, profile_id: ProfileId) -> Result<Vec<Section>> {
        self.rest
            .select("sections", sections_query(profile_id))
            .await
    }

    async fn fetch_links(&self, section_ids: &[SectionId]) -> Result<Vec<Link>> {
        let Some(query) = links_query(section_ids) else {
            return Ok(Vec::new());
        };
        self.rest.select("links", query).await
    }

    async fn update_profile(&self, username: &str, patch: ProfilePatch) -> Result<()> {
        self.rest
            .update(
                "profiles",
                ("username", format!("eq.{username}")),
                patch.to_body(),
            )
            .await
    }

    async fn insert_section(
        &self,
        profile_id: ProfileId,
        title: &str,
        position: u32,
    ) -> Result<Section> {
        self.rest
            .insert(
                "sections",
                serde_json::json!({
                    "profile_id": profile_id,
                    "title": title,
                    "position": position,
                }),
            )
            .await
    }

    async fn update_section(&self, id: SectionId, patch: SectionPatch) -> Result<()> {
        self.rest
            .update("sections", ("id", format!("eq.{id}")), patch.to_body())
            .await
    }

    async fn delete_section(&self, id: SectionId) -> Result<()> {
        self.rest
            .delete("sections", ("id", format!("eq.{id}")))
            .await
    }

    async fn insert_link(
        &self,
        section_id: SectionId,
        title: &str,
        url: &str,
        position: u32,
    ) -> Result<Link> {
        self.rest
            .insert(
                "links",
                serde_json::json!({
                    "section_id": section_id,
                    "title": title,
                    "url": url,
                    "position": position,
                }),
            )
            .await
    }

    async fn update_link(&self, id: LinkId, patch: LinkPatch) -> Result<()> {
        self.rest
            .update("links", ("id", format!("eq.{id}")), patch.to_body())
            .await
    }

    async fn delete_link(&self, id: LinkId) -> Result<()> {
        self.rest.delete("links", ("id", format!("eq.{id}"))).await
    }

    fn subscribe_profile(&self, username: &str) -> ChangeFeed<Profile> {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = watchers.profiles.get(username) {
            if watcher.is_live() {
                return watcher.feed();
            }
        }
        let rest = self.rest.clone();
        let filter = username.to_string();
        let watcher = self.spawn_watcher(move || {
            let rest = rest.clone();
            let filter = filter.clone();
            async move { rest.select::<Profile>("profiles", profile_query(&filter)).await }
        });
        let feed = watcher.feed();
        watchers.profiles.insert(username.to_string(), watcher);
        feed
    }

    fn subscribe_sections(&self) -> ChangeFeed<Section> {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = &watchers.sections {
            if watcher.is_live() {
                return watcher.feed();
            }
        }
        let rest = self.rest.clone();
        let watcher = self.spawn_watcher(move || {
            let rest = rest.clone();
            async move { rest.select::<Section>("sections", select_all()).await }
        });
        let feed = watcher.feed();
        watchers.sections = Some(watcher);
        feed
    }

    fn subscribe_links(&self) -> ChangeFeed<Link> {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = &watchers.links {
            if watcher.is_live() {
                return watcher.feed();
            }
        }
        let rest = self.rest.clone();
        let watcher = self.spawn_watcher(move || {
            let rest = rest.clone();
            async move { rest.select::<Link>("links", select_all()).await }
        });
        let feed = watcher.feed();
        watchers.links = Some(watcher);
        feed
    }
}

/// Poll a table, diffing each snapshot against the previous one and
/// broadcasting the difference as change events.
///
/// The first successful poll only primes the baseline. The loop exits once
/// every subscriber has dropped its feed.
async fn poll_changes<T, F, Fut>(
    interval: Duration,
    sender: broadcast::Sender<ChangeEvent<T>>,
    fetch: F,
) where
    T: TrackedRow,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut known: Option<HashMap<String, T>> = None;

    loop {
        ticker.tick().await;
        if sender.receiver_count() == 0 {
            break;
        }
        match fetch().await {
            Ok(rows) => {
                let next: HashMap<String, T> =
                    rows.into_iter().map(|row| (row.row_key(), row)).collect();
                if let Some(previous) = &known {
                    emit_diff(previous, &next, &sender);
                }
                known = Some(next);
            }
            Err(error) => tracing::warn!("Change poll failed: {error}"),
        }
    }
}

fn emit_diff<T: TrackedRow>(
    previous: &HashMap<String, T>,
    next: &HashMap<String, T>,
    sender: &broadcast::Sender<ChangeEvent<T>>,
) {
    for (key, row) in next {
        match previous.get(key) {
            None => {
                let _ = sender.send(ChangeEvent {
                    kind: ChangeKind::Insert,
                    record: row.clone(),
                });
            }
            Some(old) if old != row => {
                let _ = sender.send(ChangeEvent {
                    kind: ChangeKind::Update,
                    record: row.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for (key, row) in previous {
        if !next.contains_key(key) {
            let _ = sender.send(ChangeEvent {
                kind: ChangeKind::Delete,
                record: row.clone(),
            });
        }
    }
}

fn select_all() -> Vec<(String, String)> {
    vec![("select".to_string(), "*".to_string())]
}

fn profile_query(username: &str) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), "*".to_string()),
        ("username".to_string(), format!("eq.{username}")),
        ("limit".to_string(), "1".to_string()),
    ]
}

fn sections_query(profile_id: ProfileId) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), "*".to_string()),
        ("profile_id".to_string(), format!("eq.{profile_id}")),
        ("order".to_string(), "position.asc".to_string()),
    ]
}

/// Links query scoped to a section id set; `None` when the set is empty
/// (an empty `in.()` filter is a PostgREST error, and there is nothing to
/// fetch anyway).
fn links_query(section_ids: &[SectionId]) -> Option<Vec<(String, String)>> {
    if section_ids.is_empty() {
        return None;
    }
    let ids = section_ids
        .iter()
        .map(SectionId::as_str)
        .collect::<Vec<_>>()
        .join(",");
    Some(vec![
        ("select".to_string(), "*".to_string()),
        ("section_id".to_string(), format!("in.({ids})")),
        ("order".to_string(), "position.asc".to_string()),
    ])
}

#[derive(Clone)]
struct RestClient {
    client: Client,
    rest_url: String,
    anon_key: String,
}

impl RestClient {
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(parse_api_error(status, &body)));
        }
        Ok(response)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: Vec<(String, String)>,
    ) -> Result<Vec<T>> {
        let request = self.authorized(
            self.client
                .get(format!("{}/{table}", self.rest_url))
                .query(&query),
        );
        let response = self.execute(request).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    async fn insert<T: DeserializeOwned>(
        &self,
        table: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let request = self.authorized(
            self.client
                .post(format!("{}/{table}", self.rest_url))
                .header("Prefer", "return=representation")
                .json(&body),
        );
        let response = self.execute(request).await?;
        let mut rows = response.json::<Vec<T>>().await?;
        if rows.is_empty() {
            return Err(Error::Api(format!("insert into {table} returned no rows")));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(
        &self,
        table: &str,
        filter: (&str, String),
        body: serde_json::Value,
    ) -> Result<()> {
        if body.as_object().is_some_and(serde_json::Map::is_empty) {
            return Ok(());
        }
        let request = self.authorized(
            self.client
                .patch(format!("{}/{table}", self.rest_url))
                .query(&[filter])
                .header("Prefer", "return=minimal")
                .json(&body),
        );
        self.execute(request).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filter: (&str, String)) -> Result<()> {
        let request = self.authorized(
            self.client
                .delete(format!("{}/{table}", self.rest_url))
                .query(&[filter]),
        );
        self.execute(request).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.details).or(payload.hint) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_rest_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(
            "Supabase URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(Error::InvalidInput(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}
