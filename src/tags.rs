//! Tag access service: list, create-or-get, and apply tags, with a short-lived
//! cache in front of the tag list.
//!
//! One instance is built per run and shared by handle with the batch
//! processor. The cache is only refreshed by `list_tags` and invalidated by
//! `ensure_tag_exists`/`clear_cache`, both of which the orchestrator calls
//! before any worker starts.

use crate::api::TagApi;
use crate::clock::Clock;
use crate::error::{ApiError, Error, Result};
use crate::model::{Tag, TagId, WorkItemId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    tags: Vec<Tag>,
    fetched_at_ms: u64,
}

pub struct TagService {
    api: Arc<dyn TagApi>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    request_timeout: Duration,
    cache: Mutex<Option<CacheEntry>>,
}

impl TagService {
    pub fn new(
        api: Arc<dyn TagApi>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api,
            clock,
            ttl,
            request_timeout,
            cache: Mutex::new(None),
        }
    }

    /// Default per-request deadline for tag application.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Age of the cached tag list, or `None` when nothing is cached.
    pub fn cache_age(&self) -> Option<Duration> {
        let now = self.clock.now_ms();
        self.lock_cache()
            .as_ref()
            .map(|entry| Duration::from_millis(now.saturating_sub(entry.fetched_at_ms)))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CacheEntry>> {
        // A poisoned cache is still a valid cache.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_tags(&self) -> Option<Vec<Tag>> {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        self.lock_cache()
            .as_ref()
            .filter(|entry| now.saturating_sub(entry.fetched_at_ms) < ttl_ms)
            .map(|entry| entry.tags.clone())
    }

    /// All tags, from cache while it is younger than the TTL.
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        if let Some(tags) = self.fresh_tags() {
            metrics::cache_lookups().add(1, &[KeyValue::new("result", "hit")]);
            debug!(count = tags.len(), "tag list served from cache");
            return Ok(tags);
        }
        metrics::cache_lookups().add(1, &[KeyValue::new("result", "miss")]);

        let tags = self.api.list_tags().await?;
        debug!(count = tags.len(), "tag list fetched");
        *self.lock_cache() = Some(CacheEntry {
            tags: tags.clone(),
            fetched_at_ms: self.clock.now_ms(),
        });
        Ok(tags)
    }

    /// Look a tag up by exact name, creating it if absent.
    pub async fn ensure_tag_exists(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("tag name must not be empty".to_string()));
        }

        if let Some(tag) = find_by_name(&self.list_tags().await?, name) {
            info!(tag = name, id = %tag.id, "tag already exists");
            return Ok(tag);
        }

        match self.api.create_tag(name).await {
            Ok(tag) => {
                self.clear_cache();
                info!(tag = name, id = %tag.id, "tag created");
                Ok(tag)
            }
            Err(ApiError::Conflict(_)) => {
                // Created concurrently by someone else; re-read.
                warn!(tag = name, "tag creation conflicted, re-reading tag list");
                self.clear_cache();
                find_by_name(&self.list_tags().await?, name).ok_or_else(|| {
                    Error::Other(format!("tag {name:?} conflicted on create but is not listed"))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a single tag with the default request timeout.
    pub async fn apply_tag(&self, item_id: &WorkItemId, tag_id: &TagId) -> Result<()> {
        self.apply_tag_within(item_id, tag_id, self.request_timeout)
            .await
    }

    /// Apply a single tag with an explicit per-attempt deadline.
    pub async fn apply_tag_within(
        &self,
        item_id: &WorkItemId,
        tag_id: &TagId,
        timeout: Duration,
    ) -> Result<()> {
        self.apply_multiple_tags_within(item_id, std::slice::from_ref(tag_id), timeout)
            .await
    }

    /// Apply several tags in one remote call with the default request timeout.
    pub async fn apply_multiple_tags(&self, item_id: &WorkItemId, tag_ids: &[TagId]) -> Result<()> {
        self.apply_multiple_tags_within(item_id, tag_ids, self.request_timeout)
            .await
    }

    pub async fn apply_multiple_tags_within(
        &self,
        item_id: &WorkItemId,
        tag_ids: &[TagId],
        timeout: Duration,
    ) -> Result<()> {
        if tag_ids.is_empty() {
            return Err(Error::Validation(format!(
                "no tag ids given for item {item_id}"
            )));
        }
        self.api.apply_tags(item_id, tag_ids, timeout).await?;
        Ok(())
    }

    /// Drop the cached tag list.
    pub fn clear_cache(&self) {
        *self.lock_cache() = None;
    }
}

fn find_by_name(tags: &[Tag], name: &str) -> Option<Tag> {
    tags.iter().find(|t| t.name == name).cloned()
}
