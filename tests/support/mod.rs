//! Shared test doubles: a scripted in-memory `TagApi` and item builders.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workflow_tagger::api::{ApiResult, TagApi};
use workflow_tagger::error::ApiError;
use workflow_tagger::model::{Tag, TagId, WorkItem, WorkItemId};

/// One recorded `apply_tags` call.
#[derive(Debug, Clone)]
pub struct ApplyCall {
    pub item_id: WorkItemId,
    pub tag_ids: Vec<TagId>,
    pub timeout: Duration,
}

/// In-memory `TagApi`. Apply responses are scripted per item id; anything
/// unscripted succeeds.
#[derive(Default)]
pub struct ScriptedApi {
    tags: Mutex<Vec<Tag>>,
    scripts: Mutex<HashMap<String, VecDeque<ApiResult<()>>>>,
    latency: Mutex<Option<Box<dyn Fn(&WorkItemId) -> Duration + Send + Sync>>>,
    ping_error: Mutex<Option<ApiError>>,
    create_error: Mutex<Option<ApiError>>,
    created_elsewhere: Mutex<Option<Tag>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    applied: Mutex<Vec<ApplyCall>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(self, tags: Vec<Tag>) -> Self {
        *self.tags.lock().unwrap() = tags;
        self
    }

    /// Every apply call sleeps (tokio time) for the returned duration.
    pub fn with_latency(self, f: impl Fn(&WorkItemId) -> Duration + Send + Sync + 'static) -> Self {
        *self.latency.lock().unwrap() = Some(Box::new(f));
        self
    }

    pub fn script(self, item_id: &str, responses: Vec<ApiResult<()>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), responses.into());
        self
    }

    pub fn failing_ping(self, err: ApiError) -> Self {
        *self.ping_error.lock().unwrap() = Some(err);
        self
    }

    pub fn failing_create(self, err: ApiError) -> Self {
        *self.create_error.lock().unwrap() = Some(err);
        self
    }

    /// The next create answers 409 after `tag` appears in the tag list, as
    /// if another writer created it first.
    pub fn created_concurrently(self, tag: Tag) -> Self {
        *self.created_elsewhere.lock().unwrap() = Some(tag);
        self
    }

    /// Trip `token` once the n-th apply call has been issued.
    pub fn cancel_after(self, calls: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
        self
    }

    pub fn applied(&self) -> Vec<ApplyCall> {
        self.applied.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagApi for ScriptedApi {
    async fn list_tags(&self) -> ApiResult<Vec<Tag>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn create_tag(&self, name: &str) -> ApiResult<Tag> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut tags = self.tags.lock().unwrap();
        if let Some(existing) = self.created_elsewhere.lock().unwrap().take() {
            tags.push(existing);
            return Err(ApiError::Conflict(format!("tag {name} already exists")));
        }
        let tag = Tag {
            id: TagId::new(format!("tag-{}", tags.len() + 1)),
            name: name.to_string(),
            created_at: None,
            updated_at: None,
        };
        tags.push(tag.clone());
        Ok(tag)
    }

    async fn apply_tags(
        &self,
        item_id: &WorkItemId,
        tag_ids: &[TagId],
        timeout: Duration,
    ) -> ApiResult<()> {
        let call_number = self.apply_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.applied.lock().unwrap().push(ApplyCall {
            item_id: item_id.clone(),
            tag_ids: tag_ids.to_vec(),
            timeout,
        });
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if call_number >= *after {
                token.cancel();
            }
        }

        let delay = self
            .latency
            .lock()
            .unwrap()
            .as_ref()
            .map(|f| f(item_id));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(item_id.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn ping(&self) -> ApiResult<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        match self.ping_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn item(id: &str) -> WorkItem {
    WorkItem {
        id: WorkItemId::new(id),
        name: format!("Workflow {id}"),
        code: format!("WF-{id}"),
        layer: "A".to_string(),
        tag_name: "migrated".to_string(),
    }
}

pub fn items(n: usize) -> Vec<WorkItem> {
    (1..=n).map(|i| item(&i.to_string())).collect()
}

pub fn tag(id: &str, name: &str) -> Tag {
    Tag {
        id: TagId::new(id),
        name: name.to_string(),
        created_at: None,
        updated_at: None,
    }
}

pub fn timeout_err() -> ApiError {
    ApiError::Network {
        timed_out: true,
        message: "operation timed out".to_string(),
    }
}
