//! Remote tag API surface.
//!
//! [`TagApi`] is the seam between the engine and the network. The HTTP
//! implementation lives in [`http`]; tests substitute scripted fakes.

pub mod http;

use crate::error::ApiError;
use crate::model::{Tag, TagId, WorkItemId};
use async_trait::async_trait;
use std::time::Duration;

pub use http::HttpTagApi;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[async_trait]
pub trait TagApi: Send + Sync {
    /// `GET /tags`
    async fn list_tags(&self) -> ApiResult<Vec<Tag>>;

    /// `POST /tags`
    async fn create_tag(&self, name: &str) -> ApiResult<Tag>;

    /// `PUT /items/{id}/tags` with `{"tagIds": [...]}`, bounded by `timeout`.
    async fn apply_tags(
        &self,
        item_id: &WorkItemId,
        tag_ids: &[TagId],
        timeout: Duration,
    ) -> ApiResult<()>;

    /// Cheap reachability check.
    async fn ping(&self) -> ApiResult<()>;
}
