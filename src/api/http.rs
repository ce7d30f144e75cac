//! reqwest-backed [`TagApi`].
//!
//! Every HTTP status and transport error is classified into an [`ApiError`]
//! here, once. Callers never see a raw status code.

use super::{ApiResult, TagApi};
use crate::config::secrets::{ExposeSecret, SecretString, bearer_header};
use crate::error::{ApiError, Error, Result};
use crate::model::{Tag, TagId, WorkItemId};
use crate::policy::validate_api_response;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_SNIPPET_LEN: usize = 200;

pub struct HttpTagApi {
    client: Client,
    base_url: Url,
    token: SecretString,
}

#[derive(Serialize)]
struct CreateTagBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyTagsBody<'a> {
    tag_ids: &'a [TagId],
}

impl HttpTagApi {
    /// `request_timeout` bounds every call that does not set its own deadline.
    pub fn new(base_url: &str, token: &SecretString, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid API URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("API URL {base_url} cannot take a path")));
        }
        let client = Client::builder()
            .user_agent(concat!("workflow-tagger/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token: SecretString::from(token.expose_secret().to_owned()),
        })
    }

    /// Append `segments` to the base URL, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| malformed(format!("API URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth(&self) -> String {
        bearer_header(&self.token)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ApiResult<Response> {
        let outcome = match request.header(AUTHORIZATION, self.auth()).send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) => Err(classify_response(resp).await),
            Err(e) => Err(classify_transport(&e)),
        };
        let result_label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::api_calls().add(
            1,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("result", result_label),
            ],
        );
        debug!(operation, result = result_label, "api call finished");
        outcome
    }
}

#[async_trait]
impl TagApi for HttpTagApi {
    async fn list_tags(&self) -> ApiResult<Vec<Tag>> {
        let resp = self
            .send("list_tags", self.client.get(self.url(&["tags"])?))
            .await?;
        let payload: Value = resp.json().await.map_err(|e| classify_transport(&e))?;
        decode_tag_list(payload)
    }

    async fn create_tag(&self, name: &str) -> ApiResult<Tag> {
        let resp = self
            .send(
                "create_tag",
                self.client
                    .post(self.url(&["tags"])?)
                    .json(&CreateTagBody { name }),
            )
            .await?;
        let payload: Value = resp.json().await.map_err(|e| classify_transport(&e))?;
        decode_tag(payload)
    }

    async fn apply_tags(
        &self,
        item_id: &WorkItemId,
        tag_ids: &[TagId],
        timeout: Duration,
    ) -> ApiResult<()> {
        let url = self.url(&["items", item_id.as_str(), "tags"])?;
        self.send(
            "apply_tags",
            self.client
                .put(url)
                .timeout(timeout)
                .json(&ApplyTagsBody { tag_ids }),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> ApiResult<()> {
        self.send(
            "ping",
            self.client.get(self.url(&["tags"])?).timeout(PING_TIMEOUT),
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

async fn classify_response(resp: Response) -> ApiError {
    let status = resp.status();
    let retry_after = retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    classify_status(status, retry_after, &body)
}

/// Map a non-2xx status to the error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ApiError {
    let message = snippet(body, status);
    match status {
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
        s if s.is_server_error() => ApiError::Server {
            status: s.as_u16(),
            message,
        },
        s => ApiError::Unknown {
            status: Some(s.as_u16()),
            message,
        },
    }
}

/// Map a transport-level failure to the error taxonomy.
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Network {
            timed_out: true,
            message: err.to_string(),
        }
    } else if err.is_decode() || err.is_builder() {
        ApiError::Unknown {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    } else {
        ApiError::Network {
            timed_out: false,
            message: err.to_string(),
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn snippet(body: &str, status: StatusCode) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

fn malformed(message: String) -> ApiError {
    ApiError::Unknown {
        status: None,
        message,
    }
}

/// Accepts a bare array, or an object wrapping it under `tags` or `data`.
pub fn decode_tag_list(payload: Value) -> ApiResult<Vec<Tag>> {
    let check = validate_api_response(&payload);
    if !check.is_valid {
        return Err(malformed(check.error.unwrap_or_default()));
    }
    let entries = match payload {
        list @ Value::Array(_) => list,
        Value::Object(mut map) => match map.remove("tags").or_else(|| map.remove("data")) {
            Some(inner @ Value::Array(_)) => inner,
            _ => return Err(malformed("tag list payload has no array".to_string())),
        },
        _ => return Err(malformed("tag list payload is not a list".to_string())),
    };
    let check = validate_api_response(&entries);
    if !check.is_valid {
        return Err(malformed(check.error.unwrap_or_default()));
    }
    serde_json::from_value(entries).map_err(|e| malformed(format!("bad tag entry: {e}")))
}

/// Accepts a tag object, or one wrapped under `tag` or `data`.
pub fn decode_tag(payload: Value) -> ApiResult<Tag> {
    let check = validate_api_response(&payload);
    if !check.is_valid {
        return Err(malformed(check.error.unwrap_or_default()));
    }
    let inner = match payload {
        Value::Object(mut map) if !map.contains_key("id") => map
            .remove("tag")
            .or_else(|| map.remove("data"))
            .ok_or_else(|| malformed("tag payload has no id".to_string()))?,
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| malformed(format!("bad tag payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_status_covers_taxonomy() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, None, "exists"),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, ""),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            ApiError::Unauthorized(_)
        ));
        assert_eq!(
            classify_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                ""
            ),
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, ""),
            ApiError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, "nope"),
            ApiError::Unknown {
                status: Some(400),
                ..
            }
        ));
    }

    #[test]
    fn decode_tag_list_accepts_wrapped_and_bare() {
        let bare = decode_tag_list(json!([{"id": 1, "name": "a"}])).unwrap();
        assert_eq!(bare.len(), 1);
        let wrapped = decode_tag_list(json!({"data": [{"id": "2", "name": "b"}]})).unwrap();
        assert_eq!(wrapped[0].id, TagId::new("2"));
        assert!(decode_tag_list(Value::Null).is_err());
        assert!(decode_tag_list(json!({"count": 3})).is_err());
    }

    #[test]
    fn decode_tag_unwraps_envelope() {
        let tag = decode_tag(json!({"tag": {"id": 7, "name": "migrated"}})).unwrap();
        assert_eq!(tag.name, "migrated");
        let tag = decode_tag(json!({"id": 8, "name": "x"})).unwrap();
        assert_eq!(tag.id.as_str(), "8");
    }
}
