//! Edge-case policy: pure decisions about failed attempts and messy input.
//!
//! Nothing in here performs I/O or reads the clock. The batch processor
//! feeds every classified [`ApiError`] through [`decide`] and acts on the
//! returned [`Decision`].

use crate::error::ApiError;
use crate::model::{WorkItem, WorkItemId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Upper bound for the escalating per-attempt timeout.
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Factor applied to the per-attempt timeout after each timeout failure.
pub const TIMEOUT_GROWTH: f64 = 1.5;

// ---------------------------------------------------------------------------
// Backoff and timeout escalation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub should_retry: bool,
    pub delay: Duration,
}

/// Exponential backoff: `base_delay * 2^attempt_index`.
///
/// The attempt count is not bounded here; the caller's retry budget is.
pub fn classify_rate_limit(attempt_index: u32, base_delay: Duration) -> RetryAdvice {
    RetryAdvice {
        should_retry: true,
        delay: backoff_delay(attempt_index, base_delay),
    }
}

fn backoff_delay(attempt_index: u32, base_delay: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
    base_delay.saturating_mul(factor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEscalation {
    pub should_retry: bool,
    pub new_timeout_ms: u64,
    /// Set when the unclamped value exceeded [`MAX_TIMEOUT_MS`].
    pub cap_reached: bool,
}

/// Grow the per-attempt timeout by [`TIMEOUT_GROWTH`], clamped to [`MAX_TIMEOUT_MS`].
///
/// Fractional milliseconds are truncated.
pub fn classify_timeout(current_timeout_ms: u64) -> TimeoutEscalation {
    let grown = (current_timeout_ms as f64 * TIMEOUT_GROWTH) as u64;
    TimeoutEscalation {
        should_retry: true,
        new_timeout_ms: grown.min(MAX_TIMEOUT_MS),
        cap_reached: grown > MAX_TIMEOUT_MS,
    }
}

// ---------------------------------------------------------------------------
// Per-attempt decision
// ---------------------------------------------------------------------------

/// State of the current item at the moment an attempt failed.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    /// Retries already performed for this item (0 after the first attempt).
    pub retries_so_far: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub current_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// 409: the tag is already on the item.
    AlreadyApplied,
    /// 404: nothing to tag.
    Skip { reason: String },
    /// Not retryable (401, unknown).
    FailFast { reason: String },
    /// Retryable but the budget is spent.
    Exhausted { reason: String },
    Retry {
        delay: Duration,
        timeout_ms: u64,
        cap_reached: bool,
    },
}

/// Map a classified failure to what the processor should do next.
pub fn decide(error: &ApiError, ctx: &AttemptContext) -> Decision {
    match error {
        ApiError::Conflict(_) => Decision::AlreadyApplied,
        ApiError::NotFound(msg) => Decision::Skip {
            reason: format!("workflow not found: {msg}"),
        },
        ApiError::Unauthorized(msg) => Decision::FailFast {
            reason: format!("unauthorized: {msg}"),
        },
        ApiError::Unknown { .. } => Decision::FailFast {
            reason: error.to_string(),
        },
        ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Network { .. } => {
            if ctx.retries_so_far >= ctx.max_retries {
                return Decision::Exhausted {
                    reason: format!("{error} after {} retries", ctx.retries_so_far),
                };
            }
            let advice = classify_rate_limit(ctx.retries_so_far, ctx.base_delay);
            if !advice.should_retry {
                return Decision::Exhausted {
                    reason: error.to_string(),
                };
            }
            let (timeout_ms, cap_reached) = match error {
                ApiError::Network {
                    timed_out: true, ..
                } => {
                    let escalation = classify_timeout(ctx.current_timeout_ms);
                    (escalation.new_timeout_ms, escalation.cap_reached)
                }
                _ => (ctx.current_timeout_ms, false),
            };
            Decision::Retry {
                delay: advice.delay,
                timeout_ms,
                cap_reached,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input hygiene
// ---------------------------------------------------------------------------

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF   // pictographs, emoticons, transport, flags
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2B00..=0x2BFF // arrows, stars
            | 0xFE00..=0xFE0F // variation selectors
            | 0xE0020..=0xE007F
            | 0x200D
            | 0x20E3
    )
}

/// Display-only cleanup: drop emoji and control characters, collapse
/// whitespace runs, trim. Never use the output in an API call.
pub fn sanitize_display_name(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| !is_emoji(*c))
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub display_name: String,
    pub item_ids: Vec<WorkItemId>,
}

/// Group items by sanitized display name; return groups with more than one member.
pub fn detect_duplicate_names(items: &[WorkItem]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<String, Vec<WorkItemId>> = BTreeMap::new();
    for item in items {
        groups
            .entry(sanitize_display_name(&item.name))
            .or_default()
            .push(item.id.clone());
    }
    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(display_name, item_ids)| DuplicateGroup {
            display_name,
            item_ids,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCheck {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ResponseCheck {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn invalid(msg: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(msg.into()),
        }
    }
}

/// Flag null, scalar, or error-shaped payloads.
pub fn validate_api_response(payload: &Value) -> ResponseCheck {
    match payload {
        Value::Null => ResponseCheck::invalid("response body is null"),
        Value::Array(entries) => match entries.iter().position(|e| !e.is_object()) {
            Some(i) => ResponseCheck::invalid(format!("entry {i} is not an object")),
            None => ResponseCheck::ok(),
        },
        Value::Object(map) => {
            if let Some(err) = map.get("error").filter(|e| !e.is_null()) {
                let msg = err
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                ResponseCheck::invalid(format!("response carries an error: {msg}"))
            } else {
                ResponseCheck::ok()
            }
        }
        other => ResponseCheck::invalid(format!("unexpected scalar response: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(retries_so_far: u32) -> AttemptContext {
        AttemptContext {
            retries_so_far,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            current_timeout_ms: 5000,
        }
    }

    #[test]
    fn rate_limit_backoff_doubles() {
        let base = Duration::from_millis(250);
        for n in 0..6 {
            let advice = classify_rate_limit(n, base);
            assert!(advice.should_retry);
            assert_eq!(advice.delay, base * 2u32.pow(n));
        }
    }

    #[test]
    fn timeout_escalation_sequence_caps_at_sixty_seconds() {
        let mut current = 5000;
        let mut seen = vec![current];
        let mut caps = Vec::new();
        for _ in 0..8 {
            let esc = classify_timeout(current);
            current = esc.new_timeout_ms;
            seen.push(current);
            caps.push(esc.cap_reached);
        }
        assert_eq!(
            seen,
            vec![5000, 7500, 11250, 16875, 25312, 37968, 56952, 60000, 60000]
        );
        assert_eq!(caps, vec![false, false, false, false, false, false, true, true]);
    }

    #[test]
    fn decide_maps_taxonomy() {
        assert_eq!(
            decide(&ApiError::Conflict("dup".into()), &ctx(0)),
            Decision::AlreadyApplied
        );
        assert!(matches!(
            decide(&ApiError::NotFound("x".into()), &ctx(0)),
            Decision::Skip { .. }
        ));
        assert!(matches!(
            decide(&ApiError::Unauthorized("x".into()), &ctx(0)),
            Decision::FailFast { .. }
        ));
        let unknown = ApiError::Unknown {
            status: Some(418),
            message: "teapot".into(),
        };
        assert!(matches!(decide(&unknown, &ctx(0)), Decision::FailFast { .. }));
    }

    #[test]
    fn decide_retries_until_budget_spent() {
        let err = ApiError::RateLimited { retry_after: None };
        assert_eq!(
            decide(&err, &ctx(2)),
            Decision::Retry {
                delay: Duration::from_millis(4000),
                timeout_ms: 5000,
                cap_reached: false,
            }
        );
        assert!(matches!(decide(&err, &ctx(3)), Decision::Exhausted { .. }));
    }

    #[test]
    fn decide_escalates_timeout_only_for_timeouts() {
        let timeout = ApiError::Network {
            timed_out: true,
            message: "deadline".into(),
        };
        let reset = ApiError::Network {
            timed_out: false,
            message: "reset".into(),
        };
        match decide(&timeout, &ctx(0)) {
            Decision::Retry { timeout_ms, .. } => assert_eq!(timeout_ms, 7500),
            other => panic!("expected retry, got {other:?}"),
        }
        match decide(&reset, &ctx(0)) {
            Decision::Retry { timeout_ms, .. } => assert_eq!(timeout_ms, 5000),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn sanitize_strips_emoji_and_control_chars() {
        assert_eq!(sanitize_display_name("🚀 Deploy\t\tPipeline ✅"), "Deploy Pipeline");
        assert_eq!(sanitize_display_name("a\u{0007}b\n\nc"), "a b c");
        assert_eq!(sanitize_display_name("Ünïcode naïve"), "Ünïcode naïve");
    }

    #[test]
    fn duplicates_group_by_display_name() {
        let item = |id: &str, name: &str| WorkItem {
            id: WorkItemId::new(id),
            name: name.to_string(),
            code: id.to_string(),
            layer: "A".to_string(),
            tag_name: "t".to_string(),
        };
        let items = vec![
            item("1", "Build"),
            item("2", "🔧 Build"),
            item("3", "Deploy"),
        ];
        let dups = detect_duplicate_names(&items);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].display_name, "Build");
        assert_eq!(dups[0].item_ids.len(), 2);
    }

    #[test]
    fn validate_api_response_flags_malformed() {
        assert!(!validate_api_response(&Value::Null).is_valid);
        assert!(!validate_api_response(&json!(42)).is_valid);
        assert!(!validate_api_response(&json!([{"id": 1}, "oops"])).is_valid);
        assert!(!validate_api_response(&json!({"error": "boom"})).is_valid);
        assert!(validate_api_response(&json!([{"id": 1, "name": "x"}])).is_valid);
        assert!(validate_api_response(&json!({"tags": []})).is_valid);
    }
}
