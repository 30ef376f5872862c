//! Inbound webhook validation.

use std::collections::HashSet;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::ci::BuildRef;
use crate::config::DeployerConfig;

/// Header carrying the shared secret configured on the GitLab webhook
/// (`X-Gitlab-Token`; header names are matched case-insensitively).
pub const TOKEN_HEADER: &str = "x-gitlab-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Build,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Build => "build",
            EventKind::Other(other) => other,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "build" => EventKind::Build,
            other => EventKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Other(other) => other,
        }
    }
}

impl From<&str> for BuildStatus {
    fn from(value: &str) -> Self {
        match value {
            "success" => BuildStatus::Success,
            other => BuildStatus::Other(other.to_string()),
        }
    }
}

/// Why an event did not lead to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("not a successful build event (kind: {kind:?}, status: {status:?})")]
    NotApplicable {
        kind: Option<String>,
        status: Option<String>,
    },

    #[error("missing or unknown webhook token")]
    Unauthorized,

    #[error("build name {actual:?} does not match required {expected:?}")]
    NameMismatch { expected: String, actual: String },
}

/// The `object_kind` / `build_status` pair of a payload, read before any
/// secret is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventClass {
    pub kind: Option<EventKind>,
    pub status: Option<BuildStatus>,
}

impl EventClass {
    pub fn of(raw: &Value) -> Self {
        Self {
            kind: string_field(raw, "object_kind").map(EventKind::from),
            status: string_field(raw, "build_status").map(BuildStatus::from),
        }
    }

    pub fn is_successful_build(&self) -> bool {
        matches!(
            (&self.kind, &self.status),
            (Some(EventKind::Build), Some(BuildStatus::Success))
        )
    }

    fn not_applicable(self) -> Rejection {
        Rejection::NotApplicable {
            kind: self.kind.map(|kind| kind.as_str().to_string()),
            status: self.status.map(|status| status.as_str().to_string()),
        }
    }
}

/// An admitted webhook event, or a manual deployment request.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub project_id: u64,
    pub build_id: u64,
    /// The full payload, available to path templates as `{event.*}`
    pub raw: Value,
}

impl InboundEvent {
    /// Event for explicitly given ids; `raw` only feeds `{event.*}`.
    pub fn new(project_id: u64, build_id: u64, raw: Value) -> Self {
        Self {
            project_id,
            build_id,
            raw,
        }
    }

    /// Build an event from a GitLab job-event payload, which must carry
    /// `project_id` and `build_id`.
    pub fn from_json(raw: Value) -> Result<Self, Rejection> {
        let project_id = id_field(&raw, "project_id")?;
        let build_id = id_field(&raw, "build_id")?;
        Ok(Self::new(project_id, build_id, raw))
    }
}

fn string_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn id_field(raw: &Value, key: &str) -> Result<u64, Rejection> {
    let value = raw
        .get(key)
        .ok_or_else(|| Rejection::MalformedPayload(format!("missing '{key}'")))?;

    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| Rejection::MalformedPayload(format!("'{key}' is not an id: {value}")))
}

/// Decides whether an inbound request may trigger a deployment.
#[derive(Debug, Clone)]
pub struct EventGate {
    tokens: HashSet<String>,
    build_name: Option<String>,
}

impl EventGate {
    pub fn new(tokens: impl IntoIterator<Item = String>, build_name: Option<String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            build_name,
        }
    }

    pub fn from_config(config: &DeployerConfig) -> Self {
        Self::new(
            config.webhook_tokens.iter().cloned(),
            config.build_name.clone(),
        )
    }

    /// Parse and check a request body plus headers.
    ///
    /// Kind and status are checked before the token, so an uninteresting
    /// event is always answered the same way whatever token it carries.
    pub fn admit(&self, body: &[u8], headers: &HeaderMap) -> Result<InboundEvent, Rejection> {
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| Rejection::MalformedPayload(e.to_string()))?;

        let class = EventClass::of(&raw);
        if !class.is_successful_build() {
            return Err(class.not_applicable());
        }

        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        self.check_token(token)?;

        InboundEvent::from_json(raw)
    }

    pub fn check_token(&self, token: Option<&str>) -> Result<(), Rejection> {
        match token {
            Some(token) if self.tokens.contains(token) => Ok(()),
            _ => Err(Rejection::Unauthorized),
        }
    }

    /// Apply the optional build-name filter to a resolved build.
    pub fn check_build(&self, build: &BuildRef) -> Result<(), Rejection> {
        match &self.build_name {
            Some(expected) if *expected != build.name => Err(Rejection::NameMismatch {
                expected: expected.clone(),
                actual: build.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}
