//! Response classifier: HTTP outcomes to engine error kinds.

use serde::Deserialize;

use crate::error::{Error, ErrorContext, Result};
use crate::transport::{ApiResponse, TransportError};

/// Statuses a verb accepts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// 200
    Ok,
    /// 200 or 201
    Created,
    /// 200, 202 or 204
    NoContent,
}

impl Expect {
    /// Returns true when `status` is a success for this expectation.
    #[must_use]
    pub fn accepts(self, status: u16) -> bool {
        match self {
            Self::Ok => status == 200,
            Self::Created => matches!(status, 200 | 201),
            Self::NoContent => matches!(status, 200 | 202 | 204),
        }
    }
}

/// How an endpoint reports that the object already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictDetection {
    /// Only 409.
    #[default]
    Status,
    /// 409, or a 200/400 body carrying an "already exists" code.
    StatusOrBody,
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Expected status.
    Success,
    /// 404.
    NotFound,
    /// The object already exists.
    Conflict,
    /// 429, 502, 503 or 504.
    Transient,
    /// 401 or 403.
    Unauthorized,
    /// Anything else.
    Fatal,
}

/// Error body returned by the CAST AI API.
#[derive(Debug, Default, Deserialize)]
struct UpstreamError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstreamError {
    fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    fn text(&self) -> Option<String> {
        self.message.clone().or_else(|| self.error.clone())
    }

    fn signals_conflict(&self) -> bool {
        let code = self.code.as_ref().map(|code| match code {
            serde_json::Value::String(s) => s.to_ascii_lowercase(),
            other => other.to_string(),
        });
        let by_code = code.is_some_and(|c| c == "already_exists" || c == "alreadyexists" || c == "6");
        let by_message = self
            .text()
            .is_some_and(|m| m.to_ascii_lowercase().contains("already exists"));
        by_code || by_message
    }
}

/// Classifies a received response.
#[must_use]
pub fn classify(status: u16, body: &[u8], expect: Expect, conflicts: ConflictDetection) -> Outcome {
    if conflicts == ConflictDetection::StatusOrBody
        && matches!(status, 200 | 400)
        && UpstreamError::parse(body).is_some_and(|e| e.signals_conflict())
    {
        return Outcome::Conflict;
    }
    if expect.accepts(status) {
        return Outcome::Success;
    }
    match status {
        404 => Outcome::NotFound,
        409 => Outcome::Conflict,
        429 | 502 | 503 | 504 => Outcome::Transient,
        401 | 403 => Outcome::Unauthorized,
        _ => Outcome::Fatal,
    }
}

/// Turns a response into `Ok` or the matching error.
///
/// # Errors
///
/// Returns the classified error for any non-success outcome.
pub fn check(
    response: ApiResponse,
    expect: Expect,
    conflicts: ConflictDetection,
    context: ErrorContext,
) -> Result<ApiResponse> {
    let outcome = classify(response.status, &response.body, expect, conflicts);
    if outcome == Outcome::Success {
        return Ok(response);
    }

    let upstream = UpstreamError::parse(&response.body).and_then(|e| e.text());
    let body_text = String::from_utf8_lossy(&response.body).trim().to_string();
    let context = context
        .with_status(response.status)
        .with_upstream_message(upstream.clone().or_else(|| (!body_text.is_empty()).then(|| body_text.clone())));

    Err(match outcome {
        Outcome::Success => return Ok(response),
        Outcome::NotFound => Error::NotFound { context },
        Outcome::Conflict => Error::Conflict { context },
        Outcome::Unauthorized => Error::Unauthorized { context },
        Outcome::Transient => Error::Transient {
            message: format!("upstream returned {}", response.status),
            context,
        },
        Outcome::Fatal => Error::Fatal {
            message: format!("unexpected status {}", response.status),
            context,
        },
    })
}

/// Maps a transport failure (no response received).
#[must_use]
pub fn transport_failure(err: &TransportError, context: ErrorContext) -> Error {
    match err {
        TransportError::Timeout | TransportError::Connect(_) => Error::Transient {
            context,
            message: err.to_string(),
        },
        TransportError::Other(_) => Error::Fatal {
            context,
            message: err.to_string(),
        },
    }
}

/// Requires a field of a typed response.
///
/// # Errors
///
/// Returns `MissingField` when the value is absent or empty.
pub fn require_field(value: Option<String>, endpoint: &str, field: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| Error::MissingField {
        endpoint: endpoint.to_string(),
        field: field.to_string(),
    })
}
