//! Error types for the reconciliation engine.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::attribute::AttributePath;

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classified kind of an engine error.
///
/// The lifecycle orchestrator dispatches on the kind: `NotFound` is consumed by
/// drift absorption, `Conflict` by upsert recovery, `Transient` by the bounded
/// retry loops. Everything else reaches the host as a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected configuration (schema, policy, provider settings).
    ConfigInvalid,
    /// The remote object does not exist.
    NotFound,
    /// The remote object already exists.
    Conflict,
    /// Network failure, timeout or a retryable upstream status.
    Transient,
    /// Anything else.
    Fatal,
    /// Deadline exceeded or explicit cancellation.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigInvalid => "config_invalid",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Where an upstream failure happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Resource type name, e.g. `castai_node_template`
    pub resource_type: Option<String>,
    /// External identifier of the instance, when known
    pub resource_id: Option<String>,
    /// Method and path of the failed request
    pub endpoint: Option<String>,
    /// HTTP status code, if a response was received
    pub status: Option<u16>,
    /// Message returned by the upstream API
    pub upstream_message: Option<String>,
}

impl ErrorContext {
    /// Creates a context for a request endpoint.
    #[must_use]
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Sets the response status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the upstream message.
    #[must_use]
    pub fn with_upstream_message(mut self, message: Option<String>) -> Self {
        self.upstream_message = message;
        self
    }

    fn fill_resource(&mut self, resource_type: &str, resource_id: Option<&str>) {
        if self.resource_type.is_none() {
            self.resource_type = Some(resource_type.to_string());
        }
        if self.resource_id.is_none() {
            self.resource_id = resource_id.map(str::to_string);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(resource_type) = &self.resource_type {
            match &self.resource_id {
                Some(id) => parts.push(format!("{resource_type} {id}")),
                None => parts.push(resource_type.clone()),
            }
        }
        if let Some(endpoint) = &self.endpoint {
            parts.push(endpoint.clone());
        }
        if let Some(status) = self.status {
            parts.push(format!("status {status}"));
        }
        if let Some(message) = &self.upstream_message {
            parts.push(format!("upstream: {message}"));
        }
        if parts.is_empty() {
            f.write_str("no context")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Errors that can occur in the reconciliation engine.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration rejected by the schema, a policy or the provider settings.
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(castai_engine::config_invalid))]
    ConfigInvalid {
        /// Error message
        message: String,
        /// Offending attribute, when one can be named
        path: Option<AttributePath>,
    },

    /// Several configuration errors reported together.
    #[error("Configuration rejected with {} error(s)", errors.len())]
    #[diagnostic(code(castai_engine::config_rejected))]
    Rejected {
        /// The individual errors
        #[related]
        errors: Vec<Error>,
    },

    /// No API token was configured.
    #[error("CAST AI API token is not configured")]
    #[diagnostic(
        code(castai_engine::missing_api_token),
        help("Set the `api_token` provider attribute or the CASTAI_API_TOKEN environment variable")
    )]
    MissingApiToken,

    /// The provider has not been configured yet.
    #[error("Provider is not configured")]
    #[diagnostic(
        code(castai_engine::not_configured),
        help("The host must send ConfigureProvider before resource operations")
    )]
    NotConfigured,

    /// The remote object does not exist.
    #[error("Remote object not found ({context})")]
    #[diagnostic(code(castai_engine::not_found))]
    NotFound {
        /// Request context
        context: ErrorContext,
    },

    /// The remote object already exists.
    #[error("Remote object already exists ({context})")]
    #[diagnostic(code(castai_engine::conflict))]
    Conflict {
        /// Request context
        context: ErrorContext,
    },

    /// Retryable upstream failure.
    #[error("Transient upstream failure ({context}): {message}")]
    #[diagnostic(
        code(castai_engine::transient),
        help("The CAST AI API is temporarily unavailable; retry the operation")
    )]
    Transient {
        /// Request context
        context: ErrorContext,
        /// Error message
        message: String,
    },

    /// Upstream rejected the request with an unexpected status.
    #[error("Upstream request failed ({context}): {message}")]
    #[diagnostic(code(castai_engine::upstream_failed))]
    Fatal {
        /// Request context
        context: ErrorContext,
        /// Error message
        message: String,
    },

    /// Upstream rejected the credentials.
    #[error("Authentication failed ({context})")]
    #[diagnostic(
        code(castai_engine::authentication_failed),
        help("Check that the API token is valid and has access to the organization")
    )]
    Unauthorized {
        /// Request context
        context: ErrorContext,
    },

    /// A typed response is missing a field the engine depends on.
    #[error("Response from {endpoint} is missing required field `{field}`")]
    #[diagnostic(code(castai_engine::missing_field))]
    MissingField {
        /// Method and path of the request
        endpoint: String,
        /// Name of the missing field
        field: String,
    },

    /// The host referenced a resource type that is not registered.
    #[error("Unknown resource type: {type_name}")]
    #[diagnostic(code(castai_engine::unknown_resource_type))]
    UnknownResourceType {
        /// Requested type name
        type_name: String,
    },

    /// The import handle could not be parsed.
    #[error("Invalid import id `{handle}`: {message}")]
    #[diagnostic(code(castai_engine::invalid_import_id))]
    InvalidImportHandle {
        /// Raw handle
        handle: String,
        /// Error message
        message: String,
    },

    /// The import handle did not resolve to a remote object.
    #[error("Cannot import {type_name} `{handle}`: remote object does not exist")]
    #[diagnostic(code(castai_engine::import_not_found))]
    ImportNotFound {
        /// Resource type name
        type_name: String,
        /// Raw handle
        handle: String,
    },

    /// The attribute codec could not map a value.
    #[error("Attribute codec error at {path}: {message}")]
    #[diagnostic(code(castai_engine::codec))]
    Codec {
        /// Attribute path
        path: String,
        /// Error message
        message: String,
    },

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(castai_engine::serialization_error))]
    Serialization(#[from] serde_json::Error),

    /// MessagePack decoding error.
    #[error("MessagePack error: {message}")]
    #[diagnostic(code(castai_engine::msgpack_error))]
    MsgPack {
        /// Error message
        message: String,
    },

    /// The verb was cancelled by the host.
    #[error("Operation cancelled: {operation}")]
    #[diagnostic(code(castai_engine::cancelled))]
    Cancelled {
        /// Verb that was running
        operation: String,
    },

    /// The verb exceeded its deadline.
    #[error("Operation timed out: {operation}")]
    #[diagnostic(
        code(castai_engine::timeout),
        help("Increase the resource timeouts or retry later")
    )]
    Timeout {
        /// Verb that was running
        operation: String,
    },

    /// The resource does not support an operation.
    #[error("{type_name} does not support {operation}")]
    #[diagnostic(code(castai_engine::unsupported))]
    Unsupported {
        /// Resource type name
        type_name: String,
        /// Operation name
        operation: String,
    },
}

impl Error {
    /// Creates a configuration error without an attribute path.
    #[must_use]
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
            path: None,
        }
    }

    /// Creates a configuration error attached to an attribute.
    #[must_use]
    pub fn config_invalid_at(path: AttributePath, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Creates a fatal error with the given context.
    #[must_use]
    pub fn fatal(context: ErrorContext, message: impl Into<String>) -> Self {
        Self::Fatal {
            context,
            message: message.into(),
        }
    }

    /// Creates a not-found error for an endpoint.
    #[must_use]
    pub fn not_found(endpoint: impl Into<String>) -> Self {
        Self::NotFound {
            context: ErrorContext::for_endpoint(endpoint),
        }
    }

    /// Creates a codec error.
    #[must_use]
    pub fn codec(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Codec {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(type_name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            type_name: type_name.into(),
            operation: operation.into(),
        }
    }

    /// Returns the classified kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid { .. }
            | Self::Rejected { .. }
            | Self::MissingApiToken
            | Self::InvalidImportHandle { .. } => ErrorKind::ConfigInvalid,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Cancelled { .. } | Self::Timeout { .. } => ErrorKind::Cancelled,
            Self::NotConfigured
            | Self::Fatal { .. }
            | Self::Unauthorized { .. }
            | Self::MissingField { .. }
            | Self::UnknownResourceType { .. }
            | Self::ImportNotFound { .. }
            | Self::Codec { .. }
            | Self::Serialization(_)
            | Self::MsgPack { .. }
            | Self::Unsupported { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns true when the remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true when the remote object already exists.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Returns true for retryable failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns the upstream context, if this error carries one.
    #[must_use]
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::NotFound { context }
            | Self::Conflict { context }
            | Self::Unauthorized { context }
            | Self::Transient { context, .. }
            | Self::Fatal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Returns the attribute path of a configuration error.
    #[must_use]
    pub fn attribute_path(&self) -> Option<&AttributePath> {
        match self {
            Self::ConfigInvalid { path, .. } => path.as_ref(),
            _ => None,
        }
    }

    /// Attaches the resource type and identifier to an upstream error.
    ///
    /// Fields already set are kept.
    #[must_use]
    pub fn in_resource(mut self, resource_type: &str, resource_id: Option<&str>) -> Self {
        match &mut self {
            Self::NotFound { context }
            | Self::Conflict { context }
            | Self::Unauthorized { context }
            | Self::Transient { context, .. }
            | Self::Fatal { context, .. } => context.fill_resource(resource_type, resource_id),
            _ => {}
        }
        self
    }

    /// Flattens `Rejected` into its individual errors.
    #[must_use]
    pub fn into_flat(self) -> Vec<Self> {
        match self {
            Self::Rejected { errors } => errors.into_iter().flat_map(Self::into_flat).collect(),
            other => vec![other],
        }
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::MsgPack {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::MsgPack {
            message: err.to_string(),
        }
    }
}
