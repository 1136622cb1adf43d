//! Lifecycle event macros.
//!
//! Events are plain `tracing` events with a fixed target and an `event_type`
//! field, so a subscriber can filter or render them without knowing the
//! engine's types.
//!
//! # Usage
//!
//! ```rust,ignore
//! use castai_engine::emit_castai_resource_created;
//!
//! emit_castai_resource_created!("uuid-789", "castai_organization_group", 812_u64);
//! ```

/// Target of every lifecycle event.
pub const EVENT_TARGET: &str = "castai::provider";

/// Emit a resource creating event.
#[macro_export]
macro_rules! emit_castai_resource_creating {
    ($resource_type:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.creating",
            resource_type = %$resource_type,
        )
    };
}

/// Emit a resource created event.
#[macro_export]
macro_rules! emit_castai_resource_created {
    ($resource_id:expr, $resource_type:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.created",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            duration_ms = $duration_ms,
        )
    };
}

/// Emit an event when create adopts an existing remote object.
#[macro_export]
macro_rules! emit_castai_resource_adopted {
    ($resource_id:expr, $resource_type:expr, $reason:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.adopted",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            reason = %$reason,
        )
    };
}

/// Emit a resource refreshed event.
#[macro_export]
macro_rules! emit_castai_resource_refreshed {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::debug!(
            target: "castai::provider",
            event_type = "castai.resource.refreshed",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
        )
    };
}

/// Emit an event when read finds the remote object gone.
#[macro_export]
macro_rules! emit_castai_resource_drift_absorbed {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::warn!(
            target: "castai::provider",
            event_type = "castai.resource.drift_absorbed",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            "Remote object no longer exists, removing it from state"
        )
    };
}

/// Emit a resource updating event.
#[macro_export]
macro_rules! emit_castai_resource_updating {
    ($resource_id:expr, $resource_type:expr, $changed_attributes:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.updating",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            changed_attributes = ?$changed_attributes,
        )
    };
}

/// Emit a resource updated event.
#[macro_export]
macro_rules! emit_castai_resource_updated {
    ($resource_id:expr, $resource_type:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.updated",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            duration_ms = $duration_ms,
        )
    };
}

/// Emit an event when update has nothing to send.
#[macro_export]
macro_rules! emit_castai_resource_update_skipped {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::debug!(
            target: "castai::provider",
            event_type = "castai.resource.update_skipped",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
        )
    };
}

/// Emit a resource deleting event.
#[macro_export]
macro_rules! emit_castai_resource_deleting {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.deleting",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
        )
    };
}

/// Emit a resource deleted event.
#[macro_export]
macro_rules! emit_castai_resource_deleted {
    ($resource_id:expr, $resource_type:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.deleted",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            duration_ms = $duration_ms,
        )
    };
}

/// Emit an event when a built-in object is disabled instead of deleted.
#[macro_export]
macro_rules! emit_castai_resource_disabled {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.disabled",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
        )
    };
}

/// Emit an event when a default singleton is only removed from state.
#[macro_export]
macro_rules! emit_castai_resource_detached {
    ($resource_id:expr, $resource_type:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.detached",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
        )
    };
}

/// Emit a resource imported event.
#[macro_export]
macro_rules! emit_castai_resource_imported {
    ($resource_id:expr, $resource_type:expr, $handle:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.resource.imported",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            handle = %$handle,
        )
    };
}

/// Emit a resource operation failed event.
#[macro_export]
macro_rules! emit_castai_resource_failed {
    ($resource_id:expr, $resource_type:expr, $operation:expr, $error:expr) => {
        ::tracing::error!(
            target: "castai::provider",
            event_type = "castai.resource.failed",
            resource_id = %$resource_id,
            resource_type = %$resource_type,
            operation = %$operation,
            error = %$error,
        )
    };
}

/// Emit a provider configured event.
#[macro_export]
macro_rules! emit_castai_provider_configured {
    ($api_url:expr, $user_agent:expr) => {
        ::tracing::info!(
            target: "castai::provider",
            event_type = "castai.provider.configured",
            api_url = %$api_url,
            user_agent = %$user_agent,
        )
    };
}
