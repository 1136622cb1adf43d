//! # castai-engine
//!
//! Resource reconciliation engine for the CAST AI infrastructure-as-code provider.
//!
//! The engine owns the generic machinery every CAST AI resource shares:
//! - Converts the host's dynamically typed attribute tree into typed request
//!   records and back, preserving tri-state presence (absent / zero / set)
//! - Runs the plan, create, read, update, delete and import verbs with
//!   idempotence and drift absorption
//! - Keeps a stable external identifier across every phase, including
//!   composite identifiers and paged search-by-name
//! - Handles default singletons, list-first upserts and built-in objects that
//!   are disabled instead of deleted
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatcher (host requests → verbs → host responses)        │
//! │  ResourceRegistry, ProviderContext, Diagnostics             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lifecycle Orchestrator                                     │
//! │  plan · create · read · update · delete · import            │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Attribute Codec & Schema    │  Identity & Pagination       │
//! │  Diff-gated Policies         │  Response Classifier         │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  Transport (reqwest, deadline + cancellation per verb)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use castai_engine::{Dispatcher, Request, ResourceRegistry};
//!
//! let mut registry = ResourceRegistry::new();
//! registry.register(node_template_definition());
//!
//! let dispatcher = Dispatcher::new(registry);
//! let reply = dispatcher.dispatch(Request::GetProviderSchema).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod attribute;
pub mod classify;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod dynamic;
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod normalize;
pub mod pagination;
pub mod policy;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod transport;

pub use attribute::{AttributeChange, AttributePath, AttributeTree, AttributeValue, Presence};
pub use classify::{ConflictDetection, Expect};
pub use codec::{Codec, CodecOptions, FieldCase, ZeroMode};
pub use config::ProviderConfig;
pub use context::{Verb, VerbContext};
pub use dispatch::{
    Diagnostic, DiagnosticSeverity, Dispatcher, ImportedResource, ProviderContext, Reply, Request,
    Response,
};
pub use dynamic::DynamicValue;
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use identity::{IdentityStrategy, ImportHandle, ImportKey, ResourceId};
pub use lifecycle::{Lifecycle, PlanOutcome, ResourceInstance, plan_change, plan_instance_change};
pub use pagination::{Page, PageRequest};
pub use policy::{PlanContext, Policy};
pub use registry::ResourceRegistry;
pub use resource::{
    ConflictStrategy, Created, Deprecation, Ownership, ResourceDefinition, ResourceHandler,
    Timeouts,
};
pub use retry::RetryConfig;
pub use schema::{Attribute, AttributeType, Mode, Schema, Validator};
pub use transport::{ApiClient, ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};

// Re-export async_trait for resource implementations
pub use async_trait::async_trait;
