//! # castai-provider
//!
//! CAST AI resources on top of [`castai_engine`], plus the plugin binary that
//! serves them to an infrastructure-as-code host.
//!
//! Each resource module declares a schema, an identity strategy and a handler
//! that maps attribute trees to CAST AI REST payloads. Everything generic
//! (drift, conflicts, singletons, imports, retries) lives in the engine.
//!
//! ## Example
//!
//! ```ignore
//! use castai_engine::Request;
//!
//! let dispatcher = castai_provider::dispatcher();
//! let reply = dispatcher.dispatch(Request::GetProviderSchema).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cli;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod serve;
pub mod shutdown;

pub use provider::{PROVIDER_NAME, dispatcher, registry};
pub use serve::serve;
