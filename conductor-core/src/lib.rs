//! # Conductor Core
//!
//! Ordered event conductor: consumes change notifications from a message
//! source and applies every registered reaction stage to them strictly one
//! notification at a time, in delivery order.
//!
//! ## Overview
//!
//! - [`conductor::EventConductor`] owns the start/stop lifecycle and the single
//!   worker task that receives, filters and dispatches notifications.
//! - [`registry::ReactionRegistry`] is the ordered, runtime-mutable stage list.
//!   Each dispatch iterates an immutable snapshot of it.
//! - [`source::MessageSource`] abstracts the transport. An in-process channel
//!   source ships by default; a Redis list source sits behind the `redis`
//!   feature.
//! - [`context::ContextProvider`] receives the tenant/principal of the
//!   notification being processed and is cleared after every dispatch.
//!
//! A failing stage only affects the notification it was processing. Nothing
//! short of [`conductor::EventConductor::stop`] ends the worker loop.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use conductor_core::{
//!     ConductorConfig, EventConductor, FnStage, InMemoryContextProvider, ReactionRegistry,
//!     Notification, StageResult, source::channel,
//! };
//!
//! # async fn run() -> conductor_core::Result<()> {
//! let (_publisher, source) = channel(64);
//! let registry = ReactionRegistry::new();
//! registry.register(Arc::new(FnStage::new("catalog", |n: Notification| async move {
//!     println!("series {} changed", n.resource_id);
//!     StageResult::Ok(())
//! })));
//!
//! let conductor = EventConductor::new(
//!     ConductorConfig::default(),
//!     Arc::new(source),
//!     registry,
//!     Arc::new(InMemoryContextProvider::new()),
//! );
//! conductor.start().await?;
//! // ...
//! conductor.stop().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod notification;
pub mod registry;
pub mod source;
pub mod stage;
pub mod throttle;
mod worker;

pub use conductor::EventConductor;
pub use config::{ConductorConfig, DEFAULT_QUEUE_ID, RedisSourceConfig};
pub use context::{ContextProvider, InMemoryContextProvider, ProcessingContext};
pub use error::{ConductorError, DecodeError, Result, SourceError, StageError};
pub use notification::{Notification, NotificationKind, OrganizationId, PrincipalId, RawMessage};
pub use registry::{ReactionRegistry, StageHandle, StageSnapshot};
pub use source::MessageSource;
pub use stage::{FnStage, ReactionStage, StageResult};
pub use worker::{ConductorStats, WorkerState};
