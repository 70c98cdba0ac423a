//! # agentmesh
//!
//! Agent orchestration substrate: a transport-agnostic core composed of a
//! priority message bus, a bounded-concurrency admission queue, a
//! ranked-failover content provider router, a byte-budgeted content cache,
//! and a per-concept progressive depth ladder.
//!
//! The five components compose explicitly rather than through shared global
//! state — each is constructed with a [`config::CoreConfig`] and an
//! [`observability::EventSink`], and the depth ladder additionally takes the
//! router and cache it derives content through:
//!
//! ```
//! # use std::sync::Arc;
//! # use agentmesh::config::CoreConfig;
//! # use agentmesh::observability::NoopSink;
//! # use agentmesh::bus::MessageBus;
//! # use agentmesh::admission::AdmissionQueue;
//! # use agentmesh::provider::ProviderRouter;
//! # use agentmesh::cache::ContentCache;
//! # use agentmesh::depth::DepthLadder;
//! let config = CoreConfig::default();
//! let sink = Arc::new(NoopSink);
//!
//! let bus = MessageBus::new(config.clone(), Arc::clone(&sink) as _);
//! let admission = AdmissionQueue::<()>::new(config.clone(), Arc::clone(&sink) as _);
//! let router = Arc::new(ProviderRouter::new(Arc::clone(&sink) as _));
//! let cache = Arc::new(ContentCache::new(config, Arc::clone(&sink) as _));
//! let ladder = DepthLadder::new(router, cache, sink, Default::default());
//! ```
//!
//! No component reaches for a process-wide singleton; the only crate-wide
//! state is the monotonic id generator backing [`bus::domain_types::MessageId`]
//! and [`bus::domain_types::HandlerId`]. No HTTP, RPC, or CLI framing lives
//! here — an external UI/API layer marshals its own requests into
//! [`bus::MessageBus::route`] and [`provider::ProviderRouter::generate`].

pub mod admission;
pub mod bus;
pub mod cache;
pub mod config;
pub mod depth;
pub mod domain_types;
pub mod error;
pub mod observability;
pub mod provider;

pub use bus::MessageBus;
pub use cache::ContentCache;
pub use config::CoreConfig;
pub use depth::DepthLadder;
pub use error::{Error, Result};
pub use observability::{Event, EventSink, NoopSink, RecordingSink};
pub use provider::ProviderRouter;

pub use admission::AdmissionQueue;
