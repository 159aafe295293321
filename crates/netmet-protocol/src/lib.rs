//! The shared data model: catalog entries, server config, per-client tasks
//! and the metric/event documents that flow through the store.
//!
//! Mirrors the tagged-variant and flatten/unflatten guidance from the
//! design notes: dynamic `{"east-west": {...}}` / `{"north-south": {...}}`
//! JSON is parsed once at the boundary into [`Task`], never carried as a
//! duck-typed map through the rest of the system.

pub mod config;
pub mod event;
pub mod flatten;
pub mod metric;
pub mod task;
pub mod validate;

pub use config::{Deployment, MesherOpts, ServerConfig, ServerConfigBody, StaticDeployment};
pub use event::{Event, EventStatus, TrafficEndpoint, TrafficEndpointType};
pub use metric::MetricRecord;
pub use task::{ClientEndpoint, Direction, ExternalTarget, Protocol, ProbeSettings, Task};
pub use validate::ValidationError;
