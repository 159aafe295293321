//! The server role (spec §4.2, §4.3, §6): catalog/config reconciliation
//! (Deployer), full-mesh task distribution (Mesher), and the fleet-facing
//! HTTP API backed by [`netmet_store`].

pub mod deployer;
pub mod http;
pub mod mesher;

pub use http::{serve, spawn, ServerRuntime};
