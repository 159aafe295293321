//! The client role (spec §4.4–§4.6, §6): probe scheduling, batched
//! uploading and the small HTTP surface a deployed client answers.

pub mod collector;
pub mod http;
mod pool;
pub mod pusher;
pub mod restore;

pub use collector::Collector;
pub use http::{ClientRuntime, ConfigRequest};
pub use pusher::Pusher;
