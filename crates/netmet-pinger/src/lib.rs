//! The shared ICMP echo engine (spec §4.5): one raw socket per process,
//! multiplexed across every concurrent probe through a dedicated poll loop
//! instead of one socket per ping.

mod engine;
mod exit_status;
mod packet;

pub use engine::{PingCallback, PingOutcome, PingRecord, Pinger, MAX_PACKET_SIZE};
pub use exit_status::RetCode;
