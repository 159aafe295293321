//! [`MetricRecord`]: the document a Collector produces and a Pusher ships
//! to `PUT /api/v1/metrics` (spec §3, §6). Replaces the duck-typed dicts
//! built in `netmet/client/collector.py::gen_periodic_ping` with a single
//! concrete struct, per the design notes ("define a MetricRecord struct;
//! flatten only at the store edge").

use serde::{Deserialize, Serialize};

use crate::task::{ClientEndpoint, Protocol};

/// Either side of an east-west record is a full [`ClientEndpoint`]; a
/// north-south record's destination is a bare target string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricDestination {
    Client(ClientEndpoint),
    External(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub client_src: ClientEndpoint,
    pub client_dest: MetricDestination,
    pub protocol: Protocol,
    /// ISO-8601, produced by `ClockSource::now_iso8601`.
    pub timestamp: String,
    /// Milliseconds; `None` on loss (mirrors the original's `rtt and rtt *
    /// 1000` which yields `None`/`null` rather than `0` on failure).
    pub latency_ms: Option<f64>,
    pub packet_size: u32,
    pub transmitted: u8,
    pub lost: u8,
    pub ret_code: i32,
    #[serde(default)]
    pub events: Vec<String>,
}

impl MetricRecord {
    /// Invariant P1: `transmitted + lost = 1`.
    pub fn is_well_formed(&self) -> bool {
        self.transmitted + self.lost == 1
    }

    /// Builds the success/failure pair from a ping or HTTP outcome, keeping
    /// P1 correct by construction instead of by convention at call sites.
    pub fn new(
        client_src: ClientEndpoint,
        client_dest: MetricDestination,
        protocol: Protocol,
        timestamp: String,
        latency_ms: Option<f64>,
        packet_size: u32,
        success: bool,
        ret_code: i32,
    ) -> MetricRecord {
        MetricRecord {
            client_src,
            client_dest,
            protocol,
            timestamp,
            latency_ms,
            packet_size,
            transmitted: success as u8,
            lost: (!success) as u8,
            ret_code,
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> ClientEndpoint {
        ClientEndpoint {
            host: "h1".to_string(),
            ip: "10.0.0.1".to_string(),
            port: 5000,
            az: "a".to_string(),
            dc: "d".to_string(),
            mac: None,
            hypervisor: None,
            running: None,
            configured: None,
        }
    }

    #[test]
    fn success_record_has_transmitted_one_and_lost_zero() {
        let record = MetricRecord::new(
            src(),
            MetricDestination::External("1.2.3.4".to_string()),
            Protocol::Icmp,
            "2021-01-01T00:00:00.000Z".to_string(),
            Some(4.2),
            55,
            true,
            0,
        );
        assert!(record.is_well_formed());
        assert_eq!(record.transmitted, 1);
        assert_eq!(record.lost, 0);
    }

    #[test]
    fn failure_record_has_transmitted_zero_and_lost_one() {
        let record = MetricRecord::new(
            src(),
            MetricDestination::External("1.2.3.4".to_string()),
            Protocol::Http,
            "2021-01-01T00:00:00.000Z".to_string(),
            None,
            0,
            false,
            504,
        );
        assert!(record.is_well_formed());
        assert_eq!(record.transmitted, 0);
        assert_eq!(record.lost, 1);
    }
}
