//! [`ClientEndpoint`], [`ExternalTarget`] and the tagged [`Task`] variant
//! pushed by the Mesher to each client's `POST /api/v2/config` (spec §4.3,
//! §6). `ClientEndpoint` also doubles as the catalog entry persisted to
//! `netmet_catalog`'s `clients` doc type (`netmet/server/db.py::_CLIENT_PROPS`).

use serde::{Deserialize, Serialize};

/// Identity is the `(host, port)` pair (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEndpoint {
    pub host: String,
    pub ip: String,
    pub port: u16,
    pub az: String,
    pub dc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<String>,
    /// Deployer-managed bookkeeping, absent from inbound config payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured: Option<bool>,
}

impl ClientEndpoint {
    /// The identity used for catalog diffing in the Deployer.
    pub fn identity(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Http,
}

/// A non-catalog probe destination, config-scoped (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTarget {
    pub dest: String,
    pub protocol: Protocol,
    pub period: f64,
    pub timeout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Seconds, must be >= 0.1.
    pub period: f64,
    /// Seconds, must be >= 0.01 and < period.
    pub timeout: f64,
    /// Bytes, 1..=1024. Defaults to 55 (`netmet/client/collector.py`).
    #[serde(default = "ProbeSettings::default_packet_size")]
    pub packet_size: u32,
}

impl ProbeSettings {
    fn default_packet_size() -> u32 {
        55
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            period: 5.0,
            timeout: 1.0,
            packet_size: 55,
        }
    }
}

/// Where a task probes: another catalog client (east-west) or a target
/// outside the fleet (north-south). Spec §4.3, GLOSSARY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    EastWest,
    NorthSouth,
}

/// One probe a client must run, tagged by its single JSON key
/// (`east-west` or `north-south`) per the design notes' "dynamic config
/// shapes" guidance: parsed once at the boundary into this concrete enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Task {
    #[serde(rename = "east-west")]
    EastWest {
        dest: ClientEndpoint,
        protocol: Protocol,
        settings: ProbeSettings,
    },
    #[serde(rename = "north-south")]
    NorthSouth {
        dest: String,
        protocol: Protocol,
        settings: ProbeSettings,
    },
}

impl Task {
    pub fn direction(&self) -> Direction {
        match self {
            Task::EastWest { .. } => Direction::EastWest,
            Task::NorthSouth { .. } => Direction::NorthSouth,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Task::EastWest { protocol, .. } | Task::NorthSouth { protocol, .. } => *protocol,
        }
    }

    pub fn settings(&self) -> ProbeSettings {
        match self {
            Task::EastWest { settings, .. } | Task::NorthSouth { settings, .. } => *settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(host: &str) -> ClientEndpoint {
        ClientEndpoint {
            host: host.to_string(),
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
    fn east_west_task_round_trips_through_its_tagged_json_shape() {
        let task = Task::EastWest {
            dest: client("h2"),
            protocol: Protocol::Icmp,
            settings: ProbeSettings::default(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("east-west").is_some());

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.direction(), Direction::EastWest);
    }

    #[test]
    fn north_south_task_carries_a_bare_url_destination() {
        let task = Task::NorthSouth {
            dest: "http://example.com".to_string(),
            protocol: Protocol::Http,
            settings: ProbeSettings::default(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json["north-south"]["dest"].as_str(),
            Some("http://example.com")
        );
    }
}
