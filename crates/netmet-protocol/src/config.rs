//! [`ServerConfig`]: the append-only record an operator posts to
//! `POST /api/v1/config` (spec §3, §6). Grounded on `netmet/server/db.py`'s
//! `server_config_*` family — `config` is stored as a JSON string alongside
//! `applied`/`meshed`/`timestamp`, and `id` is assigned by the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::ClientEndpoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticDeployment {
    pub clients: Vec<ClientEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "static")]
    pub static_deployment: StaticDeployment,
}

/// `mesher.{plugin: opts}` — exactly one plugin key, opts are plugin-defined
/// (spec §4.3's `schema()`/`mesh()` contract). Kept as a raw JSON map since
/// only the `full_mesh` plugin is implemented here; future plugins add
/// variants without touching callers that only look at `deployment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesherOpts(pub HashMap<String, Value>);

impl MesherOpts {
    pub fn plugin_name(&self) -> Option<&str> {
        self.0.keys().next().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfigBody {
    pub deployment: Deployment,
    pub mesher: MesherOpts,
    #[serde(default)]
    pub external: Vec<crate::task::ExternalTarget>,
}

/// The envelope stored in `netmet_catalog`'s `config` doc type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Store-assigned id; absent before the first `server_config_add`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub config: ServerConfigBody,
    pub applied: bool,
    pub meshed: bool,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerConfig {
        ServerConfig {
            id: Some("abc".to_string()),
            config: ServerConfigBody {
                deployment: Deployment {
                    static_deployment: StaticDeployment { clients: vec![] },
                },
                mesher: MesherOpts(HashMap::from([(
                    "full_mesh".to_string(),
                    Value::Object(Default::default()),
                )])),
                external: vec![],
            },
            applied: false,
            meshed: false,
            timestamp: "2021-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = sample();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn static_key_serializes_without_the_rust_keyword_suffix() {
        let cfg = sample();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json["config"]["deployment"]["static"].is_object());
    }

    #[test]
    fn plugin_name_reads_the_sole_mesher_key() {
        let cfg = sample();
        assert_eq!(cfg.config.mesher.plugin_name(), Some("full_mesh"));
    }
}
