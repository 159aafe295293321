//! Index mappings for the three logical collections (spec §4.9), ported
//! from `netmet/server/db.py::DB._CATALOG`/`_DATA` and the `events` mapping
//! implied by the `0002`/`0003` upgrade scripts (dotted, flattened keys;
//! `events` stored as a `keyword` array for exact-match tag queries).

use serde_json::{json, Value};

pub const CATALOG_INDEX: &str = "netmet_catalog";
pub const DATA_ALIAS: &str = "netmet_data_v2";
pub const EVENTS_INDEX: &str = "netmet_events";

pub const CLIENTS_DOC_TYPE: &str = "clients";
pub const CONFIG_DOC_TYPE: &str = "config";
pub const EAST_WEST_DOC_TYPE: &str = "east-west";
pub const NORTH_SOUTH_DOC_TYPE: &str = "north-south";

pub fn catalog_mapping() -> Value {
    let client_props = json!({
        "host": {"type": "keyword"},
        "ip": {"type": "ip"},
        "port": {"type": "integer"},
        "mac": {"type": "keyword"},
        "az": {"type": "keyword"},
        "dc": {"type": "keyword"},
        "hypervisor": {"type": "keyword"},
        "configured": {"type": "boolean"},
        "running": {"type": "boolean"}
    });

    json!({
        "settings": {
            "index": {"number_of_shards": 3, "number_of_replicas": 3}
        },
        "mappings": {
            CLIENTS_DOC_TYPE: {
                "dynamic": "strict",
                "properties": client_props
            },
            CONFIG_DOC_TYPE: {
                "dynamic": "strict",
                "properties": {
                    "timestamp": {"type": "date"},
                    "config": {"type": "text"},
                    "applied": {"type": "boolean"},
                    "meshed": {"type": "boolean"}
                }
            }
        }
    })
}

fn data_doc_properties() -> Value {
    json!({
        "client_src.host": {"type": "keyword"},
        "client_src.ip": {"type": "ip"},
        "client_src.port": {"type": "integer"},
        "client_src.mac": {"type": "keyword"},
        "client_src.hypervisor": {"type": "keyword"},
        "client_src.az": {"type": "keyword"},
        "client_src.dc": {"type": "keyword"},
        "client_dest.host": {"type": "keyword"},
        "client_dest.ip": {"type": "ip"},
        "client_dest.port": {"type": "integer"},
        "client_dest.mac": {"type": "keyword"},
        "client_dest.hypervisor": {"type": "keyword"},
        "client_dest.az": {"type": "keyword"},
        "client_dest.dc": {"type": "keyword"},
        "dest": {"type": "keyword"},
        "protocol": {"type": "keyword"},
        "timestamp": {"type": "date"},
        "transmitted": {"type": "integer"},
        "packet_size": {"type": "integer"},
        "lost": {"type": "integer"},
        "latency_ms": {"type": "float"},
        "ret_code": {"type": "integer"},
        "events": {"type": "keyword"}
    })
}

/// The mapping applied to each new backing index behind [`DATA_ALIAS`].
pub fn data_mapping() -> Value {
    let props = data_doc_properties();
    json!({
        "settings": {
            "index": {"number_of_shards": 10, "number_of_replicas": 1}
        },
        "mappings": {
            EAST_WEST_DOC_TYPE: {"dynamic": "strict", "properties": props},
            NORTH_SOUTH_DOC_TYPE: {"dynamic": "strict", "properties": data_doc_properties()}
        }
    })
}

pub fn events_mapping() -> Value {
    json!({
        "settings": {
            "index": {"number_of_shards": 1, "number_of_replicas": 1}
        },
        "mappings": {
            "event": {
                "dynamic": "strict",
                "properties": {
                    "name": {"type": "text"},
                    "started_at": {"type": "date"},
                    "finished_at": {"type": "date"},
                    "traffic_from.type": {"type": "keyword"},
                    "traffic_from.value": {"type": "keyword"},
                    "traffic_to.type": {"type": "keyword"},
                    "traffic_to.value": {"type": "keyword"},
                    "status": {"type": "keyword"},
                    "task_id": {"type": "keyword"}
                }
            }
        }
    })
}
