//! Catalog (clients + config) operations over `netmet_catalog`, ported from
//! `netmet/server/db.py`'s `clients_get`/`clients_set` and
//! `server_config_*` family.

use netmet_common::error::Error;
use netmet_protocol::{ClientEndpoint, ServerConfig, ServerConfigBody};
use serde_json::json;

use crate::client::EsClient;
use crate::schema::{CATALOG_INDEX, CLIENTS_DOC_TYPE, CONFIG_DOC_TYPE};

/// ES won't return more than 10k hits in one `size` page; the fleet this
/// spec targets never approaches that (spec §4.9 cites the same ceiling
/// verbatim from `netmet/server/db.py::MAX_AMOUNT_OF_SERVERS`).
const MAX_CLIENTS: u32 = 10_000;

pub fn clients_get(client: &EsClient) -> Result<Vec<ClientEndpoint>, Error> {
    let body = json!({"size": MAX_CLIENTS});
    let response = client.search(CATALOG_INDEX, CLIENTS_DOC_TYPE, &body)?;

    let hits = response["hits"]["hits"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    hits.into_iter()
        .map(|hit| serde_json::from_value(hit["_source"].clone()).map_err(Error::Serde))
        .collect()
}

/// Atomically replaces the catalog: delete-by-match-all, then bulk-index
/// the new set (spec §4.2 step 5).
pub fn clients_set(client: &EsClient, catalog: &[ClientEndpoint]) -> Result<(), Error> {
    client.delete_by_query(
        CATALOG_INDEX,
        CLIENTS_DOC_TYPE,
        &json!({"query": {"match_all": {}}}),
    )?;

    let mut ndjson = String::new();
    for c in catalog {
        ndjson.push_str(&serde_json::to_string(&json!({"index": {}}))?);
        ndjson.push('\n');
        ndjson.push_str(&serde_json::to_string(c)?);
        ndjson.push('\n');
    }
    if !catalog.is_empty() {
        client.bulk(CATALOG_INDEX, CLIENTS_DOC_TYPE, ndjson)?;
    }
    Ok(())
}

pub fn server_config_get(
    client: &EsClient,
    only_applied: bool,
) -> Result<Option<ServerConfig>, Error> {
    let mut query = json!({
        "sort": {"timestamp": {"order": "desc"}},
        "size": 1
    });
    if only_applied {
        query["query"] = json!({"term": {"applied": true}});
    }

    let response = client.search(CATALOG_INDEX, CONFIG_DOC_TYPE, &query)?;
    let hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();
    let Some(hit) = hits.into_iter().next() else {
        return Ok(None);
    };

    let source = &hit["_source"];
    let config_str = source["config"]
        .as_str()
        .ok_or_else(|| Error::Validation("config field is not a JSON string".to_string()))?;
    let config: ServerConfigBody = serde_json::from_str(config_str)?;

    Ok(Some(ServerConfig {
        id: hit["_id"].as_str().map(str::to_string),
        config,
        applied: source["applied"].as_bool().unwrap_or(false),
        meshed: source["meshed"].as_bool().unwrap_or(false),
        timestamp: source["timestamp"].as_str().unwrap_or_default().to_string(),
    }))
}

pub fn server_config_add(
    client: &EsClient,
    config: &ServerConfigBody,
    now_iso8601: &str,
) -> Result<(), Error> {
    let body = json!({
        "config": serde_json::to_string(config)?,
        "applied": false,
        "meshed": false,
        "timestamp": now_iso8601
    });
    client.index_doc(CATALOG_INDEX, CONFIG_DOC_TYPE, None, &body)?;
    Ok(())
}

pub fn server_config_apply(client: &EsClient, id: &str) -> Result<(), Error> {
    client.update_doc(
        CATALOG_INDEX,
        CONFIG_DOC_TYPE,
        id,
        &json!({"doc": {"applied": true}}),
    )?;
    Ok(())
}

pub fn server_config_meshed(client: &EsClient, id: &str) -> Result<(), Error> {
    client.update_doc(
        CATALOG_INDEX,
        CONFIG_DOC_TYPE,
        id,
        &json!({"doc": {"meshed": true}}),
    )?;
    Ok(())
}
