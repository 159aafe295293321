//! Bulk-indexing of [`MetricRecord`] documents into the rollover-managed
//! data alias, ported from `netmet/server/db.py::metrics_add`. Each record
//! is flattened before indexing per spec §4.9.

use netmet_common::error::Error;
use netmet_protocol::flatten::flatten;
use netmet_protocol::task::Direction;
use netmet_protocol::MetricRecord;
use serde_json::json;

use crate::client::EsClient;
use crate::schema::{DATA_ALIAS, EAST_WEST_DOC_TYPE, NORTH_SOUTH_DOC_TYPE};

pub fn metrics_add(
    client: &EsClient,
    direction: Direction,
    records: &[MetricRecord],
) -> Result<(), Error> {
    if records.is_empty() {
        return Ok(());
    }

    let doc_type = match direction {
        Direction::EastWest => EAST_WEST_DOC_TYPE,
        Direction::NorthSouth => NORTH_SOUTH_DOC_TYPE,
    };

    let mut ndjson = String::new();
    for record in records {
        let flat = flatten(&serde_json::to_value(record)?);
        ndjson.push_str(&serde_json::to_string(&json!({"index": {}}))?);
        ndjson.push('\n');
        ndjson.push_str(&serde_json::to_string(&flat)?);
        ndjson.push('\n');
    }

    client.bulk(DATA_ALIAS, doc_type, ndjson)?;
    Ok(())
}
