//! Event tagging (spec §4.7): bulk stamping/un-stamping of event ids onto
//! historical metric documents via async update-by-query, ported from the
//! two-phase prepare/dispatch/record-task-id sequence spec §4.7 describes
//! (the Python source never implemented this against a concrete store;
//! this follows the spec directly).

use netmet_common::error::Error;
use netmet_protocol::event::{Event, TrafficEndpoint};
use serde_json::json;

use crate::client::EsClient;
use crate::schema::{DATA_ALIAS, EAST_WEST_DOC_TYPE, EVENTS_INDEX, NORTH_SOUTH_DOC_TYPE};

const EVENT_DOC_TYPE: &str = "event";

#[derive(Clone, Copy)]
pub enum TagOp {
    Add,
    Remove,
}

impl TagOp {
    fn script(&self, event_id: &str) -> serde_json::Value {
        match self {
            TagOp::Add => json!({
                "source": "ctx._source.events.add(params.id)",
                "lang": "painless",
                "params": {"id": event_id}
            }),
            TagOp::Remove => json!({
                "source": "ctx._source.events.remove(ctx._source.events.indexOf(params.id))",
                "lang": "painless",
                "params": {"id": event_id}
            }),
        }
    }
}

fn time_range_filter(event: &Event) -> serde_json::Value {
    let mut range = json!({"gte": event.started_at});
    if let Some(finished_at) = &event.finished_at {
        range["lte"] = json!(finished_at);
    }
    json!({"range": {"timestamp": range}})
}

fn endpoint_term(field_prefix: &str, endpoint: &TrafficEndpoint) -> serde_json::Value {
    let field = format!("{field_prefix}.{}", serde_json::to_value(endpoint.kind).unwrap().as_str().unwrap());
    json!({"term": {field: endpoint.value}})
}

fn predicate(event: &Event, event_id: &str, op: TagOp) -> serde_json::Value {
    let mut must = vec![time_range_filter(event)];
    if let Some(from) = &event.traffic_from {
        must.push(endpoint_term("client_src", from));
    }
    if let Some(to) = &event.traffic_to {
        must.push(endpoint_term("client_dest", to));
    }

    let events_contains = json!({"term": {"events": event_id}});
    match op {
        TagOp::Add => must.push(json!({"bool": {"must_not": [events_contains]}})),
        TagOp::Remove => must.push(events_contains),
    }

    json!({"query": {"bool": {"must": must}}, "script": op.script(event_id)})
}

/// Dispatches the async update-by-query against both data doc types (spec
/// §4.7 step 2). Returns the store task id used for `GlobalLock`-free
/// progress polling.
pub fn dispatch_tag(
    client: &EsClient,
    event: &Event,
    event_id: &str,
    op: TagOp,
) -> Result<String, Error> {
    let body = predicate(event, event_id, op);
    let doc_types = format!("{EAST_WEST_DOC_TYPE},{NORTH_SOUTH_DOC_TYPE}");
    client.update_by_query_async(DATA_ALIAS, &doc_types, &body)
}

/// Spec §4.7 step 1: read the Event with its version, poll any referenced
/// in-flight task and surface a conflict if it's still running, then
/// CAS-update to `{task_id: null, status: "updating"}`.
pub fn prepare_update(client: &EsClient, event_id: &str) -> Result<i64, Error> {
    let (event, version) = get_with_version(client, event_id)?;

    if let Some(task_id) = &event.task_id {
        let status = client.task_status(task_id)?;
        let completed = status["completed"].as_bool().unwrap_or(true);
        if !completed {
            return Err(Error::Conflict(format!(
                "event {event_id} still has an in-flight tag task ({task_id})"
            )));
        }
    }

    let response = client.update_doc_versioned(
        EVENTS_INDEX,
        EVENT_DOC_TYPE,
        event_id,
        &json!({"doc": {"task_id": null, "status": "updating"}}),
        version,
    )?;
    Ok(response["_version"].as_i64().unwrap_or(version + 1))
}

/// Spec §4.7 step 3: CAS-update the prepared Event to
/// `{task_id: <returned>, status: "created"}`.
pub fn record_task_id(client: &EsClient, event_id: &str, task_id: &str, version: i64) -> Result<(), Error> {
    client.update_doc_versioned(
        EVENTS_INDEX,
        EVENT_DOC_TYPE,
        event_id,
        &json!({"doc": {"task_id": task_id, "status": "created"}}),
        version,
    )?;
    Ok(())
}

pub fn get(client: &EsClient, event_id: &str) -> Result<Event, Error> {
    get_with_version(client, event_id).map(|(event, _)| event)
}

fn get_with_version(client: &EsClient, event_id: &str) -> Result<(Event, i64), Error> {
    let response = client.get_doc(EVENTS_INDEX, EVENT_DOC_TYPE, event_id)?;
    let event = serde_json::from_value(response["_source"].clone()).map_err(Error::Serde)?;
    let version = response["_version"].as_i64().unwrap_or(1);
    Ok((event, version))
}

pub fn create(client: &EsClient, event_id: &str, event: &Event) -> Result<(), Error> {
    client.index_doc(EVENTS_INDEX, EVENT_DOC_TYPE, Some(event_id), &serde_json::to_value(event)?)?;
    dispatch(client, event_id, event, TagOp::Add)
}

/// `stop(id)` — rejects if already stopped.
pub fn stop(client: &EsClient, event_id: &str, now_iso8601: &str) -> Result<(), Error> {
    let event = get(client, event_id)?;
    if event.finished_at.is_some() {
        return Err(Error::Conflict(format!("event {event_id} is already stopped")));
    }
    client.update_doc(
        EVENTS_INDEX,
        EVENT_DOC_TYPE,
        event_id,
        &json!({"doc": {"finished_at": now_iso8601}}),
    )?;
    Ok(())
}

pub fn delete(client: &EsClient, event_id: &str) -> Result<(), Error> {
    let event = get(client, event_id)?;
    dispatch(client, event_id, &event, TagOp::Remove)?;
    client.update_doc(
        EVENTS_INDEX,
        EVENT_DOC_TYPE,
        event_id,
        &json!({"doc": {"status": "deleted"}}),
    )?;
    Ok(())
}

fn dispatch(client: &EsClient, event_id: &str, event: &Event, op: TagOp) -> Result<(), Error> {
    let version = prepare_update(client, event_id)?;
    let task_id = dispatch_tag(client, event, event_id, op)?;
    record_task_id(client, event_id, &task_id, version)
}
