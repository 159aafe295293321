//! The server role's HTTP surface (spec §6), ported from
//! `netmet/server/main.py`'s Flask routes onto [`tiny_http`]: config
//! submission, the catalog, per-client force-refresh, metrics ingest and
//! the event tag family, plus `GET /status`.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use serde::Serialize;
use tiny_http::{Header, Method, Response, Server};
use tracing::{error, info, warn};

use netmet_common::basic_auth;
use netmet_common::clock::ClockSource;
use netmet_common::error::Error;
use netmet_common::hmac;
use netmet_common::status::StatusTracker;
use netmet_protocol::event::{Event, EventStatus};
use netmet_protocol::{MetricRecord, ServerConfigBody};
use netmet_store::EsClient;
use netmet_worker::LonelyWorker;

const FORCE_REFRESH_LOCK_RETRIES: u32 = 3;
const FORCE_REFRESH_LOCK_TTL_SECS: u64 = 10;

/// Everything one server process needs to answer its HTTP routes: the
/// store, the running Deployer/Mesher (force-woken on a fresh config push),
/// HMAC config, and the request-stats tracker (spec §4.2, §4.3, §6).
pub struct ServerRuntime {
    store: Arc<EsClient>,
    own_url: String,
    hmac_keys: Vec<String>,
    hmac_skip: bool,
    users: HashMap<String, String>,
    clock: ClockSource,
    status: Arc<StatusTracker>,
    deployer: Arc<LonelyWorker>,
    mesher: Arc<LonelyWorker>,
}

impl ServerRuntime {
    pub fn new(
        store: Arc<EsClient>,
        own_url: String,
        hmac_keys: Vec<String>,
        hmac_skip: bool,
        users: HashMap<String, String>,
        clock: ClockSource,
        deployer: Arc<LonelyWorker>,
        mesher: Arc<LonelyWorker>,
    ) -> ServerRuntime {
        ServerRuntime {
            store,
            own_url,
            hmac_keys,
            hmac_skip,
            users,
            status: Arc::new(StatusTracker::new(clock.clone())),
            clock,
            deployer,
            mesher,
        }
    }

    fn authorize(&self, body: &[u8], timestamp: Option<&str>, digest: Option<&str>) -> bool {
        if self.hmac_skip || self.hmac_keys.is_empty() {
            return true;
        }
        hmac::verify_request(body, timestamp, digest, &self.hmac_keys, &self.clock).is_ok()
    }

    fn authorize_basic(&self, authorization: Option<&str>) -> bool {
        basic_auth::check(authorization, &self.users)
    }
}

pub fn serve(runtime: Arc<ServerRuntime>, server: Server, death: Arc<AtomicBool>) {
    loop {
        if death.load(SeqCst) {
            return;
        }
        let request = match server.recv_timeout(std::time::Duration::from_millis(500)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "tiny_http accept failed");
                continue;
            }
        };
        handle(&runtime, request);
    }
}

pub fn spawn(runtime: Arc<ServerRuntime>, server: Server, death: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || serve(runtime, server, death))
}

fn handle(runtime: &Arc<ServerRuntime>, mut request: tiny_http::Request) {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();

    let mut body = Vec::new();
    let _ = request.as_reader().read_to_end(&mut body);

    let (status_code, payload) = route(runtime, &method, &url, &request, &body);

    runtime
        .status
        .record(status_code, started.elapsed().as_millis() as u64);

    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
    let mut response = Response::from_data(payload)
        .with_status_code(status_code)
        .with_header(header);
    if status_code == 401 {
        if let Ok(header) = Header::from_bytes(&b"WWW-Authenticate"[..], basic_auth::WWW_AUTHENTICATE.as_bytes()) {
            response = response.with_header(header);
        }
    }
    if let Err(e) = request.respond(response) {
        warn!(error = %e, url, "failed to write http response");
    }
}

fn route(
    runtime: &Arc<ServerRuntime>,
    method: &Method,
    url: &str,
    request: &tiny_http::Request,
    body: &[u8],
) -> (u16, Vec<u8>) {
    let path_and_segments: Vec<&str> = url.trim_start_matches('/').split('/').collect();

    if path_and_segments.as_slice() != ["status"] {
        let authorization = header_value(request, "Authorization");
        if !runtime.authorize_basic(authorization.as_deref()) {
            return (
                401,
                serde_json::to_vec(&serde_json::json!({"error": "Could not verify your access level for that URL."}))
                    .unwrap_or_default(),
            );
        }
    }

    match (method, path_and_segments.as_slice()) {
        (Method::Get, ["api", "v1", "config"]) => get_config(runtime),
        (Method::Post, ["api", "v2", "config"]) => {
            if !check_auth(runtime, request, body) {
                return json(403, &serde_json::json!({"error": "Forbidden"}));
            }
            post_config(runtime, body)
        }
        (Method::Get, ["api", "v1", "clients"]) => get_clients(runtime),
        (Method::Post, ["api", "v1", "clients", host, port]) => {
            force_refresh(runtime, host, port)
        }
        (Method::Post | Method::Put, ["api", "v1", "metrics"]) => post_metrics(runtime, body),
        (Method::Get, ["api", "v1", "metrics", _period]) => json(501, &serde_json::json!({"error": "Not Implemented"})),
        (Method::Get, ["api", "v1", "events"]) => json(501, &serde_json::json!({"error": "Not Implemented"})),
        (Method::Get, ["api", "v1", "events", id]) => get_event(runtime, id),
        (Method::Post, ["api", "v1", "events", id]) => post_event(runtime, id, body),
        (Method::Delete, ["api", "v1", "events", id]) => delete_event(runtime, id),
        (Method::Post, ["api", "v1", "events", id, "_stop"]) => stop_event(runtime, id),
        (Method::Get, ["status"]) => json(200, &runtime.status.snapshot()),
        _ => json(404, &serde_json::json!({"error": "Not Found"})),
    }
}

fn check_auth(runtime: &Arc<ServerRuntime>, request: &tiny_http::Request, body: &[u8]) -> bool {
    let timestamp = header_value(request, hmac::TIMESTAMP_HEADER);
    let digest = header_value(request, hmac::DIGEST_HEADER);
    runtime.authorize(body, timestamp.as_deref(), digest.as_deref())
}

fn header_value(request: &tiny_http::Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.to_string().eq_ignore_ascii_case(name))
        .map(|h| h.value.to_string())
}

fn get_config(runtime: &Arc<ServerRuntime>) -> (u16, Vec<u8>) {
    match netmet_store::catalog::server_config_get(&runtime.store, false) {
        Ok(Some(config)) => json(200, &config),
        Ok(None) => json(404, &serde_json::json!({"error": "Netmet is not configured"})),
        Err(e) => error_response(&e),
    }
}

fn post_config(runtime: &Arc<ServerRuntime>, body: &[u8]) -> (u16, Vec<u8>) {
    let config: ServerConfigBody = match serde_json::from_slice(body) {
        Ok(config) => config,
        Err(e) => return json(400, &serde_json::json!({"error": format!("Bad request: {e}")})),
    };

    let now = runtime.clock.now_iso8601();
    match netmet_store::catalog::server_config_add(&runtime.store, &config, &now) {
        Ok(()) => {
            runtime.deployer.force_update();
            info!("config accepted");
            json(201, &serde_json::json!({"message": "Config accepted"}))
        }
        Err(e) => error_response(&e),
    }
}

fn get_clients(runtime: &Arc<ServerRuntime>) -> (u16, Vec<u8>) {
    match netmet_store::catalog::clients_get(&runtime.store) {
        Ok(clients) => json(200, &serde_json::json!({"clients": clients})),
        Err(e) => error_response(&e),
    }
}

/// Re-meshes a single client out of band, independent of the Mesher's own
/// cadence (spec §6's "force-refresh one client's task list", up to 3 lock
/// acquire retries since the global lock never blocks, only fails fast).
fn force_refresh(runtime: &Arc<ServerRuntime>, host: &str, port: &str) -> (u16, Vec<u8>) {
    let Ok(port) = port.parse::<u16>() else {
        return json(400, &serde_json::json!({"error": "Bad request: invalid port"}));
    };

    let clients = match netmet_store::catalog::clients_get(&runtime.store) {
        Ok(clients) => clients,
        Err(e) => return error_response(&e),
    };
    if !clients.iter().any(|c| c.host == host && c.port == port) {
        return json(404, &serde_json::json!({"error": "Netmet client is not found"}));
    }

    for attempt in 0..FORCE_REFRESH_LOCK_RETRIES {
        let now = runtime.clock.now_iso8601();
        let lock = netmet_store::GlobalLock::new(&runtime.store);
        if lock.acquire("update_config", &runtime.own_url, FORCE_REFRESH_LOCK_TTL_SECS, &now) {
            lock.release("update_config");
            runtime.mesher.force_update();
            return json(202, &serde_json::json!({"message": "Refresh scheduled"}));
        }
        warn!(host, attempt, "force refresh lock contended");
    }
    json(409, &serde_json::json!({"error": "Could not acquire mesher lock"}))
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum TaggedMetric {
    EastWest { #[serde(rename = "east-west")] record: MetricRecord },
    NorthSouth { #[serde(rename = "north-south")] record: MetricRecord },
}

fn post_metrics(runtime: &Arc<ServerRuntime>, body: &[u8]) -> (u16, Vec<u8>) {
    let items: Vec<TaggedMetric> = match serde_json::from_slice(body) {
        Ok(items) => items,
        Err(e) => return json(400, &serde_json::json!({"error": format!("Bad request: {e}")})),
    };

    let mut east_west = Vec::new();
    let mut north_south = Vec::new();
    for item in items {
        match item {
            TaggedMetric::EastWest { record } => east_west.push(record),
            TaggedMetric::NorthSouth { record } => north_south.push(record),
        }
    }

    use netmet_protocol::task::Direction;
    if let Err(e) = netmet_store::metrics::metrics_add(&runtime.store, Direction::EastWest, &east_west) {
        return error_response(&e);
    }
    if let Err(e) = netmet_store::metrics::metrics_add(&runtime.store, Direction::NorthSouth, &north_south) {
        return error_response(&e);
    }
    json(201, &serde_json::json!({"message": "Metrics accepted"}))
}

fn get_event(runtime: &Arc<ServerRuntime>, id: &str) -> (u16, Vec<u8>) {
    match netmet_store::events::get(&runtime.store, id) {
        Ok(event) => json(200, &event),
        Err(Error::NotFound(_)) => json(404, &serde_json::json!({"error": "Event not found"})),
        Err(e) => error_response(&e),
    }
}

fn post_event(runtime: &Arc<ServerRuntime>, id: &str, body: &[u8]) -> (u16, Vec<u8>) {
    let mut event: Event = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(e) => return json(400, &serde_json::json!({"error": format!("Bad request: {e}")})),
    };
    event.status = EventStatus::Updating;

    match netmet_store::events::create(&runtime.store, id, &event) {
        Ok(()) => json(201, &serde_json::json!({"message": "Event created"})),
        Err(e) => error_response(&e),
    }
}

fn delete_event(runtime: &Arc<ServerRuntime>, id: &str) -> (u16, Vec<u8>) {
    match netmet_store::events::delete(&runtime.store, id) {
        Ok(()) => json(200, &serde_json::json!({"message": "Event deleted"})),
        Err(Error::NotFound(_)) => json(404, &serde_json::json!({"error": "Event not found"})),
        Err(e) => error_response(&e),
    }
}

fn stop_event(runtime: &Arc<ServerRuntime>, id: &str) -> (u16, Vec<u8>) {
    let now = runtime.clock.now_iso8601();
    match netmet_store::events::stop(&runtime.store, id, &now) {
        Ok(()) => json(200, &serde_json::json!({"message": "Event stopped"})),
        Err(Error::Conflict(msg)) => json(409, &serde_json::json!({"error": msg})),
        Err(Error::NotFound(_)) => json(404, &serde_json::json!({"error": "Event not found"})),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &Error) -> (u16, Vec<u8>) {
    (e.status_code(), serde_json::to_vec(&serde_json::json!({"error": e.to_string()})).unwrap_or_default())
}

fn json<T: Serialize>(status: u16, value: &T) -> (u16, Vec<u8>) {
    (status, serde_json::to_vec(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmet_protocol::task::ClientEndpoint;

    #[test]
    fn tagged_metric_parses_east_west_envelope() {
        let record = MetricRecord::new(
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
            },
            netmet_protocol::metric::MetricDestination::External("1.2.3.4".to_string()),
            netmet_protocol::task::Protocol::Icmp,
            "2021-01-01T00:00:00.000Z".to_string(),
            Some(1.0),
            55,
            true,
            0,
        );
        let body = serde_json::to_vec(&[serde_json::json!({"east-west": record})]).unwrap();
        let items: Vec<TaggedMetric> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], TaggedMetric::EastWest { .. }));
    }
}
