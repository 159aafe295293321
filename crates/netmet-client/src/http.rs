//! The client role's HTTP surface (spec §6), ported from
//! `netmet/client/main.py`'s Flask routes onto [`tiny_http`]: `GET
//! /api/v1/config`, `POST /api/v2/config`, `POST /api/v1/unregister` and
//! `GET /status`, with HMAC auth middleware guarding the two mutating
//! routes.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Response, Server};
use tracing::{error, info, warn};

use netmet_common::basic_auth;
use netmet_common::clock::ClockSource;
use netmet_common::hmac;
use netmet_common::status::StatusTracker;
use netmet_protocol::task::{ClientEndpoint, ProbeSettings, Task};
use netmet_protocol::validate::validate_tasks;

use crate::collector::Collector;
use crate::restore;

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    pub netmet_server: Option<String>,
    pub client_host: ClientEndpoint,
    #[serde(default)]
    pub settings: ProbeSettings,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Clone)]
struct CurrentConfig {
    netmet_server: Option<String>,
    client_host: ClientEndpoint,
    settings: ProbeSettings,
    tasks: Vec<Task>,
}

/// Everything one client process needs to answer its own HTTP routes and
/// rebuild its Collector under config pushes (spec §4.4, §6).
pub struct ClientRuntime {
    port: u16,
    base_dir: std::path::PathBuf,
    hmac_keys: Vec<String>,
    hmac_skip: bool,
    users: HashMap<String, String>,
    clock: ClockSource,
    status: Arc<StatusTracker>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    config: Option<CurrentConfig>,
    collector: Option<Collector>,
}

impl ClientRuntime {
    pub fn new(
        port: u16,
        base_dir: std::path::PathBuf,
        hmac_keys: Vec<String>,
        hmac_skip: bool,
        users: HashMap<String, String>,
        clock: ClockSource,
    ) -> ClientRuntime {
        ClientRuntime {
            port,
            base_dir,
            hmac_keys,
            hmac_skip,
            users,
            status: Arc::new(StatusTracker::new(clock.clone())),
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn extra_headers(self: &Arc<Self>) -> Option<Arc<dyn Fn(&[u8]) -> Vec<(String, String)> + Send + Sync>> {
        if self.hmac_keys.is_empty() {
            return None;
        }
        let key = self.hmac_keys[0].clone().into_bytes();
        let clock = self.clock.clone();
        Some(Arc::new(move |body: &[u8]| hmac::generate_headers(body, &key, &clock)))
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

    fn set_config(self: &Arc<Self>, req: ConfigRequest) -> Result<(), String> {
        validate_tasks(&req.tasks).map_err(|e| e.to_string())?;

        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.collector.take() {
            old.stop();
        }

        restore::set(
            &self.base_dir,
            req.netmet_server.as_deref(),
            &req.client_host.host,
            self.port,
        );

        let collector = Collector::start(
            req.client_host.clone(),
            req.tasks.clone(),
            req.netmet_server.clone(),
            self.clock.clone(),
            self.extra_headers(),
        )
        .map_err(|e| format!("failed to start collector: {e:?}"))?;

        state.collector = Some(collector);
        state.config = Some(CurrentConfig {
            netmet_server: req.netmet_server,
            client_host: req.client_host,
            settings: req.settings,
            tasks: req.tasks,
        });
        Ok(())
    }

    fn unregister(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(collector) = state.collector.take() {
            collector.stop();
        }
        state.config = None;
        restore::clear(&self.base_dir, self.port);
    }
}

/// Runs the blocking accept loop until `death` is set. Intended to be the
/// body of its own dedicated thread (spec §6, §4.1 cancellation contract).
pub fn serve(runtime: Arc<ClientRuntime>, server: Server, death: Arc<AtomicBool>) {
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

pub fn spawn(runtime: Arc<ClientRuntime>, server: Server, death: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || serve(runtime, server, death))
}

fn handle(runtime: &Arc<ClientRuntime>, mut request: tiny_http::Request) {
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
    runtime: &Arc<ClientRuntime>,
    method: &Method,
    url: &str,
    request: &tiny_http::Request,
    body: &[u8],
) -> (u16, Vec<u8>) {
    if url != "/status" {
        let authorization = header_value(request, "Authorization");
        if !runtime.authorize_basic(authorization.as_deref()) {
            return (
                401,
                serde_json::to_vec(&serde_json::json!({"error": "Could not verify your access level for that URL."}))
                    .unwrap_or_default(),
            );
        }
    }

    match (method, url) {
        (Method::Get, "/api/v1/config") => get_config(runtime),
        (Method::Post, "/api/v2/config") => {
            if !check_auth(runtime, request, body) {
                return json(403, &serde_json::json!({"error": "Forbidden"}));
            }
            post_config(runtime, body)
        }
        (Method::Post, "/api/v1/unregister") => {
            if !check_auth(runtime, request, body) {
                return json(403, &serde_json::json!({"error": "Forbidden"}));
            }
            runtime.unregister();
            json(201, &serde_json::json!({"message": "Netmet client is unregistered."}))
        }
        (Method::Get, "/status") => json(200, &runtime.status.snapshot()),
        _ => json(404, &serde_json::json!({"error": "Not Found"})),
    }
}

fn check_auth(runtime: &Arc<ClientRuntime>, request: &tiny_http::Request, body: &[u8]) -> bool {
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

fn get_config(runtime: &Arc<ClientRuntime>) -> (u16, Vec<u8>) {
    let state = runtime.state.lock().unwrap();
    match &state.config {
        Some(config) => json(200, &serde_json::json!({"config": config})),
        None => json(404, &serde_json::json!({"error": "Netmet is not configured"})),
    }
}

fn post_config(runtime: &Arc<ClientRuntime>, body: &[u8]) -> (u16, Vec<u8>) {
    let req: ConfigRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return json(400, &serde_json::json!({"error": format!("Bad request: {e}")})),
    };

    match runtime.set_config(req) {
        Ok(()) => {
            info!("collector reconfigured");
            json(201, &serde_json::json!({"message": "Successfully updated netmet config"}))
        }
        Err(e) => json(400, &serde_json::json!({"error": format!("Bad request: {e}")})),
    }
}

fn json<T: Serialize>(status: u16, value: &T) -> (u16, Vec<u8>) {
    (status, serde_json::to_vec(value).unwrap_or_default())
}
