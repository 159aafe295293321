//! The restore marker (spec §6 "Persisted state"), ported from
//! `netmet/client/conf.py`'s `restore_url_get/set/clear` and `restore`: a
//! tiny JSON file recording the server URL to re-register with after this
//! process restarts, plus the background loop that walks it.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use netmet_common::clock::ClockSource;
use netmet_common::hmac;

const RUNTIME_DIR: &str = "/var/run/netmet";

#[derive(Debug, Serialize, Deserialize)]
struct Marker {
    refresh_conf_url: Option<String>,
}

fn marker_path(base_dir: &Path, port: u16) -> PathBuf {
    base_dir.join(format!("restore_api_{port}"))
}

/// Persists the URL this client should re-POST to on restart. A `None`
/// `netmet_server` (standalone mode) writes a marker with no URL.
pub fn set(base_dir: &Path, netmet_server: Option<&str>, host: &str, port: u16) {
    let url = netmet_server.map(|server| {
        format!(
            "{}/api/v1/clients/{host}/{port}",
            server.trim_end_matches('/')
        )
    });

    if let Err(e) = std::fs::create_dir_all(base_dir) {
        warn!(error = %e, "failed to create restore marker directory");
        return;
    }
    let marker = Marker {
        refresh_conf_url: url,
    };
    match serde_json::to_vec(&marker) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(marker_path(base_dir, port), bytes) {
                warn!(error = %e, "failed to write restore marker");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize restore marker"),
    }
}

pub fn get(base_dir: &Path, port: u16) -> Option<String> {
    let bytes = std::fs::read(marker_path(base_dir, port)).ok()?;
    let marker: Marker = serde_json::from_slice(&bytes).ok()?;
    marker.refresh_conf_url
}

pub fn clear(base_dir: &Path, port: u16) {
    let _ = std::fs::remove_file(marker_path(base_dir, port));
}

/// Spawns the self-rejoin loop: repeatedly POSTs an empty body to the
/// saved restore URL, trying each configured HMAC key, until the server
/// answers 200 (re-registered) or 404 (server forgot us; marker cleared).
pub fn spawn_self_rejoin(
    base_dir: PathBuf,
    port: u16,
    hmac_keys: Vec<String>,
    clock: ClockSource,
    death: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let url = get(&base_dir, port)?;

    Some(std::thread::spawn(move || {
        let mut current_url = url;

        while !death.load(SeqCst) {
            let mut done = false;

            for key in &hmac_keys {
                let headers = hmac::generate_headers(b"", key.as_bytes(), &clock);
                let mut request = ureq::post(&current_url).content_type("application/json");
                for (name, value) in &headers {
                    request = request.header(name, value);
                }

                match request.send(&[] as &[u8]) {
                    Ok(_response) => {
                        done = true;
                        info!(url = %current_url, "restore rejoin complete");
                        break;
                    }
                    Err(ureq::Error::StatusCode(403)) => continue,
                    Err(ureq::Error::StatusCode(404)) => {
                        clear(&base_dir, port);
                        done = true;
                        info!(url = %current_url, "netmet server forgot this client; marker cleared");
                        break;
                    }
                    Err(e) => {
                        warn!(url = %current_url, error = %e, "netmet server unreachable during restore");
                    }
                }
            }

            if done {
                return;
            }

            match get(&base_dir, port) {
                Some(refreshed) if refreshed == current_url => {}
                _ => return,
            }
            current_url = get(&base_dir, port).unwrap_or(current_url);

            std::thread::sleep(Duration::from_secs(1));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_the_refresh_url() {
        let dir = std::env::temp_dir().join(format!("netmet-restore-test-{}", fastrand::u64(..)));
        set(&dir, Some("http://server:8080"), "client1", 9000);
        assert_eq!(
            get(&dir, 9000),
            Some("http://server:8080/api/v1/clients/client1/9000".to_string())
        );
        clear(&dir, 9000);
        assert_eq!(get(&dir, 9000), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn standalone_mode_writes_a_null_refresh_url() {
        let dir = std::env::temp_dir().join(format!("netmet-restore-test-{}", fastrand::u64(..)));
        set(&dir, None, "client1", 9001);
        assert_eq!(get(&dir, 9001), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
