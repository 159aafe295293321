//! The Deployer (spec §4.2), ported from `netmet/server/deployer.py`:
//! periodically diffs a newly posted config's static client list against
//! the catalog, persists the new catalog, unregisters removed clients, and
//! marks the config applied.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use netmet_common::{ClockSource, Error};
use netmet_protocol::ClientEndpoint;
use netmet_store::{with_lock, EsClient};
use netmet_worker::LonelyWorker;

const TICK_PERIOD: Duration = Duration::from_secs(10);
const LOCK_TTL_SECS: u64 = 30;
const UNREGISTER_POOL_SIZE: usize = 10;

/// Starts the Deployer's background tick. The returned [`LonelyWorker`]
/// stops the thread on drop; `netmet-server`'s bootstrap keeps it alive for
/// the process lifetime and shares a handle with the HTTP surface so
/// `POST /api/v2/config` can wake it early via `force_update`.
pub fn start(store: Arc<EsClient>, own_url: String, clock: ClockSource) -> LonelyWorker {
    LonelyWorker::create(
        TICK_PERIOD,
        Box::new(move || {
            tick(&store, &own_url, &clock);
            false
        }),
        Box::new(|| {}),
    )
}

fn tick(store: &EsClient, own_url: &str, clock: &ClockSource) {
    let now = clock.now_iso8601();
    let result = with_lock(store, "deployer", own_url, LOCK_TTL_SECS, &now, || {
        let config = netmet_store::catalog::server_config_get(store, false)?;
        let Some(config) = config else {
            return Ok(());
        };
        if config.applied {
            return Ok(());
        }

        let old_clients = netmet_store::catalog::clients_get(store)?;
        let new_clients = redeploy(&config.config.deployment.static_deployment.clients, &old_clients);

        netmet_store::catalog::clients_set(store, &new_clients)?;
        let id = config
            .id
            .ok_or_else(|| Error::Fatal("server config missing store id".to_string()))?;
        netmet_store::catalog::server_config_apply(store, &id)?;
        Ok(())
    });

    match result {
        Ok(()) => {}
        Err(Error::Conflict(_)) => {}
        Err(e) => warn!(error = %e, "deployer tick failed"),
    }
}

/// `StaticDeployer.redeploy`: builds the new catalog (new clients marked
/// `running` iff they already existed, always `configured=false` so the
/// Mesher knows to push them a task list) and fires off best-effort
/// unregister POSTs for every client no longer present (spec §4.2 step 4).
fn redeploy(new_clients: &[ClientEndpoint], old_clients: &[ClientEndpoint]) -> Vec<ClientEndpoint> {
    let old_ids: std::collections::HashSet<(String, u16)> =
        old_clients.iter().map(|c| c.identity()).collect();
    let new_ids: std::collections::HashSet<(String, u16)> =
        new_clients.iter().map(|c| c.identity()).collect();

    let result: Vec<ClientEndpoint> = new_clients
        .iter()
        .cloned()
        .map(|mut c| {
            c.running = Some(old_ids.contains(&c.identity()));
            c.configured = Some(false);
            c
        })
        .collect();

    let removed: Vec<ClientEndpoint> = old_clients
        .iter()
        .filter(|c| !new_ids.contains(&c.identity()))
        .cloned()
        .collect();

    if !removed.is_empty() {
        unregister_all(removed);
    }

    result
}

/// Fans the unregister POSTs out across at most [`UNREGISTER_POOL_SIZE`]
/// threads and waits for them all, mirroring the one-shot
/// `ThreadPoolExecutor(max_workers=10).map(...)` the Python Deployer spawns
/// per tick rather than a long-lived pool.
fn unregister_all(removed: Vec<ClientEndpoint>) {
    let chunks: Vec<Vec<ClientEndpoint>> = {
        let mut chunks: Vec<Vec<ClientEndpoint>> = (0..UNREGISTER_POOL_SIZE.min(removed.len().max(1)))
            .map(|_| Vec::new())
            .collect();
        for (i, client) in removed.into_iter().enumerate() {
            chunks[i % chunks.len()].push(client);
        }
        chunks
    };

    let handles: Vec<_> = chunks
        .into_iter()
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            std::thread::spawn(move || {
                for client in chunk {
                    let url = format!("http://{}:{}/api/v1/unregister", client.host, client.port);
                    if let Err(e) = ureq::post(&url).send(&[] as &[u8]) {
                        info!(host = %client.host, error = %e, "unregister POST failed");
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(host: &str) -> ClientEndpoint {
        client_on_port(host, 5000)
    }

    fn client_on_port(host: &str, port: u16) -> ClientEndpoint {
        ClientEndpoint {
            host: host.to_string(),
            ip: "10.0.0.1".to_string(),
            port,
            az: "a".to_string(),
            dc: "d".to_string(),
            mac: None,
            hypervisor: None,
            running: None,
            configured: None,
        }
    }

    #[test]
    fn redeploy_marks_pre_existing_hosts_as_running() {
        let old = vec![client("h1")];
        let new = vec![client("h1"), client("h2")];
        let result = redeploy(&new, &old);

        let h1 = result.iter().find(|c| c.host == "h1").unwrap();
        let h2 = result.iter().find(|c| c.host == "h2").unwrap();
        assert_eq!(h1.running, Some(true));
        assert_eq!(h2.running, Some(false));
        assert_eq!(h1.configured, Some(false));
    }

    #[test]
    fn redeploy_drops_hosts_no_longer_present() {
        let old = vec![client("h1"), client("h2")];
        let new = vec![client("h1")];
        let result = redeploy(&new, &old);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].host, "h1");
    }

    #[test]
    fn redeploy_treats_same_host_on_different_ports_as_distinct_identities() {
        let old = vec![client_on_port("h1", 5000)];
        let new = vec![client_on_port("h1", 6000)];
        let result = redeploy(&new, &old);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].running, Some(false));
    }
}
