//! The client-side probe scheduler (spec §4.4), ported from
//! `netmet/client/collector.py::Collector`. One scheduling thread per
//! distinct task period interleaves submissions at `delay = period /
//! group_size`; each finished probe is handed straight to the
//! [`crate::pusher::Pusher`] from the worker that ran it, and the whole
//! thing is rebuilt wholesale on every new config push rather than mutated
//! in place.

use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use netmet_common::clock::ClockSource;
use netmet_pinger::Pinger;
use netmet_protocol::task::{ClientEndpoint, Direction, Protocol, Task};
use netmet_protocol::metric::MetricDestination;
use netmet_protocol::MetricRecord;

use crate::pool::WorkerPool;
use crate::pusher::Pusher;

const MAX_WORKERS: usize = 50;

/// A running Collector: the task-period scheduler threads, the shared
/// Pinger, the worker pool, and an optional Pusher each finished probe is
/// handed to (spec §4.4, §5).
pub struct Collector {
    death: Arc<AtomicBool>,
    scheduler_handles: Vec<JoinHandle<()>>,
    pinger: Arc<Pinger>,
    pusher: Option<Arc<Pusher>>,
}

impl Collector {
    /// Builds and immediately starts a Collector for `tasks`. Fails only if
    /// the shared Pinger can't open its raw socket (spec §7: fatal, the
    /// client role should abort). With no `netmet_server` configured,
    /// finished records are logged instead of pushed (standalone mode).
    pub fn start(
        client_host: ClientEndpoint,
        tasks: Vec<Task>,
        netmet_server: Option<String>,
        clock: ClockSource,
        extra_headers: Option<Arc<dyn Fn(&[u8]) -> Vec<(String, String)> + Send + Sync>>,
    ) -> Result<Collector, netmet_pinger::RetCode> {
        let pinger = Arc::new(Pinger::start()?);
        let death = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(WorkerPool::new(MAX_WORKERS));

        let pusher = netmet_server.map(|server| {
            let url = format!("{}/api/v1/metrics", server.trim_end_matches('/'));
            Arc::new(Pusher::start(url, clock.clone(), extra_headers))
        });

        let mut groups: std::collections::HashMap<u64, Vec<Task>> = std::collections::HashMap::new();
        for task in tasks {
            let period_bits = task.settings().period.to_bits();
            groups.entry(period_bits).or_default().push(task);
        }

        let scheduler_handles = groups
            .into_values()
            .map(|group| {
                spawn_period_group(
                    group,
                    client_host.clone(),
                    clock.clone(),
                    pinger.clone(),
                    pool.clone(),
                    pusher.clone(),
                    death.clone(),
                )
            })
            .collect();

        Ok(Collector {
            death,
            scheduler_handles,
            pinger,
            pusher,
        })
    }

    /// Cancels scheduling, joins every scheduler thread, then stops the
    /// owned Pusher. Every worker holding a `Pinger`/`Pusher` clone has
    /// finished by the time the scheduler threads (and, transitively, the
    /// worker pool) are joined, so `self.pinger`'s `Drop` runs its socket
    /// teardown and `self.pusher` is the sole remaining reference (spec
    /// §4.4, §5 "Cancellation").
    pub fn stop(mut self) {
        self.death.store(true, SeqCst);
        for handle in self.scheduler_handles.drain(..) {
            let _ = handle.join();
        }
        if let Some(pusher) = self.pusher.take() {
            match Arc::try_unwrap(pusher) {
                Ok(pusher) => pusher.stop(),
                Err(_) => debug!("pusher still referenced at shutdown; skipping final flush"),
            }
        }
    }
}

fn spawn_period_group(
    group: Vec<Task>,
    client_host: ClientEndpoint,
    clock: ClockSource,
    pinger: Arc<Pinger>,
    pool: Arc<WorkerPool>,
    pusher: Option<Arc<Pusher>>,
    death: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if group.is_empty() {
            return;
        }
        let period = group[0].settings().period;
        let delay = Duration::from_secs_f64((period / group.len() as f64).max(0.001));
        let jitter_cap = delay.min(Duration::from_secs(1)).as_secs_f64() / 10.0;

        while !death.load(SeqCst) {
            for task in &group {
                loop {
                    if death.load(SeqCst) {
                        return;
                    }
                    let task = task.clone();
                    let client_host = client_host.clone();
                    let clock = clock.clone();
                    let pinger = pinger.clone();
                    let pusher = pusher.clone();

                    let submitted = pool.try_submit(Box::new(move || {
                        let record = execute_task(&task, &client_host, &clock, &pinger);
                        let tagged = tag_record(&task, record);
                        match &pusher {
                            Some(pusher) => pusher.add(tagged),
                            None => info!(record = %tagged, "collector result"),
                        }
                    }));
                    if submitted {
                        break;
                    }
                    std::thread::sleep(delay);
                }
                std::thread::sleep(delay);
            }

            let jitter = Duration::from_secs_f64(fastrand::f64() * jitter_cap);
            std::thread::sleep(jitter);
        }
    })
}

/// Wraps a `MetricRecord` in its direction-tagged envelope (`{"east-west":
/// ...}` / `{"north-south": ...}`), the shape `PUT /api/v1/metrics` and the
/// Pusher both expect (spec §6).
fn tag_record(task: &Task, record: MetricRecord) -> serde_json::Value {
    let key = match task.direction() {
        Direction::EastWest => "east-west",
        Direction::NorthSouth => "north-south",
    };
    serde_json::json!({ key: record })
}

fn execute_task(
    task: &Task,
    client_host: &ClientEndpoint,
    clock: &ClockSource,
    pinger: &Pinger,
) -> MetricRecord {
    let settings = task.settings();
    let timeout = Duration::from_secs_f64(settings.timeout);

    match task {
        Task::EastWest { dest, protocol: Protocol::Icmp, .. } => {
            let ping = pinger.ping(&dest.ip, timeout, settings.packet_size as usize, clock);
            icmp_record(client_host.clone(), MetricDestination::Client(dest.clone()), ping)
        }
        Task::NorthSouth { dest, protocol: Protocol::Icmp, .. } => {
            let ping = pinger.ping(dest, timeout, settings.packet_size as usize, clock);
            icmp_record(
                client_host.clone(),
                MetricDestination::External(dest.clone()),
                ping,
            )
        }
        Task::EastWest { dest, protocol: Protocol::Http, .. } => {
            let url = format!("http://{}:{}", dest.host, dest.port);
            http_record(
                client_host.clone(),
                MetricDestination::Client(dest.clone()),
                &url,
                timeout,
                clock,
            )
        }
        Task::NorthSouth { dest, protocol: Protocol::Http, .. } => http_record(
            client_host.clone(),
            MetricDestination::External(dest.clone()),
            dest,
            timeout,
            clock,
        ),
    }
}

fn icmp_record(
    client_src: ClientEndpoint,
    client_dest: MetricDestination,
    ping: netmet_pinger::PingRecord,
) -> MetricRecord {
    let success = ping.ret_code.is_success();
    MetricRecord::new(
        client_src,
        client_dest,
        Protocol::Icmp,
        ping.timestamp,
        ping.rtt_ms,
        ping.packet_size,
        success,
        ping.ret_code.value(),
    )
}

fn http_record(
    client_src: ClientEndpoint,
    client_dest: MetricDestination,
    url: &str,
    timeout: Duration,
    clock: &ClockSource,
) -> MetricRecord {
    let timestamp = clock.now_iso8601();
    let started = Instant::now();
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    match agent.get(url).call() {
        Ok(mut response) => {
            let status = response.status().as_u16();
            let body = response
                .body_mut()
                .read_to_vec()
                .unwrap_or_default();
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            MetricRecord::new(
                client_src,
                client_dest,
                Protocol::Http,
                timestamp,
                Some(latency_ms),
                body.len() as u32,
                status == 200,
                status as i32,
            )
        }
        Err(e) => {
            debug!(url, error = %e, "http probe failed");
            MetricRecord::new(
                client_src,
                client_dest,
                Protocol::Http,
                timestamp,
                Some(0.0),
                0,
                false,
                504,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> ClientEndpoint {
        ClientEndpoint {
            host: host.to_string(),
            ip: "127.0.0.1".to_string(),
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
    fn tag_record_uses_the_task_directions_json_key() {
        let task = Task::NorthSouth {
            dest: "1.2.3.4".to_string(),
            protocol: Protocol::Icmp,
            settings: Default::default(),
        };
        let record = MetricRecord::new(
            endpoint("h1"),
            MetricDestination::External("1.2.3.4".to_string()),
            Protocol::Icmp,
            "2021-01-01T00:00:00.000Z".to_string(),
            Some(1.0),
            55,
            true,
            0,
        );
        let tagged = tag_record(&task, record);
        assert!(tagged.get("north-south").is_some());
    }
}
