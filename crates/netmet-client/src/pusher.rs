//! The batched metrics uploader (spec §4.6), ported from
//! `netmet/utils/pusher.py::Pusher`: a FIFO of pending records drained in
//! batches of up to `max_count`, with failed batches pushed back onto the
//! front of the queue so nothing is silently dropped after a transient
//! outage.

use std::collections::VecDeque;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

use netmet_common::clock::ClockSource;

const DEFAULT_PERIOD: Duration = Duration::from_secs(10);
const DEFAULT_MAX_COUNT: usize = 1000;
const DEFAULT_DELAY_BETWEEN_REQUESTS: Duration = Duration::from_millis(200);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_FAILS_IN_ROW: u32 = 2;

type HeaderFn = dyn Fn(&[u8]) -> Vec<(String, String)> + Send + Sync;

pub struct Pusher {
    death: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<serde_json::Value>>>,
    handle: Option<JoinHandle<()>>,
}

impl Pusher {
    pub fn start(
        url: String,
        _clock: ClockSource,
        extra_headers: Option<Arc<HeaderFn>>,
    ) -> Pusher {
        Self::start_with_timeout(url, _clock, extra_headers, DEFAULT_TIMEOUT)
    }

    /// Same as [`Pusher::start`] but with an explicit request timeout
    /// (spec §4.6's `timeout` parameter, default 2s).
    pub fn start_with_timeout(
        url: String,
        _clock: ClockSource,
        extra_headers: Option<Arc<HeaderFn>>,
        timeout: Duration,
    ) -> Pusher {
        let death = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(Mutex::new(VecDeque::new()));

        let loop_death = death.clone();
        let loop_queue = queue.clone();
        let handle = std::thread::spawn(move || {
            run_periodically(url, loop_death, loop_queue, extra_headers, timeout);
        });

        Pusher {
            death,
            queue,
            handle: Some(handle),
        }
    }

    /// Appends one tagged metric record onto the FIFO tail; picked up by
    /// the next periodic flush.
    pub fn add(&self, item: serde_json::Value) {
        self.queue.lock().unwrap().push_back(item);
    }

    pub fn stop(mut self) {
        self.death.store(true, SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_periodically(
    url: String,
    death: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<serde_json::Value>>>,
    extra_headers: Option<Arc<HeaderFn>>,
    timeout: Duration,
) {
    let mut started_at = Instant::now();
    let tick = DEFAULT_PERIOD / 20;

    while !death.load(SeqCst) {
        if started_at.elapsed() >= DEFAULT_PERIOD {
            send_batches(&url, &queue, extra_headers.as_deref(), timeout);
            started_at = Instant::now();
        }
        std::thread::sleep(tick);
    }

    // Final flush on shutdown so queued-but-unsent records aren't lost.
    send_batches(&url, &queue, extra_headers.as_deref(), timeout);
}

fn send_batches(
    url: &str,
    queue: &Arc<Mutex<VecDeque<serde_json::Value>>>,
    extra_headers: Option<&HeaderFn>,
    timeout: Duration,
) {
    let mut batch: Vec<serde_json::Value> = Vec::new();
    let mut fails_in_row = 0u32;

    loop {
        {
            let mut queue = queue.lock().unwrap();
            while !queue.is_empty() && batch.len() < DEFAULT_MAX_COUNT {
                batch.push(queue.pop_front().unwrap());
            }
        }

        match post_batch(url, &batch, extra_headers, timeout) {
            Ok(()) => {
                batch.clear();
                fails_in_row = 0;
            }
            Err(status) => {
                fails_in_row += 1;
                warn!(url, status, "can't push data to netmet server");
            }
        }

        if batch.is_empty() && queue.lock().unwrap().len() < DEFAULT_MAX_COUNT {
            return;
        }

        if fails_in_row > MAX_FAILS_IN_ROW {
            let mut queue = queue.lock().unwrap();
            for item in batch.into_iter().rev() {
                queue.push_front(item);
            }
            return;
        }

        std::thread::sleep(DEFAULT_DELAY_BETWEEN_REQUESTS);
    }
}

fn post_batch(
    url: &str,
    batch: &[serde_json::Value],
    extra_headers: Option<&HeaderFn>,
    timeout: Duration,
) -> Result<(), String> {
    let body = serde_json::to_vec(batch).map_err(|e| e.to_string())?;

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    let mut request = agent.post(url).content_type("application/json");

    if let Some(header_fn) = extra_headers {
        for (name, value) in header_fn(&body) {
            request = request.header(name.as_str(), value.as_str());
        }
    }

    match request.send(&body) {
        Ok(response) if response.status().as_u16() == 201 => Ok(()),
        Ok(response) => Err(response.status().as_u16().to_string()),
        Err(ureq::Error::StatusCode(code)) => Err(code.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_stop_does_not_panic_with_no_server() {
        let pusher = Pusher::start(
            "http://127.0.0.1:1/metrics".to_string(),
            ClockSource::new_mock(0),
            None,
        );
        pusher.add(serde_json::json!({"north-south": {}}));
        pusher.stop();
    }
}
