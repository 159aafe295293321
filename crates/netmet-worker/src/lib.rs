//! The background-worker harness behind the Deployer, Mesher and Pusher
//! (spec §4.1).
//!
//! `netmet/utils/worker.py::LonelyWorker` holds itself as process-global
//! class state guarded by a class lock. Per the design notes ("re-architect
//! as an explicitly constructed long-lived value"), [`LonelyWorker`] here is
//! an ordinary owned value with a `{start, force_update, stop}` surface —
//! the caller (Deployer, Mesher, Pusher) holds it directly instead of
//! reaching through a singleton accessor.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One iteration's outcome: whether `callback_after_job` should fire.
pub type JobFn = Box<dyn FnMut() -> bool + Send>;
pub type CallbackFn = Box<dyn FnMut() + Send>;

/// A single named singleton background task (spec §4.1).
///
/// `job()` runs once per tick; when it returns `true`, `callback_after_job`
/// fires immediately after. The loop then waits up to `period` in ~1s
/// (jittered) steps, waking early on [`LonelyWorker::force_update`] or
/// [`LonelyWorker::stop`].
pub struct LonelyWorker {
    death: Arc<AtomicBool>,
    force_update: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LonelyWorker {
    /// Builds and starts the worker thread. Idempotent only in the sense
    /// that each call creates its own independent instance; callers that
    /// want process-wide idempotence hold the returned value behind their
    /// own `OnceLock`/`Mutex<Option<_>>`, same as the Deployer/Mesher do.
    pub fn create(period: Duration, mut job: JobFn, mut callback_after_job: CallbackFn) -> LonelyWorker {
        let death = Arc::new(AtomicBool::new(false));
        let force_update = Arc::new(AtomicBool::new(false));

        let loop_death = death.clone();
        let loop_force_update = force_update.clone();

        let handle = std::thread::spawn(move || {
            while !loop_death.load(SeqCst) {
                if job() {
                    callback_after_job();
                }

                let mut waited = Duration::ZERO;
                while waited < period {
                    if loop_death.load(SeqCst) {
                        return;
                    }
                    if loop_force_update.swap(false, SeqCst) {
                        break;
                    }
                    let step = Duration::from_millis(1000 + fastrand::u64(0..1000));
                    std::thread::sleep(step);
                    waited += step;
                }
            }
        });

        LonelyWorker {
            death,
            force_update,
            handle: Some(handle),
        }
    }

    /// Coalesced "wake now" signal: any number of calls before the loop
    /// observes one collapse into a single early wakeup.
    pub fn force_update(&self) {
        self.force_update.store(true, SeqCst);
    }

    /// Signals cancellation, waits for the in-flight iteration to finish.
    pub fn destroy(mut self) {
        self.death.store(true, SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LonelyWorker {
    fn drop(&mut self) {
        self.death.store(true, SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_job_and_fires_callback_when_work_was_done() {
        let job_runs = Arc::new(AtomicUsize::new(0));
        let callback_runs = Arc::new(AtomicUsize::new(0));

        let job_runs_inner = job_runs.clone();
        let callback_runs_inner = callback_runs.clone();

        let worker = LonelyWorker::create(
            Duration::from_secs(60),
            Box::new(move || {
                job_runs_inner.fetch_add(1, SeqCst);
                true
            }),
            Box::new(move || {
                callback_runs_inner.fetch_add(1, SeqCst);
            }),
        );

        std::thread::sleep(Duration::from_millis(50));
        worker.destroy();

        assert_eq!(job_runs.load(SeqCst), 1);
        assert_eq!(callback_runs.load(SeqCst), 1);
    }

    #[test]
    fn skips_callback_when_job_reports_no_work() {
        let callback_runs = Arc::new(AtomicUsize::new(0));
        let callback_runs_inner = callback_runs.clone();

        let worker = LonelyWorker::create(
            Duration::from_secs(60),
            Box::new(|| false),
            Box::new(move || {
                callback_runs_inner.fetch_add(1, SeqCst);
            }),
        );

        std::thread::sleep(Duration::from_millis(50));
        worker.destroy();

        assert_eq!(callback_runs.load(SeqCst), 0);
    }

    #[test]
    fn force_update_wakes_the_loop_before_the_period_elapses() {
        let job_runs = Arc::new(AtomicUsize::new(0));
        let job_runs_inner = job_runs.clone();

        let worker = LonelyWorker::create(
            Duration::from_secs(3600),
            Box::new(move || {
                job_runs_inner.fetch_add(1, SeqCst);
                false
            }),
            Box::new(|| {}),
        );

        std::thread::sleep(Duration::from_millis(20));
        worker.force_update();
        std::thread::sleep(Duration::from_millis(2500));
        worker.destroy();

        assert!(job_runs.load(SeqCst) >= 2);
    }
}
