//! A bounded worker pool with reject-when-full submission, ported from
//! `futurist.ThreadPoolExecutor(max_workers=50)` as used by
//! `netmet/client/collector.py::Collector.start`. A zero-capacity
//! rendezvous channel with `size` permanently-parked workers gives
//! exactly the "≤N workers, reject when all are busy" semantics spec §4.4
//! calls for: `try_send` only succeeds while a worker is idle in `recv`.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};

type Job = Box<dyn FnOnce() + Send>;

pub struct WorkerPool {
    sender: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> WorkerPool {
        let (sender, receiver) = bounded::<Job>(0);
        let handles = (0..size)
            .map(|_| {
                let receiver = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
            })
            .collect();

        WorkerPool { sender, handles }
    }

    /// Returns `false` (without blocking) when every worker is currently
    /// busy; the caller backs off and retries the same task.
    pub fn try_submit(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping `sender` unblocks every worker's `recv` with an `Err`,
        // letting them exit their loops.
        let (dummy, _) = bounded::<Job>(0);
        self.sender = dummy;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = done.clone();
            assert!(pool.try_submit(Box::new(move || {
                done.fetch_add(1, SeqCst);
            })));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(done.load(SeqCst), 4);
    }

    #[test]
    fn rejects_submission_when_every_worker_is_busy() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        assert!(pool.try_submit(Box::new(move || {
            let _ = rx.recv();
        })));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!pool.try_submit(Box::new(|| {})));
        drop(tx);
    }
}
