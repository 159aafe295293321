//! Store-backed global lock (spec §4.8), ported from
//! `netmet/server/utils/eslock.py::Glock` and `netmet/server/db.py`'s
//! `lock_acquire`/`lock_release`: mutual exclusion across server replicas
//! realized by creating/deleting a named index.

use netmet_common::error::Error;
use serde_json::json;
use tracing::warn;

use crate::client::EsClient;

fn lock_index(name: &str) -> String {
    format!("netmet_lock_{name}")
}

/// `acquire`/`release` around a named index. TTL is advisory metadata only
/// (spec §4.8: "expiration reclamation is a TODO in scope of the lock
/// holder's operator, not enforced here").
pub struct GlobalLock<'a> {
    client: &'a EsClient,
}

impl<'a> GlobalLock<'a> {
    pub fn new(client: &'a EsClient) -> GlobalLock<'a> {
        GlobalLock { client }
    }

    pub fn acquire(&self, name: &str, own_url: &str, ttl_secs: u64, now_iso8601: &str) -> bool {
        let index = lock_index(name);
        if self.client.index_create(&index, &json!({})).is_err() {
            return false;
        }

        let body = json!({
            "updated_at": now_iso8601,
            "url": own_url,
            "ttl": ttl_secs
        });
        self.client
            .index_doc(&index, "lock", Some("1"), &body)
            .is_ok()
    }

    pub fn release(&self, name: &str) -> bool {
        let index = lock_index(name);
        let released = self.client.index_delete(&index).is_ok();
        if !released {
            warn!(lock = name, "can't release lock");
        }
        released
    }
}

/// Runs `body` under the named global lock, guaranteeing release on every
/// exit path (spec §4.8: "every critical section wraps acquire/release with
/// guaranteed release on all exit paths").
pub fn with_lock<T>(
    client: &EsClient,
    name: &str,
    own_url: &str,
    ttl_secs: u64,
    now_iso8601: &str,
    body: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    let lock = GlobalLock::new(client);
    if !lock.acquire(name, own_url, ttl_secs, now_iso8601) {
        return Err(Error::Conflict(format!("can't lock {name}")));
    }

    let result = body();
    lock.release(name);
    result
}
