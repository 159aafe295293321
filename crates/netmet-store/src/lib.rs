//! The Store Adapter (spec §4.9): schema management, rollover, the
//! catalog/config/metrics/events collections, and the global lock — all
//! speaking Elasticsearch's REST API directly through [`client::EsClient`].
//!
//! The wire-level store client (indexing, bulk, update-by-query, task API)
//! is an out-of-scope external collaborator per spec §1; what lives here is
//! the schema/rollover/flatten logic spec §4.9 calls core.

pub mod catalog;
pub mod client;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod rollover;
pub mod schema;

use std::sync::OnceLock;

use netmet_common::error::Error;
use tracing::info;

pub use client::EsClient;
pub use lock::{with_lock, GlobalLock};

static INSTANCE: OnceLock<EsClient> = OnceLock::new();

/// Idempotent process-wide singleton, ported from `netmet/server/db.py`'s
/// module-level `_DB`/`_INIT_LOCK`-guarded `get`: the first caller's
/// `base_url` wins, every later call (even with a different `base_url`)
/// just returns the already-built client.
pub struct Store;

impl Store {
    pub fn connect(base_url: &str) -> EsClient {
        INSTANCE.get_or_init(|| EsClient::new(base_url)).clone()
    }

    /// `is_inited`: whether [`Store::connect`] has already run.
    pub fn is_inited() -> bool {
        INSTANCE.get().is_some()
    }
}

/// Ported from `netmet/server/db.py::DB.__init__`/`_ensure_schema`: probes
/// the cluster, then creates any missing index with its declared mapping.
/// A racy create failure is tolerated as long as the index exists by the
/// time we check again (spec §4.9).
pub fn ensure_schema(client: &EsClient, date: &str) -> Result<(), Error> {
    client.info()?;

    for (index, mapping) in [
        (schema::CATALOG_INDEX.to_string(), schema::catalog_mapping()),
        (schema::EVENTS_INDEX.to_string(), schema::events_mapping()),
    ] {
        ensure_index(client, &index, &mapping)?;
    }

    rollover::ensure_initial_index(client, date)
}

fn ensure_index(client: &EsClient, index: &str, mapping: &serde_json::Value) -> Result<(), Error> {
    if client.index_exists(index)? {
        return Ok(());
    }
    if let Err(e) = client.index_create(index, mapping) {
        if client.index_exists(index)? {
            info!(index, "index already existed after a racy create failure");
            return Ok(());
        }
        return Err(Error::Fatal(format!("failed to create index {index}: {e}")));
    }
    Ok(())
}
