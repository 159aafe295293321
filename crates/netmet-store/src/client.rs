//! A thin `ureq`-based Elasticsearch REST client. Spec §1 scopes "the
//! search-store client (indexing, bulk, update-by-query, task API)" out as
//! an external collaborator; this wraps exactly that surface so the
//! schema/rollover/flatten logic in the rest of the crate (which *is* core,
//! spec §4.9) has something real to call.
//!
//! Built on `ureq`'s free-function request builders
//! (`ureq::post(url).send_json(...)`).

use netmet_common::error::Error;
use serde_json::Value;

#[derive(Clone)]
pub struct EsClient {
    base_url: String,
}

impl EsClient {
    pub fn new(base_url: &str) -> EsClient {
        EsClient {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn info(&self) -> Result<Value, Error> {
        self.get("/")
    }

    pub fn index_exists(&self, index: &str) -> Result<bool, Error> {
        match ureq::head(self.url(&format!("/{index}"))).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(transient(e)),
        }
    }

    pub fn index_create(&self, index: &str, body: &Value) -> Result<(), Error> {
        ureq::put(self.url(&format!("/{index}")))
            .send_json(body)
            .map_err(transient)?;
        Ok(())
    }

    pub fn index_delete(&self, index: &str) -> Result<(), Error> {
        ureq::delete(self.url(&format!("/{index}")))
            .call()
            .map_err(transient)?;
        Ok(())
    }

    /// Aliasing happens at index-create time via `body["aliases"]`, so no
    /// separate `_alias` swap call is needed for this append-only rollover
    /// model.
    pub fn bulk(&self, index: &str, doc_type: &str, ndjson_body: String) -> Result<Value, Error> {
        let mut response = ureq::post(self.url(&format!("/{index}/{doc_type}/_bulk")))
            .content_type("application/x-ndjson")
            .send(ndjson_body)
            .map_err(transient)?;
        response.body_mut().read_json().map_err(transient)
    }

    pub fn search(&self, index: &str, doc_type: &str, body: &Value) -> Result<Value, Error> {
        self.post_json(&format!("/{index}/{doc_type}/_search"), body)
    }

    pub fn index_doc(
        &self,
        index: &str,
        doc_type: &str,
        id: Option<&str>,
        body: &Value,
    ) -> Result<Value, Error> {
        let path = match id {
            Some(id) => format!("/{index}/{doc_type}/{id}"),
            None => format!("/{index}/{doc_type}"),
        };
        self.post_json(&path, body)
    }

    pub fn update_doc(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<Value, Error> {
        self.post_json(&format!("/{index}/{doc_type}/{id}/_update"), body)
    }

    /// Version-conditioned update: fails with [`Error::Conflict`] instead of
    /// applying the write if `version` no longer matches the stored
    /// document's current version (spec §4.7's CAS step).
    pub fn update_doc_versioned(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
        version: i64,
    ) -> Result<Value, Error> {
        let mut response = ureq::post(self.url(&format!(
            "/{index}/{doc_type}/{id}/_update?version={version}"
        )))
        .send_json(body)
        .map_err(cas_error)?;
        response.body_mut().read_json().map_err(transient)
    }

    pub fn get_doc(&self, index: &str, doc_type: &str, id: &str) -> Result<Value, Error> {
        self.get(&format!("/{index}/{doc_type}/{id}"))
    }

    pub fn delete_by_query(
        &self,
        index: &str,
        doc_type: &str,
        body: &Value,
    ) -> Result<Value, Error> {
        self.post_json(&format!("/{index}/{doc_type}/_delete_by_query"), body)
    }

    /// Async update-by-query (spec §4.7's "dispatch" step). Returns the
    /// store's task id.
    pub fn update_by_query_async(
        &self,
        index: &str,
        doc_type: &str,
        body: &Value,
    ) -> Result<String, Error> {
        let response = self.post_json(
            &format!(
                "/{index}/{doc_type}/_update_by_query?conflicts=proceed&wait_for_completion=false&requests_per_second=1000"
            ),
            body,
        )?;
        response["task"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Transient("store returned no task id".to_string()))
    }

    pub fn task_status(&self, task_id: &str) -> Result<Value, Error> {
        self.get(&format!("/_tasks/{task_id}"))
    }

    fn get(&self, path: &str) -> Result<Value, Error> {
        let mut response = ureq::get(self.url(path)).call().map_err(transient)?;
        response.body_mut().read_json().map_err(transient)
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let mut response = ureq::post(self.url(path))
            .send_json(body)
            .map_err(transient)?;
        response.body_mut().read_json().map_err(transient)
    }
}

fn transient(e: impl std::fmt::Display) -> Error {
    Error::Transient(e.to_string())
}

fn cas_error(e: ureq::Error) -> Error {
    match e {
        ureq::Error::StatusCode(409) => Error::Conflict("store document version mismatch".to_string()),
        other => transient(other),
    }
}
