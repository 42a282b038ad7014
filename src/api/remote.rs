//! Purpose: Provide a blocking HTTP client for the fieldstore entry surface.
//! Exports: `RemoteClient`, `FormPart`.
//! Role: Mirrors `Explorer` operations over HTTP using JSON or multipart bodies.
//! Invariants: Base URLs are http(s) with no path; routes are `/{collection}[/{id}]`.
//! Invariants: Server error envelopes map back to the same `ErrorKind`.
#![allow(clippy::result_large_err)]

use super::Entry;
use crate::core::error::{Error, ErrorKind, parse_error_kind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

type ApiResult<T> = Result<T, Error>;

const FORM_BOUNDARY: &str = "fieldstore-form-boundary-5f0c3a9e71d2";

/// One text part of a multipart/form-data body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: String,
}

impl FormPart {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    collection: Option<String>,
    id: Option<u64>,
    field: Option<String>,
}

enum Body<'a> {
    Empty,
    Json(&'a Value),
    Form(&'a [FormPart]),
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner { base_url, agent }),
        })
    }

    pub fn health(&self) -> ApiResult<Value> {
        let url = build_url(&self.inner.base_url, &["healthz"])?;
        self.send("GET", &url, Body::Empty)
    }

    /// Creates an entry from a JSON body, e.g. `{"field": {...}}`.
    pub fn create_entry(&self, collection: &str, document: &Value) -> ApiResult<Entry> {
        let url = self.collection_url(collection, None)?;
        self.send("POST", &url, Body::Json(document))
    }

    /// Creates an entry from a multipart body whose `data` part is the
    /// document serialized as JSON text.
    pub fn create_entry_form(&self, collection: &str, document: &Value) -> ApiResult<Entry> {
        let parts = [FormPart::new("data", document.to_string())];
        self.create_entry_form_parts(collection, &parts)
    }

    pub fn create_entry_form_parts(
        &self,
        collection: &str,
        parts: &[FormPart],
    ) -> ApiResult<Entry> {
        let url = self.collection_url(collection, None)?;
        self.send("POST", &url, Body::Form(parts))
    }

    pub fn list_entries(&self, collection: &str) -> ApiResult<Vec<Entry>> {
        let url = self.collection_url(collection, None)?;
        self.send("GET", &url, Body::Empty)
    }

    /// Lists entries without typed decoding, for callers inspecting raw shapes.
    pub fn list_entries_raw(&self, collection: &str) -> ApiResult<Value> {
        let url = self.collection_url(collection, None)?;
        self.send("GET", &url, Body::Empty)
    }

    pub fn get_entry(&self, collection: &str, id: u64) -> ApiResult<Entry> {
        let url = self.collection_url(collection, Some(id))?;
        self.send("GET", &url, Body::Empty)
    }

    pub fn update_entry(&self, collection: &str, id: u64, document: &Value) -> ApiResult<Entry> {
        let url = self.collection_url(collection, Some(id))?;
        self.send("PUT", &url, Body::Json(document))
    }

    pub fn update_entry_form(
        &self,
        collection: &str,
        id: u64,
        document: &Value,
    ) -> ApiResult<Entry> {
        let parts = [FormPart::new("data", document.to_string())];
        self.update_entry_form_parts(collection, id, &parts)
    }

    pub fn update_entry_form_parts(
        &self,
        collection: &str,
        id: u64,
        parts: &[FormPart],
    ) -> ApiResult<Entry> {
        let url = self.collection_url(collection, Some(id))?;
        self.send("PUT", &url, Body::Form(parts))
    }

    pub fn delete_entry(&self, collection: &str, id: u64) -> ApiResult<Entry> {
        let url = self.collection_url(collection, Some(id))?;
        self.send("DELETE", &url, Body::Empty)
    }

    fn collection_url(&self, collection: &str, id: Option<u64>) -> ApiResult<Url> {
        if collection.is_empty() || collection.contains('/') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("collection names must be non-empty and contain no path separators")
                .with_collection(collection));
        }
        match id {
            Some(id) => build_url(&self.inner.base_url, &[collection, &id.to_string()]),
            None => build_url(&self.inner.base_url, &[collection]),
        }
    }

    fn send<R>(&self, method: &str, url: &Url, body: Body<'_>) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = match body {
            Body::Empty => request.call(),
            Body::Json(value) => {
                let payload = serde_json::to_string(value).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
            Body::Form(parts) => {
                let payload = encode_form(parts)?;
                request
                    .set(
                        "Content-Type",
                        &format!("multipart/form-data; boundary={FORM_BOUNDARY}"),
                    )
                    .send_bytes(&payload)
            }
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

fn encode_form(parts: &[FormPart]) -> ApiResult<Vec<u8>> {
    let mut body = Vec::new();
    for part in parts {
        if part.value.contains(FORM_BOUNDARY) || part.name.contains('"') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("form part cannot be encoded with the fixed boundary")
                .with_field(part.name.clone()));
        }
        body.extend_from_slice(format!("--{FORM_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                part.name
            )
            .as_bytes(),
        );
        body.extend_from_slice(part.value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{FORM_BOUNDARY}--\r\n").as_bytes());
    Ok(body)
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid remote base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote base url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("remote base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("remote base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("remote error status {status}"))
}

fn error_from_remote(remote: RemoteError) -> Error {
    let mut err = Error::new(parse_error_kind(&remote.kind));
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(collection) = remote.collection {
        err = err.with_collection(collection);
    }
    if let Some(id) = remote.id {
        err = err.with_id(id);
    }
    if let Some(field) = remote.field {
        err = err.with_field(field);
    }
    err
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 415 => ErrorKind::Usage,
        404 => ErrorKind::NotFound,
        423 => ErrorKind::Busy,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{FORM_BOUNDARY, FormPart, RemoteClient, encode_form, error_kind_from_status};
    use crate::core::error::ErrorKind;

    #[test]
    fn base_url_rejects_paths_and_schemes() {
        assert!(RemoteClient::new("http://127.0.0.1:9800").is_ok());
        let err = RemoteClient::new("http://127.0.0.1:9800/api")
            .err()
            .expect("path rejected");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = RemoteClient::new("ftp://127.0.0.1")
            .err()
            .expect("scheme rejected");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn collection_urls_are_segmented() {
        let client = RemoteClient::new("http://127.0.0.1:9800").expect("client");
        let url = client.collection_url("withjson", Some(4)).expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:9800/withjson/4");
        assert!(client.collection_url("a/b", None).is_err());
    }

    #[test]
    fn form_encoding_wraps_each_part() {
        let body = encode_form(&[FormPart::new("data", r#"{"field":{"number":"12"}}"#)])
            .expect("encode");
        let text = String::from_utf8(body).expect("utf8");
        assert!(text.starts_with(&format!("--{FORM_BOUNDARY}\r\n")));
        assert!(text.contains("Content-Disposition: form-data; name=\"data\"\r\n\r\n"));
        assert!(text.contains(r#"{"field":{"number":"12"}}"#));
        assert!(text.ends_with(&format!("--{FORM_BOUNDARY}--\r\n")));
    }

    #[test]
    fn status_fallback_kinds() {
        assert_eq!(error_kind_from_status(400), ErrorKind::Usage);
        assert_eq!(error_kind_from_status(415), ErrorKind::Usage);
        assert_eq!(error_kind_from_status(404), ErrorKind::NotFound);
        assert_eq!(error_kind_from_status(503), ErrorKind::Internal);
    }
}
