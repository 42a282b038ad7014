//! Purpose: Entry operations for declared collections (create/list/get/update/delete).
//! Exports: `Explorer`.
//! Role: Joins schema lookup, field decoding, and storage behind one handle.
//! Invariants: Every write is decoded against the content type before it reaches the store.
//! Invariants: Updates replace named attributes whole; unnamed attributes keep prior values.
#![allow(clippy::result_large_err)]

use std::path::Path;
use std::sync::Arc;

use crate::core::codec::{FieldCodec, InboundDocument, Strictness, WriteMode};
use crate::core::error::Error;
use crate::core::schema::{ContentType, Schema};
use crate::core::store::{Entry, Store};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug)]
pub struct Explorer {
    inner: Arc<ExplorerInner>,
}

#[derive(Debug)]
struct ExplorerInner {
    schema: Schema,
    store: Store,
    codec: FieldCodec,
}

impl Explorer {
    pub fn in_memory(schema: Schema, strictness: Strictness) -> Self {
        let store = Store::in_memory(&schema);
        Self::with_store(schema, store, strictness)
    }

    pub fn open(schema: Schema, data_dir: &Path, strictness: Strictness) -> ApiResult<Self> {
        let store = Store::open(&schema, data_dir)?;
        Ok(Self::with_store(schema, store, strictness))
    }

    fn with_store(schema: Schema, store: Store, strictness: Strictness) -> Self {
        Self {
            inner: Arc::new(ExplorerInner {
                schema,
                store,
                codec: FieldCodec::new(strictness),
            }),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn codec(&self) -> FieldCodec {
        self.inner.codec
    }

    pub fn content_type(&self, collection: &str) -> ApiResult<&ContentType> {
        self.inner.schema.resolve(collection)
    }

    pub fn create_entry(&self, collection: &str, document: InboundDocument) -> ApiResult<Entry> {
        let content_type = self.content_type(collection)?;
        let fields = self
            .inner
            .codec
            .decode_entry(content_type, document, WriteMode::Create)?;
        self.inner.store.insert(collection, fields)
    }

    pub fn list_entries(&self, collection: &str) -> ApiResult<Vec<Entry>> {
        self.content_type(collection)?;
        self.inner.store.list(collection)
    }

    pub fn get_entry(&self, collection: &str, id: u64) -> ApiResult<Entry> {
        self.content_type(collection)?;
        self.inner.store.get(collection, id)
    }

    pub fn update_entry(
        &self,
        collection: &str,
        id: u64,
        document: InboundDocument,
    ) -> ApiResult<Entry> {
        let content_type = self.content_type(collection)?;
        let fields = self
            .inner
            .codec
            .decode_entry(content_type, document, WriteMode::Update)
            .map_err(|err| err.with_id(id))?;
        self.inner.store.update(collection, id, fields)
    }

    pub fn delete_entry(&self, collection: &str, id: u64) -> ApiResult<Entry> {
        self.content_type(collection)?;
        self.inner.store.delete(collection, id)
    }
}

#[cfg(test)]
mod tests {
    use super::Explorer;
    use crate::core::codec::{Inbound, InboundDocument, Strictness, structured_document};
    use crate::core::error::ErrorKind;
    use crate::core::schema::{Attribute, AttributeType, ContentType, Schema};
    use serde_json::{Value, json};

    fn explorer(strictness: Strictness) -> Explorer {
        let schema = Schema::new()
            .with_content_type(
                ContentType::new("withjson")
                    .with_attribute("field", Attribute::new(AttributeType::Json)),
            )
            .expect("schema");
        Explorer::in_memory(schema, strictness)
    }

    fn document(value: Value) -> InboundDocument {
        match value {
            Value::Object(map) => structured_document(map),
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn create_then_update_replaces_field() {
        let explorer = explorer(Strictness::Strict);
        let created = explorer
            .create_entry("withjson", document(json!({"field": {"key": "value"}})))
            .expect("create");
        assert_eq!(created.field("field"), Some(&json!({"key": "value"})));

        let updated = explorer
            .update_entry(
                "withjson",
                created.id,
                document(json!({"field": {"newKey": "newVal"}})),
            )
            .expect("update");
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.field("field"), Some(&json!({"newKey": "newVal"})));
    }

    #[test]
    fn malformed_text_does_not_create_entry() {
        let explorer = explorer(Strictness::Strict);
        let mut doc = InboundDocument::new();
        doc.insert("field".to_string(), Inbound::Text("{oops".to_string()));
        let err = explorer.create_entry("withjson", doc).expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
        assert!(explorer.list_entries("withjson").expect("list").is_empty());
    }

    #[test]
    fn scalar_policy_follows_strictness() {
        let strict = explorer(Strictness::Strict);
        let err = strict
            .create_entry("withjson", document(json!({"field": 5})))
            .expect_err("strict");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let lenient = explorer(Strictness::Lenient);
        let entry = lenient
            .create_entry("withjson", document(json!({"field": 5})))
            .expect("lenient");
        assert_eq!(entry.field("field"), Some(&json!(5)));
    }

    #[test]
    fn unknown_collection_is_not_found() {
        let explorer = explorer(Strictness::Strict);
        let err = explorer.list_entries("missing").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn failed_update_keeps_previous_value() {
        let explorer = explorer(Strictness::Strict);
        let created = explorer
            .create_entry("withjson", document(json!({"field": {"key": "value"}})))
            .expect("create");
        let err = explorer
            .update_entry("withjson", created.id, document(json!({"field": "bare"})))
            .expect_err("strict update");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.id(), Some(created.id));

        let current = explorer.get_entry("withjson", created.id).expect("get");
        assert_eq!(current.field("field"), Some(&json!({"key": "value"})));
    }
}
