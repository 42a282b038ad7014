// Entry storage: per-collection id assignment, write ordering, and snapshot persistence.
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;
use crate::json::parse;

const LOCK_FILE: &str = ".fieldstore.lock";
const SNAPSHOT_EXT: &str = "json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Clone, Debug)]
struct Collection {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Collection {
    fn empty() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let max_id = snapshot.entries.iter().map(|entry| entry.id).max().unwrap_or(0);
        let entries = snapshot
            .entries
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();
        Self {
            next_id: snapshot.next_id.max(max_id + 1),
            entries,
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            entries: self.entries.values().cloned().collect(),
        }
    }
}

/// Entries for every declared collection.
///
/// Writes to the store are serialized by one write lock; a mutation becomes
/// visible only after its snapshot (if any) is durably renamed into place.
#[derive(Debug)]
pub struct Store {
    data_dir: Option<PathBuf>,
    collections: RwLock<BTreeMap<String, Collection>>,
    _lock: Option<File>,
}

impl Store {
    /// Memory-only store for the given schema.
    pub fn in_memory(schema: &Schema) -> Self {
        let collections = schema
            .content_types()
            .map(|content_type| (content_type.name.clone(), Collection::empty()))
            .collect();
        Self {
            data_dir: None,
            collections: RwLock::new(collections),
            _lock: None,
        }
    }

    /// Store persisted under `data_dir`, reloading existing snapshots.
    pub fn open(schema: &Schema, data_dir: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(data_dir).map_err(|err| {
            Error::new(map_io_error_kind(&err))
                .with_message(format!("failed to create data directory {}", data_dir.display()))
                .with_source(err)
        })?;
        let lock = acquire_dir_lock(data_dir)?;

        let mut collections = BTreeMap::new();
        for content_type in schema.content_types() {
            let path = snapshot_path(data_dir, &content_type.name);
            let collection = match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let snapshot: Snapshot = parse::from_str(&text).map_err(|err| {
                        Error::new(ErrorKind::Corrupt)
                            .with_message(format!("unreadable snapshot {}", path.display()))
                            .with_hint(parse::hint_for_error(&err, "snapshot"))
                            .with_collection(&content_type.name)
                            .with_source(err)
                    })?;
                    Collection::from_snapshot(snapshot)
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Collection::empty(),
                Err(err) => {
                    return Err(Error::new(map_io_error_kind(&err))
                        .with_message(format!("failed to read snapshot {}", path.display()))
                        .with_collection(&content_type.name)
                        .with_source(err));
                }
            };
            tracing::debug!(
                collection = %content_type.name,
                entries = collection.entries.len(),
                "loaded collection"
            );
            collections.insert(content_type.name.clone(), collection);
        }

        Ok(Self {
            data_dir: Some(data_dir.to_path_buf()),
            collections: RwLock::new(collections),
            _lock: Some(lock),
        })
    }

    pub fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Entry, Error> {
        let now = now_rfc3339()?;
        self.mutate(collection, |state| {
            let id = state.next_id;
            let entry = Entry {
                id,
                created_at: now.clone(),
                updated_at: now,
                fields,
            };
            state.next_id += 1;
            state.entries.insert(id, entry.clone());
            Ok(entry)
        })
    }

    pub fn list(&self, collection: &str) -> Result<Vec<Entry>, Error> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        let state = lookup(&collections, collection)?;
        Ok(state.entries.values().cloned().collect())
    }

    pub fn get(&self, collection: &str, id: u64) -> Result<Entry, Error> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        let state = lookup(&collections, collection)?;
        state
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| entry_not_found(collection, id))
    }

    /// Replaces each given field whole; fields not named keep their value.
    pub fn update(
        &self,
        collection: &str,
        id: u64,
        fields: Map<String, Value>,
    ) -> Result<Entry, Error> {
        let now = now_rfc3339()?;
        self.mutate(collection, |state| {
            let entry = state
                .entries
                .get_mut(&id)
                .ok_or_else(|| entry_not_found(collection, id))?;
            for (name, value) in fields {
                entry.fields.insert(name, value);
            }
            entry.updated_at = now;
            Ok(entry.clone())
        })
    }

    pub fn delete(&self, collection: &str, id: u64) -> Result<Entry, Error> {
        self.mutate(collection, |state| {
            state
                .entries
                .remove(&id)
                .ok_or_else(|| entry_not_found(collection, id))
        })
    }

    fn mutate<F>(&self, collection: &str, apply: F) -> Result<Entry, Error>
    where
        F: FnOnce(&mut Collection) -> Result<Entry, Error>,
    {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        let entry = match &self.data_dir {
            Some(data_dir) => {
                // Staged on a copy so a failed snapshot leaves memory unchanged.
                let mut next = lookup(&collections, collection)?.clone();
                let entry = apply(&mut next)?;
                write_snapshot(data_dir, collection, &next)?;
                collections.insert(collection.to_string(), next);
                entry
            }
            None => {
                let state = collections
                    .get_mut(collection)
                    .ok_or_else(|| unknown_collection(collection))?;
                apply(state)?
            }
        };
        tracing::debug!(collection = %collection, id = entry.id, "collection updated");
        Ok(entry)
    }
}

fn lookup<'a>(
    collections: &'a BTreeMap<String, Collection>,
    collection: &str,
) -> Result<&'a Collection, Error> {
    collections
        .get(collection)
        .ok_or_else(|| unknown_collection(collection))
}

fn unknown_collection(collection: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("unknown collection")
        .with_collection(collection)
}

fn entry_not_found(collection: &str, id: u64) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("entry not found")
        .with_collection(collection)
        .with_id(id)
}

fn snapshot_path(data_dir: &Path, collection: &str) -> PathBuf {
    data_dir.join(format!("{collection}.{SNAPSHOT_EXT}"))
}

fn write_snapshot(data_dir: &Path, collection: &str, state: &Collection) -> Result<(), Error> {
    let path = snapshot_path(data_dir, collection);
    let tmp_path = data_dir.join(format!(".{collection}.{SNAPSHOT_EXT}.tmp"));
    let bytes = serde_json::to_vec(&state.to_snapshot()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode snapshot")
            .with_collection(collection)
            .with_source(err)
    })?;

    let io_error = |err: io::Error, what: &str| {
        Error::new(map_io_error_kind(&err))
            .with_message(format!("failed to {what} snapshot {}", path.display()))
            .with_collection(collection)
            .with_source(err)
    };
    let mut file = File::create(&tmp_path).map_err(|err| io_error(err, "create"))?;
    let written = file
        .write_all(&bytes)
        .map_err(|err| io_error(err, "write"))
        .and_then(|()| file.sync_all().map_err(|err| io_error(err, "sync")))
        .and_then(|()| std::fs::rename(&tmp_path, &path).map_err(|err| io_error(err, "replace")));
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    written
}

fn acquire_dir_lock(data_dir: &Path) -> Result<File, Error> {
    let path = data_dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|err| {
            Error::new(map_io_error_kind(&err))
                .with_message(format!("failed to open lock file {}", path.display()))
                .with_source(err)
        })?;
    file.try_lock_exclusive().map_err(|err| {
        Error::new(ErrorKind::Busy)
            .with_message(format!("data directory {} is in use", data_dir.display()))
            .with_hint("Stop the other server or choose a different --data-dir.")
            .with_source(err)
    })?;
    Ok(file)
}

fn now_rfc3339() -> Result<String, Error> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("system clock before unix epoch")
                .with_source(err)
        })?;
    let ts = OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).map_err(
        |err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp out of range")
                .with_source(err)
        },
    )?;
    ts.format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })
}

fn map_io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Usage,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::Store;
    use crate::core::error::ErrorKind;
    use crate::core::schema::{Attribute, AttributeType, ContentType, Schema};
    use serde_json::{Map, Value, json};

    fn schema() -> Schema {
        Schema::new()
            .with_content_type(
                ContentType::new("withjson")
                    .with_attribute("field", Attribute::new(AttributeType::Json))
                    .with_attribute("title", Attribute::new(AttributeType::String)),
            )
            .expect("schema")
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let store = Store::in_memory(&schema());
        let first = store
            .insert("withjson", fields(json!({"field": {"a": 1}})))
            .expect("insert");
        let second = store
            .insert("withjson", fields(json!({"field": {"a": 2}})))
            .expect("insert");
        assert_eq!((first.id, second.id), (1, 2));

        store.delete("withjson", second.id).expect("delete");
        let third = store
            .insert("withjson", fields(json!({"field": {"a": 3}})))
            .expect("insert");
        assert_eq!(third.id, 3);

        let ids: Vec<u64> = store
            .list("withjson")
            .expect("list")
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn update_replaces_named_fields_only() {
        let store = Store::in_memory(&schema());
        let created = store
            .insert(
                "withjson",
                fields(json!({"field": {"key": "value"}, "title": "keep"})),
            )
            .expect("insert");
        let updated = store
            .update(
                "withjson",
                created.id,
                fields(json!({"field": {"newKey": "newVal"}})),
            )
            .expect("update");

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.field("field"), Some(&json!({"newKey": "newVal"})));
        assert_eq!(updated.field("title"), Some(&json!("keep")));
        assert_eq!(store.get("withjson", created.id).expect("get"), updated);
    }

    #[test]
    fn missing_entries_and_collections_are_not_found() {
        let store = Store::in_memory(&schema());
        let err = store.get("withjson", 42).expect_err("missing entry");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.id(), Some(42));

        let err = store.list("nope").expect_err("missing collection");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store
            .update("withjson", 1, Map::new())
            .expect_err("missing entry");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn entry_serializes_flat() {
        let store = Store::in_memory(&schema());
        let entry = store
            .insert("withjson", fields(json!({"field": [{"key": "value"}]})))
            .expect("insert");
        let value = serde_json::to_value(&entry).expect("encode");
        assert_eq!(value["id"], json!(1));
        assert_eq!(value["field"], json!([{"key": "value"}]));
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn snapshots_survive_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        {
            let store = Store::open(&schema, temp.path()).expect("open");
            store
                .insert("withjson", fields(json!({"field": {"key": "value"}})))
                .expect("insert");
            let second = store
                .insert("withjson", fields(json!({"field": {"key": "other"}})))
                .expect("insert");
            store.delete("withjson", second.id).expect("delete");
        }

        let store = Store::open(&schema, temp.path()).expect("reopen");
        let entries = store.list("withjson").expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("field"), Some(&json!({"key": "value"})));

        let next = store
            .insert("withjson", fields(json!({"field": {}})))
            .expect("insert");
        assert_eq!(next.id, 3);
    }

    #[test]
    fn data_dir_is_exclusive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        let _store = Store::open(&schema, temp.path()).expect("open");
        let err = Store::open(&schema, temp.path()).expect_err("second open");
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("withjson.json"), "{not json").expect("write");
        let err = Store::open(&schema(), temp.path()).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(err.collection(), Some("withjson"));
    }

    #[test]
    fn failed_snapshot_leaves_no_temp_file_and_no_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&schema(), temp.path()).expect("open");
        let created = store
            .insert("withjson", fields(json!({"field": {"key": "value"}})))
            .expect("insert");

        // A directory in place of the snapshot makes the final rename fail.
        let snapshot = temp.path().join("withjson.json");
        std::fs::remove_file(&snapshot).expect("remove snapshot");
        std::fs::create_dir(&snapshot).expect("block snapshot path");

        let err = store
            .update(
                "withjson",
                created.id,
                fields(json!({"field": {"newKey": "newVal"}})),
            )
            .expect_err("rename fails");
        assert_eq!(err.collection(), Some("withjson"));
        assert!(!temp.path().join(".withjson.json.tmp").exists());
        assert_eq!(
            store.get("withjson", created.id).expect("get").field("field"),
            Some(&json!({"key": "value"}))
        );
    }

    #[test]
    fn memory_store_failed_update_keeps_state() {
        let store = Store::in_memory(&schema());
        let created = store
            .insert("withjson", fields(json!({"field": {"a": 1}})))
            .expect("insert");
        store
            .update("withjson", created.id + 1, fields(json!({"field": {"a": 2}})))
            .expect_err("missing entry");
        let err = store
            .insert("nope", fields(json!({})))
            .expect_err("missing collection");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(store.list("withjson").expect("list"), vec![created]);
        let next = store
            .insert("withjson", fields(json!({"field": {"a": 3}})))
            .expect("insert");
        assert_eq!(next.id, 2);
    }
}
