//! Purpose: Define the public Rust API boundary for fieldstore.
//! Exports: Core types, the `Explorer` entry service, and `RemoteClient`.
//! Role: Public, additive-only surface used by the CLI, server, and tests.
//! Invariants: Callers reach storage only through `Explorer` (decode before write).
//! Invariants: Internal helpers (JSON parse seam, paths) stay private.

mod explorer;
mod remote;

pub use crate::core::codec::{
    FieldCodec, Inbound, InboundDocument, Strictness, WriteMode, structured_document,
};
pub use crate::core::error::{Error, ErrorKind, parse_error_kind, to_exit_code};
pub use crate::core::schema::{
    Attribute, AttributeType, ContentType, RESERVED_KEYS, Schema, parse_schema_text,
};
pub use crate::core::store::{Entry, Store};
pub use crate::core::value::{FieldValue, Shape};
pub use explorer::Explorer;
pub use remote::{FormPart, RemoteClient};

pub fn default_data_dir() -> std::path::PathBuf {
    crate::data_paths::default_data_dir()
}
