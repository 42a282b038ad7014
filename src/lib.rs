//! Purpose: Shared library crate used by the `fieldstore` CLI, server, and tests.
//! Exports: `core` (codec, schema, store, errors) and `api` (stable surface + remote client).
//! Role: Backs the binary; the HTTP layer only wires these pieces to routes.
//! Invariants: The field codec is stateless and safe to share across requests.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub(crate) mod data_paths;
pub(crate) mod json;
