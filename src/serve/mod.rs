//! Purpose: Provide the HTTP/JSON server for declared collections.
//! Exports: `ServeConfig`, `serve`, `validate_config`.
//! Role: Axum-based server exposing create/list/get/update/delete per collection.
//! Invariants: Success bodies are bare entries (or arrays of entries); errors use
//! the `{"error": {...}}` envelope with stable kind names.
//! Invariants: Loopback-only unless explicitly allowed.
//! Notes: Request bodies may be JSON or multipart with a `data` part.

mod payload;

use axum::extract::{DefaultBodyLimit, Path as AxumPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fieldstore::api::{Entry, Error, ErrorKind, Explorer, FieldCodec, Schema, Strictness};

const VERSION_HEADER: &str = "fieldstore-version";
const RESERVED_ROUTES: [&str; 1] = ["healthz"];

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub schema: Schema,
    pub data_dir: Option<PathBuf>,
    pub strictness: Strictness,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

#[derive(Clone)]
struct AppState {
    explorer: Explorer,
    max_body_bytes: usize,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let explorer = match &config.data_dir {
        Some(data_dir) => Explorer::open(config.schema, data_dir, config.strictness)?,
        None => Explorer::in_memory(config.schema, config.strictness),
    };
    tracing::info!(
        bind = %config.bind,
        collections = explorer.schema().len(),
        strictness = ?explorer.codec().strictness(),
        persisted = config.data_dir.is_some(),
        "starting server"
    );

    let app = router(explorer, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(explorer: Explorer, max_body_bytes: usize) -> Router {
    let state = Arc::new(AppState {
        explorer,
        max_body_bytes,
    });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/:collection", get(list_entries).post(create_entry))
        .route(
            "/:collection/:id",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.schema.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no content types declared")
            .with_hint("Pass at least one --schema file."));
    }

    let codec = FieldCodec::new(config.strictness);
    for content_type in config.schema.content_types() {
        if RESERVED_ROUTES.contains(&content_type.name.as_str()) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("collection name collides with a server route")
                .with_collection(&content_type.name));
        }
        codec.check_defaults(content_type)?;
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn create_entry(
    State(state): State<Arc<AppState>>,
    AxumPath(collection): AxumPath<String>,
    request: Request,
) -> Response {
    let content_type = match state.explorer.content_type(&collection) {
        Ok(content_type) => content_type,
        Err(err) => return error_response(err),
    };
    let document = match payload::read_document(
        request,
        state.explorer.codec(),
        content_type,
        state.max_body_bytes,
    )
    .await
    {
        Ok(document) => document,
        Err(err) => return error_response(err.with_collection(&collection)),
    };
    match state.explorer.create_entry(&collection, document) {
        Ok(entry) => entry_response(&entry),
        Err(err) => error_response(err),
    }
}

async fn list_entries(
    State(state): State<Arc<AppState>>,
    AxumPath(collection): AxumPath<String>,
) -> Response {
    match state.explorer.list_entries(&collection) {
        Ok(entries) => json_response(entries),
        Err(err) => error_response(err),
    }
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    AxumPath((collection, id)): AxumPath<(String, String)>,
) -> Response {
    let id = match parse_id(&collection, &id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.explorer.get_entry(&collection, id) {
        Ok(entry) => entry_response(&entry),
        Err(err) => error_response(err),
    }
}

async fn update_entry(
    State(state): State<Arc<AppState>>,
    AxumPath((collection, id)): AxumPath<(String, String)>,
    request: Request,
) -> Response {
    let id = match parse_id(&collection, &id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    let content_type = match state.explorer.content_type(&collection) {
        Ok(content_type) => content_type,
        Err(err) => return error_response(err),
    };
    let document = match payload::read_document(
        request,
        state.explorer.codec(),
        content_type,
        state.max_body_bytes,
    )
    .await
    {
        Ok(document) => document,
        Err(err) => return error_response(err.with_collection(&collection).with_id(id)),
    };
    match state.explorer.update_entry(&collection, id, document) {
        Ok(entry) => entry_response(&entry),
        Err(err) => error_response(err),
    }
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    AxumPath((collection, id)): AxumPath<(String, String)>,
) -> Response {
    let id = match parse_id(&collection, &id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.explorer.delete_entry(&collection, id) {
        Ok(entry) => entry_response(&entry),
        Err(err) => error_response(err),
    }
}

fn parse_id(collection: &str, raw: &str) -> Result<u64, Error> {
    raw.parse::<u64>().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("entry id must be a non-negative integer")
            .with_collection(collection)
    })
}

fn entry_response(entry: &Entry) -> Response {
    json_response(entry)
}

fn json_response<T: Serialize>(payload: T) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static("0"));
    response
}

fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::Usage => {
            if is_unsupported_media(err) {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            } else {
                StatusCode::BAD_REQUEST
            }
        }
        ErrorKind::MalformedValue | ErrorKind::TypeMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Corrupt | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    match err.kind() {
        ErrorKind::MalformedValue | ErrorKind::TypeMismatch => tracing::warn!(
            kind = ?err.kind(),
            collection = err.collection().unwrap_or_default(),
            field = err.field().unwrap_or_default(),
            "rejected payload"
        ),
        ErrorKind::Corrupt | ErrorKind::Io | ErrorKind::Internal => {
            tracing::error!(error = %err, "request failed")
        }
        _ => {}
    }

    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            collection: err.collection().map(str::to_string),
            id: err.id(),
            field: err.field().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static("0"));
    response
}

fn is_unsupported_media(err: &Error) -> bool {
    err.message()
        .is_some_and(|message| message.starts_with(payload::UNSUPPORTED_MEDIA))
}
