//! Purpose: Hold top-level CLI command dispatch for `fieldstore`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Output envelopes and exit code semantics stay stable.

use super::*;

use std::net::SocketAddr;
use std::path::Path;

use fieldstore::api::Schema;

pub(super) fn dispatch_command(
    command: Command,
    data_dir: PathBuf,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Serve(args) => {
            let config = serve_config_from_args(args, &data_dir)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Schema { command } => match command {
            SchemaCommand::Check { paths } => {
                let schema = load_schema(&paths)?;
                let content_types = schema
                    .content_types()
                    .map(|content_type| {
                        serde_json::to_value(content_type).map_err(|err| {
                            Error::new(ErrorKind::Internal)
                                .with_message("failed to encode content type")
                                .with_source(err)
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                emit_json(json!({ "content_types": content_types }));
                Ok(RunOutcome::ok())
            }
        },
    }
}

fn serve_config_from_args(args: ServeArgs, data_dir: &Path) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:9800.")
    })?;
    let schema = load_schema(&args.schemas)?;
    Ok(serve::ServeConfig {
        bind,
        schema,
        data_dir: (!args.no_persist).then(|| data_dir.to_path_buf()),
        strictness: args.json_strictness.into(),
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
    })
}

fn load_schema(paths: &[PathBuf]) -> Result<Schema, Error> {
    let mut schema = Schema::new();
    for path in paths {
        schema.load_file(path)?;
    }
    Ok(schema)
}
