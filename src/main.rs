//! Purpose: `otai-remote` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr so stdout stays machine-readable.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod runner;

use otai_remote::api::{Error, ErrorKind, ObjectId, to_exit_code};
use otai_remote::config::InterfaceConfig;
use otai_remote::core::vid::{CounterIndexGenerator, VirtualObjectIdManager};

#[derive(Parser)]
#[command(
    name = "otai-remote",
    version,
    about = "Client-side OTAI interface over a remote backend",
    long_about = None,
    after_help = r#"EXAMPLES
  $ otai-remote decode oid:0x1000000000000
  $ otai-remote check-config otai.json
  $ otai-remote --config otai.json run steps.json

Set RUST_LOG (e.g. RUST_LOG=debug) for diagnostics on stderr."#
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Interface config (JSON); defaults apply when omitted",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Decode an object id into its type and linecard scope")]
    Decode {
        #[arg(help = "Object id, e.g. oid:0x1000000000000")]
        oid: String,
    },
    #[command(about = "Load and validate a config file, print it normalised")]
    CheckConfig {
        #[arg(help = "Config file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "Run a JSON step manifest against the simulated backend")]
    Run {
        #[arg(help = "Manifest file", value_hint = ValueHint::FilePath)]
        manifest: PathBuf,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };

    let config = match &cli.config {
        Some(path) => InterfaceConfig::load(path)?,
        None => InterfaceConfig::default(),
    };

    match cli.command {
        Command::Decode { oid } => {
            emit_json(&decode(&config, &oid)?);
        }
        Command::CheckConfig { file } => {
            let checked = InterfaceConfig::load(&file)?;
            let value = serde_json::to_value(&checked).map_err(|err| {
                Error::new(ErrorKind::Failure)
                    .with_message("failed to encode config")
                    .with_source(err)
            })?;
            emit_json(&value);
        }
        Command::Run { manifest } => {
            runner::run_manifest(&manifest, config)?;
        }
    }
    Ok(0)
}

fn decode(config: &InterfaceConfig, oid: &str) -> Result<Value, Error> {
    let object_id = ObjectId::from_str(oid)?;
    let manager = VirtualObjectIdManager::new(
        config.global_context,
        config.linecard_table(),
        Arc::new(CounterIndexGenerator::new()),
    );
    let object_type = manager.object_type_query(object_id).ok_or_else(|| {
        Error::new(ErrorKind::InvalidParameter)
            .with_message(format!("not a virtual object id: {object_id}"))
    })?;
    Ok(json!({
        "object_id": object_id,
        "object_type": object_type,
        "linecard_id": manager.linecard_id_query(object_id),
        "linecard_index": manager.linecard_index_query(object_id),
        "global_context": manager.global_context_query(object_id),
    }))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Failure\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("operation failed")),
    );
    inner.insert("status".to_string(), json!(err.status()));
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if err.is_fatal() {
        inner.insert("fatal".to_string(), json!(true));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
