use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use serde_json::{json, Value};
use txn_kernel_rs::demo::register_demo;
use txn_kernel_rs::{JsonLogListener, Registry, StepArgs, TransactionDefinition};

#[derive(Parser, Debug)]
#[command(name = "txn-run")]
#[command(about = "Run a transaction definition against the demo operations")]
struct CliOptions {
    /// Path to the transaction definition (JSON/YAML/TOML)
    #[arg(long = "definition", short = 'd')]
    definition: PathBuf,

    /// JSON input payload file (use '-' for stdin)
    #[arg(long = "input", short = 'i')]
    input: Option<String>,

    /// JSON object of extra call arguments keyed by step name
    #[arg(long = "args", short = 'a')]
    args: Option<String>,

    /// Print every step event as a JSON log line
    #[arg(long = "log-events", action = ArgAction::SetTrue)]
    log_events: bool,
}

fn main() {
    env_logger::init();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the transaction succeeded.
fn run() -> Result<bool> {
    let opts = CliOptions::parse();

    let registry = Registry::new();
    let database = register_demo(&registry);

    let definition = TransactionDefinition::load(&opts.definition)?;
    let mut sequence = definition
        .build(&registry)
        .with_context(|| format!("Unable to build {}", opts.definition.display()))?;
    if opts.log_events {
        sequence = sequence.subscribe(JsonLogListener::new());
    }

    let input = load_input(opts.input)?;
    let step_args = parse_step_args(opts.args.as_deref())?;
    let outcome = sequence.call_with(input, &step_args)?;

    let (mut report, succeeded) = match outcome {
        Ok(value) => (json!({ "success": value }), true),
        Err(failure) => (
            json!({
                "failure": {
                    "step": failure.step_name(),
                    "value": failure.value().to_json(),
                }
            }),
            false,
        ),
    };
    report["persisted"] = Value::Array(database.rows());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(succeeded)
}

fn load_input(source: Option<String>) -> Result<Value> {
    let payload = match source {
        None => Value::Null,
        Some(path) if path == "-" => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read JSON payload from stdin")?;
            if buffer.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&buffer).context("Invalid JSON payload read from stdin")?
            }
        }
        Some(path) => {
            let data =
                fs::read_to_string(&path).with_context(|| format!("Unable to read {path}"))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Invalid JSON payload in {path}"))?
        }
    };
    Ok(payload)
}

fn parse_step_args(raw: Option<&str>) -> Result<StepArgs> {
    let Some(raw) = raw else {
        return Ok(StepArgs::new());
    };
    let value: Value = serde_json::from_str(raw).context("--args must be a JSON object")?;
    let Value::Object(map) = value else {
        return Err(anyhow!("--args must be a JSON object"));
    };
    map.into_iter()
        .map(|(step, args)| match args {
            Value::Array(items) => Ok((step, items)),
            single => Ok((step, vec![single])),
        })
        .collect()
}
