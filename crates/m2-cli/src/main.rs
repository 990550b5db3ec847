use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use m2_api::{ExtensionResult, FieldMap, TaskEngine};
use m2_core::load_fields_from_file;
use m2_runtime::M2Runtime;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "m2-task",
    about = "Run one mainframe-modernization task action and report its result"
)]
struct Cli {
    /// Print the result as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, short)]
    verbose: bool,

    /// JSON or TOML file holding the invocation fields.
    #[arg(long)]
    fields_file: Option<PathBuf>,

    /// Overrides one field. Values that parse as JSON are taken as JSON.
    #[arg(long = "field", value_parser = parse_key_val)]
    fields: Vec<(String, String)>,

    /// Shorthand for `--field action=<name>`.
    #[arg(long)]
    action: Option<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let fields = collect_fields(&cli)?;
    tracing::debug!(count = fields.len(), "collected invocation fields");
    let runtime = M2Runtime::from_env().context("failed to build the http client")?;

    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let result = runtime.run(&fields, &mut lock);
    lock.flush()?;
    drop(lock);

    pout(cli.json, &result)?;
    Ok(ExitCode::from(exit_status(result.rc)))
}

fn collect_fields(cli: &Cli) -> anyhow::Result<FieldMap> {
    let mut fields = match &cli.fields_file {
        Some(path) => load_fields_from_file(path)
            .with_context(|| format!("failed to load fields from {}", path.display()))?,
        None => FieldMap::new(),
    };
    for (key, raw) in &cli.fields {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        fields.insert(key.clone(), value);
    }
    if let Some(action) = &cli.action {
        fields.insert("action".to_string(), Value::String(action.clone()));
    }
    Ok(fields)
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| "must be KEY=VALUE".to_string())?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn pout(json_mode: bool, result: &ExtensionResult) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("rc={} {}", result.rc, result.message);
    for (name, value) in &result.output_fields {
        println!("{name}={value}");
    }
    for value in &result.values {
        println!("- {value}");
    }
    if let Some(output) = &result.output {
        println!("[{}] {}", output.name, output.data);
    }
    Ok(())
}

/// Task return codes outside 0..=255 cannot be expressed as a process status.
fn exit_status(rc: i32) -> u8 {
    u8::try_from(rc).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("filter_pattern=a=b").unwrap(),
            ("filter_pattern".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("no-equals").is_err());
    }

    #[test]
    fn field_flags_parse_json_when_possible() {
        let cli = Cli::parse_from([
            "m2-task",
            "--field",
            "wait=true",
            "--field",
            "application=APP (a-1)",
            "--field",
            "interval=5",
            "--action",
            "start-batch",
        ]);
        let fields = collect_fields(&cli).unwrap();
        assert_eq!(fields["wait"], Value::Bool(true));
        assert_eq!(fields["application"], Value::String("APP (a-1)".into()));
        assert_eq!(fields["interval"], serde_json::json!(5));
        assert_eq!(fields["action"], Value::String("start-batch".into()));
    }

    #[test]
    fn exit_status_keeps_domain_codes() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(103), 103);
        assert_eq!(exit_status(104), 104);
        assert_eq!(exit_status(-1), 1);
    }
}
