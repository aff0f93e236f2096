use std::fs;
use std::time::Duration;

use anyhow::Context;
use skymerge::{
    ConfigOverrides, EngineConfig, KeyFilter, Profile, Skymerge, SourceId, TranslatorConfig,
    UnitSystem,
};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_args(flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            if let Some(value) = args.next() {
                values.push(value);
            }
        }
    }
    values
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"skymerge_replay - replay captured feed documents through the merge engine

USAGE:
    skymerge_replay --source NAME=TABLE.json [--feed NAME=DOC.json]... [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
        --source <N=F>        Register source N with translator table F (repeatable)
        --feed <N=F>          Ingest JSON document F into source N (repeatable)
        --profile <NAME>      balanced | low-latency | high-throughput
        --window-ms <MS>      Override the notification debounce window
        --display <SYSTEM>    metric | imperial
        --watch               Print each change notification as it is delivered
        --summary <FILE>      Also save the merged summary to FILE
    -h, --help                Print help

ENVIRONMENT:
    SKYMERGE_CONFIG           Path to config file
    SKYMERGE_*                Any config field, e.g. SKYMERGE_COALESCE_WINDOW_MS
"#
    );
}

fn split_spec(spec: &str) -> anyhow::Result<(&str, &str)> {
    spec.split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected NAME=FILE, got {:?}", spec))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(profile) = parse_arg("--profile") {
        overrides.profile = Some(match profile.as_str() {
            "balanced" => Profile::Balanced,
            "low-latency" => Profile::LowLatency,
            "high-throughput" => Profile::HighThroughput,
            other => anyhow::bail!("unknown profile {:?}", other),
        });
    }
    if let Some(window) = parse_arg("--window-ms") {
        overrides.coalesce_window_ms = Some(window.parse()?);
    }
    if let Some(system) = parse_arg("--display") {
        overrides.display_system = Some(match system.as_str() {
            "metric" => UnitSystem::Metric,
            "imperial" => UnitSystem::Imperial,
            "native" => UnitSystem::Native,
            other => anyhow::bail!("unknown display system {:?}", other),
        });
    }

    let config_path = parse_arg("--config").or_else(|| parse_arg("-c"));
    let config = EngineConfig::load(config_path.as_deref(), overrides)?;
    let engine = Skymerge::with_config(config)?;
    engine.start();

    if has_flag("--watch") {
        engine.on_change(KeyFilter::All, |event| {
            if let Some(value) = event.value() {
                println!("changed: {} = {} [{}]", event.key(), value.measurement(), value.source());
            }
        });
    }

    let sources = parse_args("--source");
    if sources.is_empty() {
        print_help();
        anyhow::bail!("at least one --source NAME=TABLE.json is required");
    }
    for spec in &sources {
        let (name, path) = split_spec(spec)?;
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read translator table {}", path))?;
        let table = TranslatorConfig::from_json(&raw)?;
        let source = engine.register_source(name, &table)?;
        println!("registered {}", source);
    }

    for spec in parse_args("--feed") {
        let (name, path) = split_spec(&spec)?;
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read feed document {}", path))?;
        let document: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("feed document {} is not valid JSON", path))?;
        let report = engine.ingest_document(&SourceId::new(name), &document)?;
        println!(
            "{}: {} sections, {} decoded, {} skipped, {} unmapped, {} keys updated",
            name, report.sections, report.decoded, report.skipped, report.unmapped,
            report.keys_updated
        );
    }

    // Give the notifier a window to deliver, then flush the remainder
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let summary = engine.summary()?;
    println!("\n{}", summary);

    let stats = engine.stats();
    println!("sources: {}", stats.sources);
    println!("observations held: {}", stats.observations);
    println!("container updates: {}", stats.dispatch.updates);
    println!(
        "notifications: {} batches, {} events",
        stats.dispatch.batches_delivered, stats.dispatch.events_delivered
    );

    if let Some(path) = parse_arg("--summary") {
        skymerge::utils::save_summary_to_file(&summary, &path)?;
    }

    Ok(())
}
