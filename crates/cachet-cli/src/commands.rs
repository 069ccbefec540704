use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context};
use cachet_ledger::AttemptOutcome;
use cachet_sdk::{Cachet, CachetConfig, ProcessIdentity, RawArgs, Value};
use cachet_swarm::{CommandFactory, EnqueueOutcome, SystemProbe};
use colored::Colorize;

use crate::cli::*;
use crate::demo;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => CachetConfig::load(path)?,
        None => CachetConfig::default(),
    };
    let json = matches!(cli.format, OutputFormat::Json);
    if let Command::Config(_) = &cli.command {
        return cmd_config(&config);
    }
    if let Command::Pool(PoolArgs {
        workers: Some(workers),
        ..
    }) = &cli.command
    {
        config.pool.exact_workers = Some(*workers);
    }
    let cachet = open(&cli, config)?;
    match &cli.command {
        Command::Worker(args) => cmd_worker(&cachet, args),
        Command::Pool(args) => cmd_pool(&cli, &cachet, args),
        Command::Enqueue(args) => cmd_enqueue(&cachet, args, json),
        Command::Compute(args) => cmd_compute(&cachet, args, json),
        Command::Status(_) => cmd_status(&cachet, json),
        Command::Sweep(_) => cmd_sweep(&cachet),
        Command::Show(args) => cmd_show(&cachet, args, json),
        Command::Crashes(args) => cmd_crashes(&cachet, args, json),
        Command::Config(_) => cmd_config(cachet.config()),
    }
}

fn open(cli: &Cli, config: CachetConfig) -> anyhow::Result<Cachet> {
    let registry = demo::registry()?;
    match &cli.store {
        Some(root) => Cachet::open(root, registry, config)
            .with_context(|| format!("cannot open store at {}", root.display())),
        None => Cachet::builder(registry)
            .config(config)
            .open()
            .context("pass --store or set CACHET_STORE"),
    }
}

/// Parse `name=value` pairs. Values that look like integers, floats,
/// booleans or `null` become those; anything else is a string.
pub fn parse_call_args(pairs: &[String]) -> anyhow::Result<RawArgs> {
    let mut args = RawArgs::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("argument '{pair}' is not of the form name=value");
        };
        args.insert(name, parse_value(value))?;
    }
    Ok(args)
}

fn parse_value(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        return Value::from(float);
    }
    match text {
        "true" => Value::from(true),
        "false" => Value::from(false),
        "null" => Value::Null,
        _ => Value::from(text),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => format!("{s:?}"),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}

fn describe_call(args: &CallArgs) -> String {
    format!("{}({})", args.function, args.args.join(", "))
}

fn cmd_compute(cachet: &Cachet, args: &CallArgs, json: bool) -> anyhow::Result<()> {
    let signature = cachet.signature_for(&args.function, &parse_call_args(&args.args)?)?;
    let call = cachet.get_or_compute(&signature)?;
    let value = cachet.cache().value(&call)?;
    if json {
        let out = serde_json::json!({
            "signature": call.signature.to_hex(),
            "value": value,
            "fresh": call.fresh,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    let source = if call.fresh { "computed" } else { "cached" };
    println!(
        "{} {} = {} ({})",
        "✓".green().bold(),
        describe_call(args),
        render(&value).bold(),
        source.dimmed()
    );
    println!("  Signature: {}", call.signature.short().yellow());
    Ok(())
}

fn cmd_enqueue(cachet: &Cachet, args: &EnqueueArgs, json: bool) -> anyhow::Result<()> {
    let signature =
        cachet.signature_for(&args.call.function, &parse_call_args(&args.call.args)?)?;
    let address = signature.address()?;
    if args.wait {
        let value = cachet.wait_for_result(&signature, args.timeout.map(Duration::from_secs))?;
        if json {
            let out = serde_json::json!({ "signature": address.to_hex(), "value": value });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!("{} {} = {}", "✓".green().bold(), describe_call(&args.call), render(&value).bold());
        }
        return Ok(());
    }
    let outcome = cachet.swarm(&signature)?;
    if json {
        let out = serde_json::json!({
            "signature": address.to_hex(),
            "outcome": format!("{outcome:?}"),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    let status = match outcome {
        EnqueueOutcome::Queued => "queued".green(),
        EnqueueOutcome::AlreadyQueued => "already queued".yellow(),
        EnqueueOutcome::AlreadyComputed => "already computed".cyan(),
    };
    println!("{} {} {}", describe_call(&args.call), status, address.short().dimmed());
    Ok(())
}

fn cmd_worker(cachet: &Cachet, args: &WorkerArgs) -> anyhow::Result<()> {
    let ancestor = match (args.ancestor_pid, args.ancestor_start) {
        (Some(pid), Some(start)) => Some(ProcessIdentity::new(pid, start, &SystemProbe)?),
        _ => None,
    };
    let mut worker = cachet.worker(ancestor)?;
    let stats = if args.drain { worker.drain()? } else { worker.run()? };
    println!(
        "{} Worker {} done: {} computed, {} crashed",
        "✓".green().bold(),
        worker.info().identity().to_string().bold(),
        stats.computed,
        stats.crashed
    );
    Ok(())
}

/// Workers are this same binary, started with `worker` and the pool's
/// identity as ancestor.
fn worker_command(cli: &Cli) -> anyhow::Result<CommandFactory> {
    let exe = std::env::current_exe().context("cannot locate the cachet executable")?;
    let store: Option<PathBuf> = cli.store.clone();
    let config: Option<PathBuf> = cli.config.clone();
    let verbose = cli.verbose;
    Ok(Box::new(move |ancestor: &ProcessIdentity| {
        let mut command = process::Command::new(&exe);
        if let Some(store) = &store {
            command.arg("--store").arg(store);
        }
        if let Some(config) = &config {
            command.arg("--config").arg(config);
        }
        if verbose {
            command.arg("--verbose");
        }
        command
            .arg("worker")
            .arg("--ancestor-pid")
            .arg(ancestor.process_id.to_string())
            .arg("--ancestor-start")
            .arg(ancestor.start_time.to_string());
        command
    }))
}

fn cmd_pool(cli: &Cli, cachet: &Cachet, args: &PoolArgs) -> anyhow::Result<()> {
    let mut pool = cachet.pool(worker_command(cli)?)?;
    println!(
        "Worker pool for {} targeting {} workers",
        pool.ancestor().to_string().bold(),
        pool.target().to_string().bold()
    );
    pool.run_for(args.duration.map(Duration::from_secs))?;
    println!("{} Worker pool stopped", "✓".green().bold());
    Ok(())
}

fn cmd_status(cachet: &Cachet, json: bool) -> anyhow::Result<()> {
    let status = cachet.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{status}");
    }
    Ok(())
}

fn cmd_sweep(cachet: &Cachet) -> anyhow::Result<()> {
    let freed = cachet.sweep_abandoned()?;
    println!("{} Released {} abandoned claims", "✓".green(), freed.len());
    for address in &freed {
        println!("  {}", address.short().yellow());
    }
    Ok(())
}

fn cmd_show(cachet: &Cachet, args: &CallArgs, json: bool) -> anyhow::Result<()> {
    let signature = cachet.signature_for(&args.function, &parse_call_args(&args.args)?)?;
    let records = cachet.execution_records(&signature)?;
    let value = cachet.result(&signature)?;
    if json {
        let out = serde_json::json!({
            "signature": signature.address()?.to_hex(),
            "value": value,
            "attempts": records,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("{} {}", describe_call(args).bold(), signature.address()?.short().yellow());
    match &value {
        Some(value) => println!("  Result: {}", render(value).green()),
        None if cachet.queue().is_queued(&signature)? => println!("  Result: {}", "queued".yellow()),
        None => println!("  Result: {}", "none".dimmed()),
    }
    if records.is_empty() {
        println!("  No attempts recorded.");
    }
    for record in &records {
        let started = record
            .started_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "?".into());
        let outcome = match &record.outcome {
            Some(AttemptOutcome::Succeeded { .. }) => "succeeded".green(),
            Some(AttemptOutcome::Crashed {
                exception_type,
                message,
            }) => format!("crashed: {exception_type}: {message}").red(),
            Some(AttemptOutcome::Aborted { reason }) => format!("aborted: {reason}").yellow(),
            None => "unfinished".yellow(),
        };
        println!("  {} {} {}", record.attempt_id.as_str().dimmed(), started, outcome);
        if let Some(output) = &record.output {
            for line in output.stdout.lines() {
                println!("    | {line}");
            }
        }
        for event in &record.events {
            println!("    event: {}", event.message);
        }
    }
    Ok(())
}

fn cmd_crashes(cachet: &Cachet, args: &CrashesArgs, json: bool) -> anyhow::Result<()> {
    let crashes = cachet.crash_history(args.day)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&crashes)?);
        return Ok(());
    }
    if crashes.is_empty() {
        println!("No crashes recorded.");
    }
    for crash in &crashes {
        println!(
            "{} {} {}: {}",
            crash.timestamp.to_rfc3339().dimmed(),
            crash.function.as_deref().unwrap_or("-").bold(),
            crash.exception_type.red(),
            crash.message
        );
    }
    Ok(())
}

fn cmd_config(config: &CachetConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
