use std::io::Read;

use anyhow::Context;
use calstore_datastore::{Store, StoreConfig};
use calstore_migrate::{FileLegacyStore, Migrator, PassThrough};
use colored::Colorize;
use serde_json::json;

use crate::cli::*;
use crate::gateway;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;
    let outcome = match &cli.command {
        Command::Homes => cmd_homes(&store, &cli.format).await,
        Command::Calendars(args) => cmd_calendars(&store, args, &cli.format).await,
        Command::Objects(args) => cmd_objects(&store, args, &cli.format, cli.verbose).await,
        Command::Migrate(args) => cmd_migrate(&store, args, cli.verbose).await,
        Command::Gateway => cmd_gateway(&store).await,
    };
    store.close();
    outcome
}

fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if config.data_dir.is_none() {
        tracing::warn!("no data directory configured; changes will not persist");
    }
    Store::open(config).context("opening store")
}

async fn cmd_homes(store: &Store, format: &OutputFormat) -> anyhow::Result<()> {
    let txn = store.new_transaction().await?;
    let uids = txn.home_uids()?;
    txn.abort();
    match format {
        OutputFormat::Json => println!("{}", json!(uids)),
        OutputFormat::Text if uids.is_empty() => println!("No calendar homes."),
        OutputFormat::Text => {
            for uid in uids {
                println!("  {}", uid.bold());
            }
        }
    }
    Ok(())
}

async fn cmd_calendars(store: &Store, args: &CalendarsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let txn = store.new_transaction().await?;
    let home = txn
        .home(&args.uid)?
        .with_context(|| format!("no calendar home for {}", args.uid))?;
    let mut rows = Vec::new();
    for calendar in home.calendars(&txn)? {
        let objects = calendar.object_names(&txn)?.len();
        rows.push((calendar.name().to_string(), calendar.is_inbox(), objects));
    }
    txn.abort();
    match format {
        OutputFormat::Json => {
            let list: Vec<_> = rows
                .iter()
                .map(|(name, inbox, objects)| json!({ "name": name, "inbox": inbox, "objects": objects }))
                .collect();
            println!("{}", json!(list));
        }
        OutputFormat::Text => {
            println!("Home {}", args.uid.yellow().bold());
            for (name, inbox, objects) in rows {
                let marker = if inbox { " (inbox)".dimmed().to_string() } else { String::new() };
                println!("  {}{}  {} objects", name.bold(), marker, objects.to_string().cyan());
            }
        }
    }
    Ok(())
}

async fn cmd_objects(store: &Store, args: &ObjectsArgs, format: &OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let txn = store.new_transaction().await?;
    let home = txn
        .home(&args.uid)?
        .with_context(|| format!("no calendar home for {}", args.uid))?;
    let calendar = home
        .calendar_with_name(&txn, &args.calendar)?
        .with_context(|| format!("no calendar {} in {}", args.calendar, args.uid))?;
    let objects = calendar.calendar_objects(&txn)?;
    txn.abort();
    match format {
        OutputFormat::Json => {
            let list: Vec<_> = objects
                .iter()
                .map(|o| json!({ "name": o.name(), "uid": o.uid(), "type": o.component_type().as_str() }))
                .collect();
            println!("{}", json!(list));
        }
        OutputFormat::Text => {
            for object in &objects {
                println!("  {}  {}  {}", object.name().bold(), object.component_type().as_str().cyan(), object.uid().dimmed());
                if verbose {
                    if let Some(dropbox) = object.dropbox_id() {
                        println!("    dropbox: {}", dropbox.blue());
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_migrate(store: &Store, args: &MigrateArgs, verbose: bool) -> anyhow::Result<()> {
    let legacy = FileLegacyStore::new(&args.legacy_root);
    let uids = if args.uids.is_empty() {
        legacy.home_uids().await?
    } else {
        args.uids.clone()
    };
    let migrator = Migrator::default();
    let mut fatal = 0;
    for uid in &uids {
        match migrator.migrate_uid(store, &legacy, uid, &PassThrough).await {
            Ok(report) => {
                let (ok, bad) = report.counts();
                let status = if bad == 0 { "✓".green().bold() } else { "!".yellow().bold() };
                println!("{status} {}: {} objects migrated, {} failed", uid.bold(), ok, bad);
                for name in &report.skipped {
                    println!("  {} {}", "skipped:".dimmed(), name);
                }
                if let Some(reason) = &report.property_failure {
                    println!("  {} home properties: {}", "failed:".red(), reason);
                }
                for (calendar, reason) in &report.failed_calendars {
                    println!("  {} {}: {}", "failed:".red(), calendar, reason);
                }
                for (calendar, calendar_report) in &report.calendars {
                    if verbose {
                        let (ok, bad) = calendar_report.counts();
                        println!("  {}: {ok} ok, {bad} failed", calendar.cyan());
                    }
                    if let Some(reason) = &calendar_report.property_failure {
                        println!("  {} {} properties: {}", "failed:".red(), calendar, reason);
                    }
                    for (name, reason) in &calendar_report.failures {
                        println!("  {} {}/{}: {}", "failed:".red(), calendar, name, reason);
                    }
                }
            }
            Err(err) => {
                fatal += 1;
                println!("{} {}: {err}", "✗".red().bold(), uid.bold());
            }
        }
    }
    if fatal > 0 {
        anyhow::bail!("{fatal} of {} homes failed to migrate", uids.len());
    }
    Ok(())
}

async fn cmd_gateway(store: &Store) -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let response = gateway::respond(store, &input).await;
    println!("{response}");
    Ok(())
}
