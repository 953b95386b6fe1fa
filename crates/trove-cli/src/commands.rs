use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use colored::Colorize;
use tracing::debug;
use trove_pool::ObjectPool;
use trove_record::{Record, RefValue};
use trove_store::{FileKvStore, KvStore, StoreError};
use trove_types::Pid;

use crate::cli::*;
use crate::config::TroveConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = TroveConfig::resolve(cli.config.as_deref(), cli.dir)?;
    let store = FileKvStore::open(config.store.clone()).await?;
    debug!(dir = %store.dir().display(), "opened store");
    let store: Arc<dyn KvStore> = Arc::new(store);

    match cli.command {
        Command::Ls(args) => cmd_ls(store.as_ref(), &config, args).await,
        Command::Show(args) => cmd_show(store.as_ref(), &config, args).await,
        Command::Stats => cmd_stats(store.as_ref(), &config).await,
        Command::Fsck => cmd_fsck(store, &config).await,
        Command::Gc(args) => cmd_gc(store, &config, args).await,
    }
}

/// A stored value, classified by key.
enum Entry {
    /// The root key and the pid it points at.
    Root(Pid),
    Record(Record),
    /// Unreadable, either at the framing or the record layer.
    Corrupt(String),
    /// A key that is neither the root key nor a pid.
    Foreign,
}

async fn read_entry(
    store: &dyn KvStore,
    config: &TroveConfig,
    key: &str,
) -> anyhow::Result<Option<(usize, Entry)>> {
    let bytes = match store.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(None),
        Err(StoreError::Corrupt { reason, .. }) => return Ok(Some((0, Entry::Corrupt(reason)))),
        Err(err) => return Err(err.into()),
    };
    let size = bytes.len();
    let entry = if key == config.pool.root_key {
        match RefValue::from_bytes(&bytes) {
            Ok(RefValue::Pointer(pid)) => Entry::Root(pid),
            Ok(_) => Entry::Corrupt("root key does not hold a pointer".into()),
            Err(err) => Entry::Corrupt(err.to_string()),
        }
    } else if Pid::parse(key).is_err() {
        Entry::Foreign
    } else {
        match Record::from_bytes(&bytes) {
            Ok(record) => Entry::Record(record),
            Err(err) => Entry::Corrupt(err.to_string()),
        }
    };
    Ok(Some((size, entry)))
}

fn describe(entry: &Entry) -> String {
    match entry {
        Entry::Root(pid) => format!("-> {}", pid.short()),
        Entry::Record(record) => record.type_name().to_string(),
        Entry::Corrupt(_) => "corrupt".into(),
        Entry::Foreign => "?".into(),
    }
}

async fn cmd_ls(store: &dyn KvStore, config: &TroveConfig, args: LsArgs) -> anyhow::Result<()> {
    let keys = store.all_keys().await?;
    if keys.is_empty() {
        println!("Store is empty.");
        return Ok(());
    }
    for key in &keys {
        let label = if *key == config.pool.root_key {
            key.cyan().bold()
        } else {
            key.yellow()
        };
        if !args.long {
            println!("{label}");
            continue;
        }
        match read_entry(store, config, key).await? {
            Some((size, entry @ Entry::Corrupt(_))) => {
                println!("{label}  {:>8}  {}", size, describe(&entry).red())
            }
            Some((size, entry)) => println!("{label}  {:>8}  {}", size, describe(&entry).dimmed()),
            None => {}
        }
    }
    Ok(())
}

async fn cmd_show(store: &dyn KvStore, config: &TroveConfig, args: ShowArgs) -> anyhow::Result<()> {
    let Some(bytes) = store.get(&args.key).await? else {
        anyhow::bail!("no such key: {}", args.key);
    };
    let digest = blake3::hash(&bytes);
    println!("{} {}", "Key:".bold(), args.key.yellow());
    println!("  Size: {} bytes", bytes.len());
    println!("  BLAKE3: {}", hex::encode(&digest.as_bytes()[..8]).dimmed());

    match read_entry(store, config, &args.key).await? {
        Some((_, Entry::Root(pid))) => println!("  Root: {}", pid.to_string().cyan()),
        Some((_, Entry::Record(record))) => {
            println!("  Type: {}", record.type_name().green());
            let pointers = record.pointers();
            if !pointers.is_empty() {
                println!("  Points to:");
                for pid in pointers {
                    println!("    {}", pid.to_string().cyan());
                }
            }
            println!("{}", serde_json::to_string_pretty(&record.to_json())?);
        }
        Some((_, Entry::Corrupt(reason))) => println!("  {} {}", "corrupt:".red().bold(), reason),
        Some((_, Entry::Foreign)) => println!("  {}", "not a pid key; contents not interpreted".dimmed()),
        None => {}
    }
    Ok(())
}

async fn cmd_stats(store: &dyn KvStore, config: &TroveConfig) -> anyhow::Result<()> {
    let keys = store.all_keys().await?;
    let mut total_bytes = 0usize;
    let mut root = None;
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut corrupt = 0usize;

    for key in &keys {
        let Some((size, entry)) = read_entry(store, config, key).await? else {
            continue;
        };
        total_bytes += size;
        match entry {
            Entry::Root(pid) => root = Some(pid),
            Entry::Record(record) => *by_type.entry(record.type_name().to_string()).or_default() += 1,
            Entry::Corrupt(_) => corrupt += 1,
            Entry::Foreign => *by_type.entry("(foreign)".into()).or_default() += 1,
        }
    }

    println!("Keys: {}", keys.len().to_string().bold());
    println!("Payload: {} bytes", total_bytes);
    match root {
        Some(pid) => println!("Root: {}", pid.to_string().cyan()),
        None => println!("Root: {}", "none".dimmed()),
    }
    for (type_name, count) in &by_type {
        println!("  {:<24} {}", type_name.green(), count);
    }
    if corrupt > 0 {
        println!("  {:<24} {}", "corrupt".red(), corrupt);
    }
    Ok(())
}

/// Findings of a consistency check.
#[derive(Debug, Default)]
pub(crate) struct FsckSummary {
    pub records: usize,
    pub root: Option<Pid>,
    /// Keys that could not be read, with the reason.
    pub corrupt: Vec<(String, String)>,
    /// `(key, pid)` pairs where the record at `key` points at a missing pid.
    pub dangling: Vec<(String, Pid)>,
    /// Records a collection would delete. Only computed when nothing is
    /// corrupt and a root exists.
    pub unreachable: Option<Vec<Pid>>,
}

impl FsckSummary {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
            && self.dangling.is_empty()
            && (self.root.is_some() || self.records == 0)
    }
}

pub(crate) async fn fsck(
    store: Arc<dyn KvStore>,
    config: &TroveConfig,
) -> anyhow::Result<FsckSummary> {
    let keys = store.all_keys().await?;
    let present: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
    let mut summary = FsckSummary::default();

    for key in &keys {
        let Some((_, entry)) = read_entry(store.as_ref(), config, key).await? else {
            continue;
        };
        let targets = match entry {
            Entry::Root(pid) => {
                summary.root = Some(pid.clone());
                vec![pid]
            }
            Entry::Record(record) => {
                summary.records += 1;
                record.pointers()
            }
            Entry::Corrupt(reason) => {
                summary.corrupt.push((key.clone(), reason));
                continue;
            }
            Entry::Foreign => continue,
        };
        for pid in targets {
            if !present.contains(pid.as_str()) {
                summary.dangling.push((key.clone(), pid));
            }
        }
    }

    if summary.corrupt.is_empty() && summary.root.is_some() {
        let pool = ObjectPool::builder(Arc::clone(&store))
            .config(config.pool.clone())
            .build()?;
        summary.unreachable = Some(pool.collect_dry_run().await?.deleted);
    }
    Ok(summary)
}

async fn cmd_fsck(store: Arc<dyn KvStore>, config: &TroveConfig) -> anyhow::Result<()> {
    let summary = fsck(store, config).await?;

    println!("Checked {} records.", summary.records.to_string().bold());
    if summary.root.is_none() && summary.records > 0 {
        println!("{} root key '{}' is missing", "✗".red().bold(), config.pool.root_key);
    }
    for (key, reason) in &summary.corrupt {
        println!("{} {} corrupt: {}", "✗".red().bold(), key.yellow(), reason);
    }
    for (key, pid) in &summary.dangling {
        println!(
            "{} {} points to missing {}",
            "✗".red().bold(),
            key.yellow(),
            pid.to_string().cyan()
        );
    }
    match &summary.unreachable {
        Some(pids) if !pids.is_empty() => println!(
            "{} {} unreachable records (run {} to delete)",
            "!".yellow().bold(),
            pids.len(),
            "trove gc".bold()
        ),
        Some(_) => {}
        None => println!("{}", "Skipped reachability check.".dimmed()),
    }

    if summary.is_clean() {
        println!("{} No issues.", "✓".green().bold());
        Ok(())
    } else {
        anyhow::bail!("store has integrity problems")
    }
}

async fn cmd_gc(store: Arc<dyn KvStore>, config: &TroveConfig, args: GcArgs) -> anyhow::Result<()> {
    let pool = ObjectPool::builder(store)
        .config(config.pool.clone())
        .build()?;
    let report = if args.dry_run {
        pool.collect_dry_run().await?
    } else {
        pool.collect().await?
    };

    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    for pid in &report.deleted {
        println!("  {} {}", verb.dimmed(), pid.to_string().yellow());
    }
    for (pid, err) in &report.failed {
        println!("  {} {}: {}", "failed".red(), pid.to_string().yellow(), err);
    }
    println!(
        "{} GC: {} scanned, {} reachable, {} {}.",
        "✓".green().bold(),
        report.scanned,
        report.reachable,
        report.deleted.len(),
        if report.dry_run { "unreachable" } else { "removed" }
    );
    if !report.failed.is_empty() {
        anyhow::bail!("{} deletes failed", report.failed.len());
    }
    Ok(())
}
