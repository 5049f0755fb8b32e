//! gradevault command line
//!
//! Usage:
//!   gradevault demo            run a local ledger + dev oracle session and print every view
//!                              (requires dev mode)
//!   gradevault keygen [file]   write a fresh identity seed (default: identity.key)
//!   gradevault config          print a sample configuration file

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use gradevault_config::{ORACLE, VaultConfig, global_config};
use gradevault_core::{
    DevOracle, Encryptor, GradeVault, Ledger, MemoryLedger, RecordCard, RevealOutcome,
    VaultSettings, VaultView,
};
use gradevault_sealed::{Identity, Score};
use log::{info, warn};
use tokio::task::JoinSet;

const DEFAULT_KEY_FILE: &str = "identity.key";

/// Grades the caller submits during the demo
const DEMO_GRADES: &[(&str, u8)] = &[("Mathematics", 80), ("Physics", 90), ("Literature", 100)];

/// A classmate's grade the caller may not reveal
const CLASSMATE_GRADE: (&str, u8) = ("Chemistry", 60);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("demo") => run_demo().await,
        Some("keygen") => keygen(args.get(2).map(String::as_str).unwrap_or(DEFAULT_KEY_FILE)),
        Some("config") => {
            print!("{}", VaultConfig::generate_sample());
            Ok(())
        }
        Some("--help") | Some("-h") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("gradevault - sealed grade records");
    println!();
    println!("Usage:");
    println!("  gradevault demo            Run a local session and print each published view (dev mode)");
    println!("  gradevault keygen [file]   Write a fresh identity seed (default: {})", DEFAULT_KEY_FILE);
    println!("  gradevault config          Print a sample config file");
    println!();
    println!("Config is read from $GV_CONFIG, ./gradevault.toml or ~/.gradevault/config.toml.");
    println!("Set GV_DEV_MODE=1 to enable the demo, RUST_LOG=info for progress logs.");
}

fn keygen(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        return Err(anyhow!("{} already exists, refusing to overwrite", path));
    }

    let identity = Identity::generate();
    fs::write(path, identity.seed_hex())
        .with_context(|| format!("Failed to write identity to {}", path))?;

    println!("Identity written to {}", path);
    println!("  Owner: {}", identity.owner_id());
    Ok(())
}

fn load_identity(config: &VaultConfig) -> Result<Identity> {
    match &config.identity.key_path {
        Some(path) => {
            let encoded = fs::read_to_string(path)
                .with_context(|| format!("Failed to read identity from {}", path))?;
            Identity::from_hex(encoded.trim())
                .with_context(|| format!("Invalid identity seed in {}", path))
        }
        None => {
            info!("No identity configured, using an ephemeral one");
            Ok(Identity::generate())
        }
    }
}

fn print_view(view: &VaultView) {
    match serde_json::to_string_pretty(view) {
        Ok(json) => println!("--- view @ revision {} ---\n{}", view.revision, json),
        Err(e) => warn!("Failed to render view {}: {}", view.revision, e),
    }
}

async fn run_demo() -> Result<()> {
    let config = global_config();
    config.require_dev_mode("gradevault demo")?;
    let identity = load_identity(config)?;
    let classmate = Identity::generate();

    let ledger = Arc::new(MemoryLedger::new());
    let oracle = Arc::new(DevOracle::new());
    oracle.set_latency(ORACLE.dev_latency);

    let vault = Arc::new(GradeVault::new(
        ledger.clone(),
        oracle.clone(),
        identity,
        VaultSettings::from(config),
    ));
    println!("Caller: {}", vault.owner());

    let mut views = vault.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let view = views.borrow_and_update().clone();
            print_view(&view);
            if views.changed().await.is_err() {
                break;
            }
        }
    });

    // Seed the ledger
    let (subject, score) = CLASSMATE_GRADE;
    let handle = oracle
        .encrypt(classmate.owner_id(), Score::new(score)?)
        .await?;
    ledger
        .submit_record(classmate.owner_id(), subject.to_string(), handle)
        .await?;

    for (subject, score) in DEMO_GRADES {
        vault.submit_grade(oracle.as_ref(), subject, *score).await?;
    }
    vault.refresh().await?;

    // Reveal everything in view concurrently; the classmate's record is refused
    let mut reveals = JoinSet::new();
    for card in vault.snapshot().records.iter().filter_map(RecordCard::as_ready) {
        let vault = vault.clone();
        let id = card.id;
        reveals.spawn(async move { (id, vault.request_decrypt(id).await) });
    }

    while let Some(joined) = reveals.join_next().await {
        let (id, outcome) = joined?;
        match outcome? {
            RevealOutcome::Decrypted { .. } => info!("Record {} revealed", id),
            RevealOutcome::Failed { error } => warn!("Record {} not revealed: {}", id, error),
            RevealOutcome::Pending { attempt } => info!("Record {} still pending ({})", id, attempt),
        }
    }

    let last = vault.snapshot();
    println!(
        "Student average: {:?}, global average: {:?} ({} of {} decrypted), {} oracle calls",
        last.aggregate.student_average,
        last.aggregate.global_average,
        last.aggregate.decrypted_count,
        last.aggregate.total_count,
        oracle.reveal_count()
    );

    drop(vault);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("View printer did not stop");
    }
    Ok(())
}
