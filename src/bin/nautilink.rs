//! Nautilink CLI — crate lineage ledger
//!
//! Commands:
//!   nautilink create        — register a freshly landed crate
//!   nautilink mix           — combine crates into one
//!   nautilink split         — divide a crate among new siblings
//!   nautilink transfer      — hand a crate to a new custodian
//!   nautilink link-parent   — back-fill a parent link
//!   nautilink link-children — back-fill child links
//!   nautilink show          — print one record
//!   nautilink trace         — ancestor composition of a crate
//!   nautilink history       — origin-to-crate path
//!   nautilink graph         — whole supply chain as JSON
//!   nautilink verify        — re-check the seals of a lineage
//!   nautilink backup        — take, list, restore, verify or prune snapshots
//!   nautilink demo          — mix-then-split walkthrough in memory

use chrono::Utc;
use nautilink_core::lineage::{trace_composition, verify_lineage, SupplyChainGraph};
use nautilink_core::storage::snapshot::SnapshotVault;
use nautilink_core::{
    Address, Authority, CrateDetails, CreateRequest, FileStore, LedgerConfig, LedgerError,
    MemoryStore, MixRequest, RecordStore, Result, SplitRequest, TransferRequest, TransitionEngine,
};
use std::env;

fn print_usage() {
    println!(
        r#"
Nautilink v0.1 — crate lineage & mass-conservation ledger

Usage: nautilink <command> [options]

Commands:
  create   <crate_id> <grams> <hash> <artifact_ref> [address]      Register a landed crate
  mix      <crate_id> <hash> <artifact_ref> <parent> <parent> ...   Mix two or more crates
  split    <parent> <crate_id> <hash> <artifact_ref> <g1,g2,...>    Split a crate into siblings
  transfer <parent> <grams> <crate_id> <hash> <artifact_ref>        Hand a crate to a new custodian
  link-parent   <child> <parent>                                    Back-fill a parent link
  link-children <parent> <child> [child...]                         Back-fill child links
  show     <address>                                                Print a record
  trace    <address> [max_depth]                                    Ancestor composition
  history  <address>                                                Path from origin crate
  graph                                                             Supply chain graph (JSON)
  verify   <address>                                                Verify lineage seals
  backup   [create [note]|list|restore [ver]|verify|prune <keep>]   Snapshot management
  demo                                                              Run an in-memory walkthrough

Environment:
  NAUTILINK_STORE, NAUTILINK_BACKUP_DIR, NAUTILINK_AUTHORITY,
  NAUTILINK_MAX_TRACE_DEPTH, NAUTILINK_CONFIG, RUST_LOG
"#
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("  {}", e);
            std::process::exit(2);
        }
    };

    let rest = &args[2..];
    let result = match args[1].as_str() {
        "create" => cmd_create(&config, rest),
        "mix" => cmd_mix(&config, rest),
        "split" => cmd_split(&config, rest),
        "transfer" => cmd_transfer(&config, rest),
        "link-parent" => cmd_link_parent(&config, rest),
        "link-children" => cmd_link_children(&config, rest),
        "show" => cmd_show(&config, rest),
        "trace" => cmd_trace(&config, rest),
        "history" => cmd_history(&config, rest),
        "graph" => cmd_graph(&config),
        "verify" => cmd_verify(&config, rest),
        "backup" => cmd_backup(&config, rest),
        "demo" => cmd_demo(),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("  Error: {}", e);
        std::process::exit(1);
    }
}

fn open_engine(config: &LedgerConfig) -> Result<TransitionEngine<FileStore>> {
    let store = FileStore::open(&config.store_path, &config.authority)?;
    println!("  Ledger {} ({} records)", config.store_path.display(), store.len());
    Ok(TransitionEngine::with_config(store, config))
}

fn caller(config: &LedgerConfig) -> Authority {
    Authority::new(config.authority.clone())
}

fn usage_error(usage: &str) -> LedgerError {
    LedgerError::Config(format!("usage: nautilink {}", usage))
}

fn parse_grams(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| LedgerError::InvalidWeight(format!("'{}' is not a whole number of grams", value)))
}

fn details(crate_id: &str, hash: &str, artifact_ref: &str) -> CrateDetails {
    CrateDetails::new(crate_id, Utc::now(), hash, artifact_ref)
}

fn cmd_create(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 4 {
        return Err(usage_error("create <crate_id> <grams> <hash> <artifact_ref> [address]"));
    }
    let weight = parse_grams(&args[1])?;
    let address = args.get(4).map(|a| Address::new(a.as_str())).unwrap_or_else(Address::generate);
    let engine = open_engine(config)?;
    let record = engine.create(CreateRequest::new(
        address,
        caller(config),
        details(&args[0], &args[2], &args[3]),
        weight,
    ))?;
    println!("  {}", record.summary());
    Ok(())
}

fn cmd_mix(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 5 {
        return Err(usage_error("mix <crate_id> <hash> <artifact_ref> <parent> <parent> [parents...]"));
    }
    let parents: Vec<Address> = args[3..].iter().map(|a| Address::new(a.as_str())).collect();
    let engine = open_engine(config)?;
    let record = engine.mix(MixRequest::new(
        Address::generate(),
        caller(config),
        details(&args[0], &args[1], &args[2]),
        parents.clone(),
    ))?;
    println!("  {}", record.summary());
    link_back(&engine, config, &parents, record.address());
    Ok(())
}

fn cmd_split(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 5 {
        return Err(usage_error("split <parent> <crate_id> <hash> <artifact_ref> <g1,g2,...>"));
    }
    let parent = Address::new(args[0].as_str());
    let distribution = args[4]
        .split(',')
        .map(parse_grams)
        .collect::<Result<Vec<u64>>>()?;
    let siblings: Vec<Address> = distribution.iter().map(|_| Address::generate()).collect();

    let engine = open_engine(config)?;
    for (i, (sibling, grams)) in siblings.iter().zip(&distribution).enumerate() {
        let record = engine.split(SplitRequest {
            address: sibling.clone(),
            authority: caller(config),
            details: details(&format!("{}-{}", args[1], i + 1), &args[2], &args[3]),
            declared_weight: *grams,
            parent: parent.clone(),
            siblings: siblings.clone(),
            distribution: distribution.clone(),
        })?;
        println!("  {}", record.summary());
    }
    if let Err(e) = engine.update_parent_children(&parent, &siblings, &caller(config)) {
        println!("  Parent {} not linked yet: {}", parent, e);
    }
    Ok(())
}

fn cmd_transfer(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 5 {
        return Err(usage_error("transfer <parent> <grams> <crate_id> <hash> <artifact_ref>"));
    }
    let parent = Address::new(args[0].as_str());
    let weight = parse_grams(&args[1])?;
    let engine = open_engine(config)?;
    let record = engine.transfer(TransferRequest::new(
        Address::generate(),
        caller(config),
        details(&args[2], &args[3], &args[4]),
        weight,
        parent.clone(),
    ))?;
    println!("  {}", record.summary());
    link_back(&engine, config, std::slice::from_ref(&parent), record.address());
    Ok(())
}

/// Complete the parent -> child direction where the caller owns the parent
fn link_back<S: RecordStore>(
    engine: &TransitionEngine<S>,
    config: &LedgerConfig,
    parents: &[Address],
    child: &Address,
) {
    for parent in parents {
        match engine.update_parent_children(parent, std::slice::from_ref(child), &caller(config)) {
            Ok(_) => println!("  Linked {} -> {}", parent, child),
            Err(e) => println!("  Parent {} must link {} itself: {}", parent, child, e),
        }
    }
}

fn cmd_link_parent(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 2 {
        return Err(usage_error("link-parent <child> <parent>"));
    }
    let engine = open_engine(config)?;
    let record = engine.update_child_parent(
        &Address::new(args[0].as_str()),
        &Address::new(args[1].as_str()),
        &caller(config),
    )?;
    println!("  {}", record.summary());
    Ok(())
}

fn cmd_link_children(config: &LedgerConfig, args: &[String]) -> Result<()> {
    if args.len() < 2 {
        return Err(usage_error("link-children <parent> <child> [child...]"));
    }
    let children: Vec<Address> = args[1..].iter().map(|a| Address::new(a.as_str())).collect();
    let engine = open_engine(config)?;
    let record = engine.update_parent_children(&Address::new(args[0].as_str()), &children, &caller(config))?;
    println!("  {}", record.summary());
    Ok(())
}

fn cmd_show(config: &LedgerConfig, args: &[String]) -> Result<()> {
    let address = args.first().ok_or_else(|| usage_error("show <address>"))?;
    let engine = open_engine(config)?;
    let record = engine.store().get(&Address::new(address.as_str()))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_trace(config: &LedgerConfig, args: &[String]) -> Result<()> {
    let address = args.first().ok_or_else(|| usage_error("trace <address> [max_depth]"))?;
    let max_depth = match args.get(1) {
        Some(d) => d
            .parse()
            .map_err(|_| LedgerError::Config(format!("max_depth is not a number: {}", d)))?,
        None => config.max_trace_depth,
    };
    let engine = open_engine(config)?;
    let address = Address::new(address.as_str());
    let trace = trace_composition(engine.store(), &address, max_depth)?;
    println!("\n  Composition of {} ({} ancestors):", address, trace.len());
    for (ancestor, grams) in trace.iter() {
        let origin = trace
            .record(&ancestor)
            .map(|r| if r.is_root() { " (origin)" } else { "" })
            .unwrap_or("");
        println!("    {:<34} {:>12.1}g{}", ancestor, grams, origin);
    }
    Ok(())
}

fn cmd_history(config: &LedgerConfig, args: &[String]) -> Result<()> {
    let address = args.first().ok_or_else(|| usage_error("history <address>"))?;
    let engine = open_engine(config)?;
    let graph = SupplyChainGraph::build(engine.store())?;
    let history = graph.history(&Address::new(address.as_str()))?;
    println!("\n  History ({} generations):", history.len().saturating_sub(1));
    for (depth, record) in history.iter().enumerate() {
        println!("    [{}] {}", depth, record.summary());
    }
    Ok(())
}

fn cmd_graph(config: &LedgerConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let graph = SupplyChainGraph::build(engine.store())?;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

fn cmd_verify(config: &LedgerConfig, args: &[String]) -> Result<()> {
    let address = args.first().ok_or_else(|| usage_error("verify <address>"))?;
    let engine = open_engine(config)?;
    let verified = verify_lineage(engine.store(), &Address::new(address.as_str()), engine.max_depth())?;
    println!("  Lineage intact: {} seals verified", verified);
    Ok(())
}

fn cmd_backup(config: &LedgerConfig, args: &[String]) -> Result<()> {
    let sub = args.first().map(|s| s.as_str()).unwrap_or("list");
    let mut vault = SnapshotVault::open(&config.backup_dir)?;

    match sub {
        "create" => {
            let store = FileStore::open(&config.store_path, &config.authority)?;
            let note = args.get(1).map(|s| s.as_str()).unwrap_or("manual snapshot");
            let entry = vault.take(&store, note)?;
            println!(
                "  Snapshot v{} ({} records, {}g landed, seals {})",
                entry.version,
                entry.records,
                entry.landed_grams,
                &entry.seal_digest[..16]
            );
        }
        "list" => {
            if vault.entries().is_empty() {
                println!("  No snapshots in {}", vault.dir().display());
            }
            for entry in vault.entries() {
                println!(
                    "  v{:<4} {}  {:>5} records  {:>10}g  {}",
                    entry.version,
                    entry.taken_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.records,
                    entry.landed_grams,
                    entry.note
                );
            }
        }
        "restore" => {
            let version = match args.get(1) {
                Some(v) => Some(
                    v.parse()
                        .map_err(|_| LedgerError::Snapshot(format!("bad version: {}", v)))?,
                ),
                None => None,
            };
            let store = vault.restore(version, &config.store_path)?;
            println!("  Restored {} records into {}", store.len(), config.store_path.display());
        }
        "verify" => {
            for (version, check) in vault.check_all() {
                match check {
                    Ok(()) => println!("  v{}: OK", version),
                    Err(e) => println!("  v{}: {}", version, e),
                }
            }
        }
        "prune" => {
            let keep = args
                .get(1)
                .and_then(|k| k.parse().ok())
                .ok_or_else(|| usage_error("backup prune <keep>"))?;
            println!("  Removed {} snapshots", vault.prune(keep)?);
        }
        other => {
            return Err(usage_error(&format!(
                "backup [create|list|restore|verify|prune], got '{}'",
                other
            )))
        }
    }
    Ok(())
}

fn cmd_demo() -> Result<()> {
    println!("\n  Mix-then-split walkthrough (in memory)\n");
    let engine = TransitionEngine::new(MemoryStore::new());
    let fisher = Authority::new("fisher");
    let processor = Authority::new("processor");

    let a = engine.create(CreateRequest::new(
        Address::new("A"),
        fisher.clone(),
        details("CATCH_A", "sha256-a", "ipfs://a"),
        1000,
    ))?;
    let b = engine.create(CreateRequest::new(
        Address::new("B"),
        fisher.clone(),
        details("CATCH_B", "sha256-b", "ipfs://b"),
        1500,
    ))?;
    println!("  {}\n  {}", a.summary(), b.summary());

    let c = engine.mix(MixRequest::new(
        Address::new("C"),
        processor.clone(),
        details("BLEND_C", "sha256-c", "ipfs://c"),
        vec![a.address().clone(), b.address().clone()],
    ))?;
    println!("  {}  parent_weights={:?}", c.summary(), c.parent_weights());
    engine.update_parent_children(a.address(), std::slice::from_ref(c.address()), &fisher)?;
    engine.update_parent_children(b.address(), std::slice::from_ref(c.address()), &fisher)?;

    let siblings = vec![Address::new("D"), Address::new("E")];
    let distribution = vec![1000, 1500];
    for (sibling, grams) in siblings.iter().zip(&distribution) {
        let record = engine.split(SplitRequest {
            address: sibling.clone(),
            authority: processor.clone(),
            details: details(&format!("PORTION_{}", sibling), "sha256-s", "ipfs://s"),
            declared_weight: *grams,
            parent: c.address().clone(),
            siblings: siblings.clone(),
            distribution: distribution.clone(),
        })?;
        println!("  {}", record.summary());
    }
    engine.update_parent_children(c.address(), &siblings, &processor)?;

    for sibling in &siblings {
        let trace = trace_composition(engine.store(), sibling, engine.max_depth())?;
        let parts: Vec<String> = trace
            .roots()
            .map(|(origin, grams)| format!("{:.0}g from {}", grams, origin))
            .collect();
        println!("  {} = {}", sibling, parts.join(" + "));
    }
    println!("  Seals verified: {}", verify_lineage(engine.store(), &siblings[0], engine.max_depth())?);
    Ok(())
}
