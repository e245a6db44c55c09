mod clusterer;
mod config;
mod db;
mod embedding;
mod error;
mod indexer;
mod logging;
mod pipeline;
mod recognizer;
mod scanner;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use clusterer::Clusterer;
use config::Config;
use db::{Database, ScanStatus};
use error::CatalogError;
use pipeline::{ClusterMode, PipelineEvent};
use recognizer::{OnnxFaceRecognizer, StdImageDecoder};

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut command = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facetrove {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => command.push(other.to_string()),
        }
        i += 1;
    }

    CliArgs {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"facetrove - organize a photo library by the people in it

USAGE:
    facetrove [OPTIONS] <COMMAND>

COMMANDS:
    scan <dir> [--full]      Scan a directory, index faces and cluster them.
                             --full rebuilds all clusters instead of updating
    recluster                Rebuild every cluster from scratch
    stats                    Show per-cluster statistics
    suggest                  List cluster pairs that may be the same person
    persons                  List identified persons
    name <cluster> <name>    Identify a cluster as a (new or existing) person
    unname <cluster>         Remove a cluster's identification
    merge <a> <b>            Merge cluster b into cluster a

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACETROVE_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facetrove/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(&Config::config_dir().join("logs"));

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)?;
    db.initialize()?;

    let command: Vec<&str> = args.command.iter().map(String::as_str).collect();
    match command.as_slice() {
        ["scan", rest @ ..] => cmd_scan(config, db, rest),
        ["recluster"] => cmd_recluster(&config, &db),
        ["stats"] => cmd_stats(&config, &db),
        ["suggest"] => cmd_suggest(&config, &db),
        ["persons"] => cmd_persons(&db),
        ["name", cluster, name @ ..] if !name.is_empty() => {
            cmd_name(&config, &db, cluster, &name.join(" "))
        }
        ["unname", cluster] => cmd_unname(&config, &db, cluster),
        ["merge", a, b] => cmd_merge(&config, &db, a, b),
        [] => {
            print_help();
            std::process::exit(1);
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_help();
            std::process::exit(1);
        }
    }
}

fn cmd_scan(config: Config, db: Database, rest: &[&str]) -> Result<()> {
    let mut root = None;
    let mut mode = ClusterMode::Incremental;
    for arg in rest {
        match *arg {
            "--full" => mode = ClusterMode::Full,
            other if root.is_none() => root = Some(PathBuf::from(other)),
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }
    let root = root.ok_or_else(|| anyhow::anyhow!("scan requires a directory"))?;

    println!("Loading face models...");
    let recognizer = OnnxFaceRecognizer::load(&config.models.dir)
        .map_err(|e| anyhow::anyhow!("failed to load face models ({}): {e}", e.kind()))?;
    let decoder = StdImageDecoder;

    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || print_events(rx));

    let cancel = Arc::new(AtomicBool::new(false));
    let result = pipeline::run(db, &recognizer, &decoder, &root, &config, mode, tx, cancel);
    let _ = printer.join();

    match result {
        Ok(outcome) => {
            match outcome.status {
                ScanStatus::Cancelled => println!("Scan cancelled; committed batches were kept."),
                _ => println!(
                    "Done: {} files, {} new photos, {} faces, {} skipped, {} failed.",
                    outcome.files_found,
                    outcome.index.processed,
                    outcome.index.faces_found,
                    outcome.index.skipped,
                    outcome.index.failed,
                ),
            }
            Ok(())
        }
        Err(e) => Err(diagnostic(e, Some(&root))),
    }
}

fn print_events(rx: mpsc::Receiver<PipelineEvent>) {
    for event in rx {
        match event {
            PipelineEvent::ScanStarted { root } => {
                println!("Scanning {}...", root.display());
            }
            PipelineEvent::FileFound { .. } => {}
            PipelineEvent::ScanError { path, message } => {
                eprintln!("  warning: {}: {message}", path.display());
            }
            PipelineEvent::ScanFinished { total } => {
                println!("Found {total} image files.");
            }
            PipelineEvent::IndexProgress {
                current,
                total,
                path,
                faces_found,
            } => {
                if current % 25 == 0 || current == total {
                    println!(
                        "  [{current}/{total}] {} ({faces_found} faces so far)",
                        path.display()
                    );
                }
            }
            PipelineEvent::ClusterProgress { done, total } => {
                if done % 25 == 0 || done == total {
                    println!("  clustering {done}/{total}");
                }
            }
            PipelineEvent::Finished { .. } => {}
        }
    }
}

fn cmd_recluster(config: &Config, db: &Database) -> Result<()> {
    let clusterer = make_clusterer(config, db);
    let count = clusterer
        .cluster_all(None)
        .map_err(|e| diagnostic(e, None))?;
    println!("Rebuilt {count} clusters.");
    Ok(())
}

fn cmd_stats(config: &Config, db: &Database) -> Result<()> {
    if let Some(scan) = db.latest_scan().map_err(|e| diagnostic(e, None))? {
        println!(
            "Last scan: {} ({}, {}/{} files, {} faces)",
            scan.root_path,
            scan.status.as_str(),
            scan.processed_files,
            scan.total_files,
            scan.total_faces,
        );
    }
    let clusterer = make_clusterer(config, db);
    let stats = clusterer.stats().map_err(|e| diagnostic(e, None))?;
    if stats.is_empty() {
        println!("No clusters yet. Run `facetrove scan <dir>` first.");
        return Ok(());
    }
    println!("{:<8} {:<20} {:>6} {:>7}  representative", "cluster", "person", "faces", "photos");
    for s in stats {
        println!(
            "{:<8} {:<20} {:>6} {:>7}  {}",
            s.cluster_id,
            s.person_name.as_deref().unwrap_or("-"),
            s.face_count,
            s.photo_count,
            s.representative_face_id
                .map(|id| format!("face_{id}.jpg"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn cmd_suggest(config: &Config, db: &Database) -> Result<()> {
    let clusterer = make_clusterer(config, db);
    let pairs = clusterer
        .merge_suggestions(config.clusterer.merge_suggestion_threshold)
        .map_err(|e| diagnostic(e, None))?;
    if pairs.is_empty() {
        println!("No merge suggestions.");
        return Ok(());
    }
    for (a, b) in pairs {
        println!("clusters {a} and {b} may be the same person (merge with `facetrove merge {a} {b}`)");
    }
    Ok(())
}

fn cmd_persons(db: &Database) -> Result<()> {
    let persons = db.all_persons().map_err(|e| diagnostic(e, None))?;
    if persons.is_empty() {
        println!("No persons identified yet.");
        return Ok(());
    }
    for person in persons {
        let faces = db
            .faces_for_person(person.id)
            .map_err(|e| diagnostic(e, None))?;
        println!("{:<6} {} ({} faces)", person.id, person.name, faces.len());
    }
    Ok(())
}

fn cmd_name(config: &Config, db: &Database, cluster: &str, name: &str) -> Result<()> {
    let cluster_id = parse_id(cluster, "cluster")?;
    let person_id = match db.find_person_by_name(name).map_err(|e| diagnostic(e, None))? {
        Some(person) => person.id,
        None => db
            .create_person(name, None)
            .map_err(|e| diagnostic(e, None))?,
    };
    make_clusterer(config, db)
        .assign_person(cluster_id, person_id)
        .map_err(|e| diagnostic(e, None))?;
    println!("Cluster {cluster_id} identified as {name}.");
    Ok(())
}

fn cmd_unname(config: &Config, db: &Database, cluster: &str) -> Result<()> {
    let cluster_id = parse_id(cluster, "cluster")?;
    make_clusterer(config, db)
        .unassign_person(cluster_id)
        .map_err(|e| diagnostic(e, None))?;
    println!("Cluster {cluster_id} is no longer identified.");
    Ok(())
}

fn cmd_merge(config: &Config, db: &Database, a: &str, b: &str) -> Result<()> {
    let a = parse_id(a, "cluster")?;
    let b = parse_id(b, "cluster")?;
    let merged = make_clusterer(config, db)
        .merge(a, b)
        .map_err(|e| diagnostic(e, None))?;
    println!("Merged cluster {b} into {merged}.");
    Ok(())
}

fn make_clusterer<'a>(config: &Config, db: &'a Database) -> Clusterer<'a> {
    Clusterer::new(
        db,
        config.clusterer.distance_threshold,
        config.clusterer.min_cluster_size,
    )
}

fn parse_id(text: &str, what: &str) -> Result<i64> {
    text.parse::<i64>()
        .map_err(|_| anyhow::anyhow!("invalid {what} id: {text}"))
}

/// Format a store error the way users see it: kind plus failed path, if any.
fn diagnostic(err: CatalogError, path: Option<&std::path::Path>) -> anyhow::Error {
    match path {
        Some(path) => anyhow::anyhow!("{} ({}): {err}", path.display(), err.kind()),
        None => anyhow::anyhow!("({}) {err}", err.kind()),
    }
}
