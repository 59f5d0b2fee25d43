use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use attachkeep::{markup, AttachmentStore, CleanupReport, Config, Tree};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

/// attachkeep - content-addressed image attachments for markdown notes
#[derive(Parser)]
#[command(name = "attachkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (.toml, .yml, .yaml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Notes tree root
    #[arg(long, global = true)]
    notes_dir: Option<PathBuf>,

    /// Journal tree root
    #[arg(long, global = true)]
    journal_dir: Option<PathBuf>,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output on stderr (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete unreferenced attachments and fold duplicates into one file
    Clean {
        /// Show what would be deleted without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store an image and print the markup to embed it
    Insert {
        /// Image file, or - to read from stdin
        file: PathBuf,

        /// Base name for the stored file
        #[arg(short, long, default_value = "image")]
        name: String,

        /// Store in the journal tree instead of the notes tree
        #[arg(long)]
        journal: bool,

        /// Document the image will be embedded in (for the relative path)
        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List attachment references found in documents
    Refs {
        /// Only show references whose target is missing
        #[arg(long)]
        broken: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_store(&cli).and_then(|store| run(&store, &cli));

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(store: &AttachmentStore, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Clean { dry_run, json } => cmd_clean(store, *dry_run, *json, cli.quiet),
        Commands::Insert { file, name, journal, document, json } => {
            cmd_insert(store, file, name, *journal, document.as_deref(), *json)
        }
        Commands::Refs { broken, json } => cmd_refs(store, *broken, *json),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_store(cli: &Cli) -> Result<AttachmentStore, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::load(Some(path.as_path()), true)?,
        None => {
            let default_path = Config::default().data_dir.join("attachkeep.toml");
            Config::load(Some(default_path.as_path()), false)?
        }
    };

    // CLI flags win over file and environment
    if let Some(dir) = &cli.notes_dir {
        config.notes_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.journal_dir {
        config.journal_dir = Some(dir.clone());
    }

    Ok(AttachmentStore::new(config)?)
}

fn cmd_clean(
    store: &AttachmentStore,
    dry_run: bool,
    json: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    if dry_run {
        let plan = store.plan_cleanup()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        if plan.orphans.is_empty() && plan.duplicates.is_empty() {
            println!("{}", "Nothing to clean.".green());
            return Ok(());
        }

        println!("{} unreferenced attachments", plan.orphans.len().to_string().yellow().bold());
        for path in &plan.orphans {
            println!("  {} {}", "-".red(), path.display());
        }
        println!();
        println!("{} duplicate attachments", plan.duplicates.len().to_string().yellow().bold());
        for pair in &plan.duplicates {
            println!(
                "  {} {} {} {}",
                "-".red(),
                pair.duplicate.display(),
                "->".dimmed(),
                pair.canonical.display().to_string().cyan()
            );
        }
        print_skipped(&plan.skipped.iter().map(|s| (&s.path, &s.reason)).collect::<Vec<_>>());
        return Ok(());
    }

    if !quiet && !json {
        println!("{} attachments", "Cleaning".cyan().bold());
    }

    let report = store.run_cleanup()?;
    let elapsed = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report, quiet);
    if !quiet {
        println!("  Time elapsed:          {:.2?}", elapsed);
    }

    Ok(())
}

fn print_report(report: &CleanupReport, quiet: bool) {
    let stats = &report.stats;

    if stats.is_empty() {
        println!("{}", "Nothing to clean.".green());
    } else {
        println!();
        println!("{}", "Cleanup Summary".green().bold());
        println!("  Unused deleted:        {}", stats.unused_deleted.to_string().cyan());
        println!("  Duplicates deleted:    {}", stats.duplicates_deleted.to_string().cyan());
        println!("  References updated:    {}", stats.references_updated.to_string().cyan());
        println!("  Space freed:           {}", format_bytes(stats.bytes_freed).cyan());
    }

    if !quiet {
        print_skipped(
            &report
                .skipped
                .iter()
                .map(|s| (&s.path, &s.reason))
                .collect::<Vec<_>>(),
        );
    }
}

fn print_skipped(skipped: &[(&PathBuf, &String)]) {
    if skipped.is_empty() {
        return;
    }
    println!();
    println!("{} ({} files)", "Skipped".yellow().bold(), skipped.len());
    for (path, reason) in skipped.iter().take(20) {
        println!("  {} {}: {}", "!".yellow(), path.display(), reason.dimmed());
    }
    if skipped.len() > 20 {
        println!("  {}", format!("... and {} more", skipped.len() - 20).dimmed());
    }
}

fn cmd_insert(
    store: &AttachmentStore,
    file: &Path,
    name: &str,
    journal: bool,
    document: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = if file == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        fs::read(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))?
    };

    let tree = if journal { Tree::Journal } else { Tree::Notes };

    let Some(filename) = store.insert_attachment(tree, &bytes, name)? else {
        println!("{}", "No image data to insert.".yellow());
        return Ok(());
    };

    // Without a document, assume it sits at the tree root
    let document = document
        .map(attachkeep::paths::absolutize)
        .unwrap_or_else(|| store.tree_root(tree).join("document.md"));
    let embed = store.embed_path(tree, &document, &filename);
    let snippet = markup(name, &embed);

    if json {
        let output = serde_json::json!({
            "filename": filename,
            "path": embed,
            "markup": snippet,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", snippet);
    }

    Ok(())
}

fn cmd_refs(
    store: &AttachmentStore,
    broken: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let scan = store.scan_references()?;
    let references: Vec<_> = if broken {
        scan.dangling()
    } else {
        scan.references().collect()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&references)?);
        return Ok(());
    }

    if references.is_empty() {
        let msg = if broken { "No broken references." } else { "No attachment references found." };
        println!("{}", msg.green());
        return Ok(());
    }

    for reference in &references {
        let target = if reference.resolved.exists() {
            reference.raw_path.normal()
        } else {
            reference.raw_path.red()
        };
        println!(
            "{}:{} {}",
            reference.document.display().to_string().cyan(),
            reference.line.to_string().dimmed(),
            target
        );
    }

    println!();
    println!("{} references", references.len().to_string().green().bold());
    Ok(())
}

/// Human-readable byte count
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["attachkeep", "clean", "--dry-run", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Clean { dry_run: true, json: false }));

        let cli = Cli::try_parse_from([
            "attachkeep",
            "--notes-dir",
            "/tmp/notes",
            "insert",
            "shot.png",
            "--journal",
            "--name",
            "diagram",
        ])
        .unwrap();
        assert_eq!(cli.notes_dir, Some(PathBuf::from("/tmp/notes")));
        match cli.command {
            Commands::Insert { name, journal, .. } => {
                assert_eq!(name, "diagram");
                assert!(journal);
            }
            _ => panic!("expected insert"),
        }
    }
}
