use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tally_core::{dashboard_rows, write_csv, Config, DashboardRow, KnownFacesDir, Ledger, Recognizer};
use tally_vision::OnnxEngine;

mod daemon;

#[derive(Parser)]
#[command(name = "tally", version, about = "Tally face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add reference images for a person
    Enroll {
        /// Display name, e.g. "Ada Lovelace"
        name: String,
        /// One or more .jpg/.jpeg/.png files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Rename an enrolled person
    Rename { old: String, new: String },
    /// Remove every reference image of a person
    Remove { name: String },
    /// List enrolled people
    Faces,
    /// Recognise faces in images and log attendance, without the daemon
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Show today's attendance
    Today {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Export today's attendance
    Export {
        /// Write CSV instead of JSON
        #[arg(long)]
        csv: bool,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Send an image to the daemon for recognition
    Submit { image: PathBuf },
    /// Ask the daemon to reload the known-faces directory
    Reload,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let faces = KnownFacesDir::new(&config.known_faces_dir);

    match cli.command {
        Commands::Enroll { name, images } => {
            let written = faces.enroll(&name, &images)?;
            println!("Enrolled {} image(s) for {name}", written.len());
            for path in written {
                println!("  {}", path.display());
            }
            println!("Run `tally reload` if tallyd is running.");
        }
        Commands::Rename { old, new } => {
            let n = faces.rename(&old, &new)?;
            println!("Renamed {n} image(s): {old} -> {new}");
        }
        Commands::Remove { name } => {
            let n = faces.remove(&name)?;
            println!("Removed {n} image(s) for {name}");
        }
        Commands::Faces => {
            let people = faces.list()?;
            if people.is_empty() {
                println!("No faces enrolled in {}", faces.path().display());
            }
            for (name, files) in people {
                println!("{name} ({} image(s))", files.len());
            }
        }
        Commands::Scan { images } => scan(&config, &images)?,
        Commands::Today { json } => {
            let rows = todays_rows(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_table(&rows, &mut std::io::stdout().lock())?;
            }
        }
        Commands::Export { csv, output } => {
            let rows = todays_rows(&config);
            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout().lock()),
            };
            if csv {
                write_csv(&rows, &mut out)?;
            } else {
                serde_json::to_writer_pretty(&mut out, &rows)?;
                writeln!(out)?;
            }
            if let Some(path) = output {
                eprintln!("Wrote {} row(s) to {}", rows.len(), path.display());
            }
        }
        Commands::Status => {
            let proxy = daemon::connect().await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Submit { image } => {
            let path = image
                .canonicalize()
                .with_context(|| format!("{} not found", image.display()))?;
            let proxy = daemon::connect().await?;
            let report: serde_json::Value =
                serde_json::from_str(&proxy.record_image(&path.to_string_lossy()).await?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reload => {
            let proxy = daemon::connect().await?;
            let n = proxy.reload_known_faces().await?;
            println!("tallyd loaded {n} known face(s)");
        }
    }

    Ok(())
}

/// Run the full pipeline locally over each image.
fn scan(config: &Config, images: &[PathBuf]) -> Result<()> {
    config.ensure_dirs().context("creating data directories")?;
    let engine = OnnxEngine::from_config(config)
        .map_err(|e| anyhow::anyhow!("loading face models from {}: {e}", config.model_dir.display()))?;
    let ledger = Arc::new(Ledger::new(config));
    let mut recognizer = Recognizer::new(engine, ledger, config);
    let known = recognizer.reload_known_faces();
    tracing::info!(known, "known faces loaded");

    let mut failures = 0usize;
    for path in images {
        match recognizer.process_image(path) {
            Ok(report) => {
                println!("{}: {} face(s), {} logged", path.display(), report.faces.len(), report.logged());
                for face in &report.faces {
                    let mark = if face.logged { "+" } else { " " };
                    match &face.error {
                        Some(err) => println!("  ! {} {}: {err}", face.name, face.location),
                        None => println!("  {mark} {} {}", face.name, face.location),
                    }
                }
            }
            Err(err) => {
                failures += 1;
                eprintln!("{}: {err}", path.display());
            }
        }
    }
    if failures == images.len() {
        bail!("no image could be processed");
    }
    Ok(())
}

fn todays_rows(config: &Config) -> Vec<DashboardRow> {
    let ledger = Ledger::new(config);
    dashboard_rows(ledger.records(), ledger.now(), |p| p.exists())
}

fn print_table(rows: &[DashboardRow], out: &mut impl Write) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No attendance recorded today.");
    }
    let width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0).max(4);
    writeln!(out, "{:>3}  {:<width$}  {:<8}  {}", "#", "Name", "Arrival", "Status")?;
    for row in rows {
        writeln!(
            out,
            "{:>3}  {:<width$}  {:<8}  {}",
            row.index, row.name, row.time_arrival, row.status
        )?;
    }
    Ok(())
}
