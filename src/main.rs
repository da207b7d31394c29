//! woscite - Web of Science citation-record export pipeline
//!
//! Drives the Web of Science portal in a real browser to export the full
//! bibliographic record for each DOI in a list plus the records citing it,
//! and assembles everything into one CSV file.
//!
//! ## Usage
//!
//! ```bash
//! woscite export --infile data/dois.csv --outfile data/final.csv
//! ```
//!
//! A WoS entitlement (license or login) is required; see `woscite cookies fetch`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use woscite::table::RecordTable;
use woscite::wos::{Session, SessionOptions};

// ============================================================================
// CLI Definition
// ============================================================================

/// Web of Science DOI and citing-record export pipeline
#[derive(Parser)]
#[command(name = "woscite")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch records and citing records for a DOI list and write one CSV
    Export {
        /// Input CSV with one DOI per line (no header)
        #[arg(short, long, default_value = "data/dois.csv")]
        infile: PathBuf,

        /// Output CSV path
        #[arg(short = 'O', long, default_value = "data/final.csv")]
        outfile: PathBuf,

        /// Run the browser with a visible window
        #[arg(long)]
        headful: bool,

        /// Proxy URL (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Path to the Chrome/Chromium binary
        #[arg(long)]
        browser_path: Option<PathBuf>,

        /// Portal start-page override (institutional mirror)
        #[arg(long)]
        mirror: Option<String>,

        /// Extra attempts per DOI after a failed fetch
        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Cookie file override
        #[arg(long)]
        cookie_file: Option<PathBuf>,
    },

    /// Manage cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Clear stored cookies
    Clear,
    /// Show cookie file path
    Path,
    /// Open the portal in a visible browser, log in, and save the session cookies
    Fetch,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Export {
            infile,
            outfile,
            headful,
            proxy,
            browser_path,
            mirror,
            max_retries,
            cookie_file,
        } => {
            run_export_pipeline(
                infile,
                outfile,
                headful,
                proxy,
                browser_path,
                mirror,
                max_retries,
                cookie_file,
            )
            .await
        }
        Commands::Cookies { action } => handle_cookies(action),
    }
}

// ============================================================================
// Export Pipeline
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_export_pipeline(
    infile: PathBuf,
    outfile: PathBuf,
    headful: bool,
    proxy: Option<String>,
    browser_path: Option<PathBuf>,
    mirror: Option<String>,
    max_retries: u32,
    cookie_file: Option<PathBuf>,
) -> Result<()> {
    let dois = read_dois(&infile)?;
    if dois.is_empty() {
        anyhow::bail!("No valid DOIs in {}", infile.display());
    }
    println!("{} DOI(s) found in {}", dois.len(), infile.display());

    if let Some(parent) = outfile.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    let options = SessionOptions {
        headless: !headful,
        proxy,
        browser_path,
        start_url: mirror,
        cookie_file,
        ..SessionOptions::default()
    };

    println!("Initializing browser session...");
    let session = tokio::task::spawn_blocking(move || Session::start(options))
        .await
        .context("Browser task panicked")??;
    let session = Arc::new(session);
    println!("...done");

    let mut final_table = RecordTable::new();
    let total = dois.len();

    for (index, doi) in dois.into_iter().enumerate() {
        if index > 0 {
            polite_delay().await;
        }
        println!("[{}/{}] Fetching data for doi: {}", index + 1, total, doi);

        match fetch_with_retries(&session, &doi, max_retries).await {
            Ok(table) if !table.is_empty() => {
                println!("Got {} record(s)", table.row_count());
                final_table.concat(table);
            }
            Ok(_) => warn!(%doi, "Got no data"),
            Err(e) => error!(%doi, error = %e, "Giving up on this DOI"),
        }
    }

    // Keep refreshed session cookies for the next run
    {
        let session = Arc::clone(&session);
        match tokio::task::spawn_blocking(move || session.harvest_cookies()).await {
            Ok(Ok(count)) => info!("Saved {} session cookies", count),
            Ok(Err(e)) => warn!(error = %e, "Cookie harvest failed"),
            Err(e) => warn!(error = %e, "Cookie harvest task panicked"),
        }
    }

    final_table
        .write_csv(&outfile)
        .with_context(|| format!("Failed to write {}", outfile.display()))?;
    println!(
        "\n✓ Export complete. {} record(s) written to {}",
        final_table.row_count(),
        outfile.display()
    );
    Ok(())
}

/// Run one per-DOI fetch, retrying a bounded number of times.
///
/// A plain counter, no backoff: any error counts the same, and the whole
/// per-DOI unit (search + both exports) is redone on retry.
async fn fetch_with_retries(
    session: &Arc<Session>,
    doi: &str,
    max_retries: u32,
) -> Result<RecordTable> {
    let mut attempt = 0;
    loop {
        let worker = Arc::clone(session);
        let target = doi.to_string();
        let outcome = tokio::task::spawn_blocking(move || worker.fetch(&target))
            .await
            .context("Fetch task panicked")?;

        match outcome {
            Ok(table) => return Ok(table),
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(e.into());
                }
                warn!(%doi, attempt, error = %e, "Fetch failed, retrying");
            }
        }
    }
}

/// Random 0.5-2s pause between DOIs to avoid hammering the portal
async fn polite_delay() {
    let delay = rand::random::<u64>() % 1500 + 500;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Read the DOI list: a headerless CSV, first column, shape-validated
fn read_dois(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut dois = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read DOI list")?;
        let value = record.get(0).unwrap_or("").trim();
        if value.is_empty() {
            continue;
        }
        if !woscite::wos::is_valid_doi(value) {
            warn!(line = value, "Skipping line that does not look like a DOI");
            continue;
        }
        dois.push(value.to_string());
    }
    Ok(dois)
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(action: CookieAction) -> Result<()> {
    use woscite::cookies::CookieManager;

    let manager = CookieManager::new()?;

    match action {
        CookieAction::Clear => {
            manager.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Path => {
            println!("Cookie file: {:?}", manager.path());
        }
        CookieAction::Fetch => {
            println!("Opening the Web of Science portal in a visible browser.");
            println!("Log in (or confirm your institutional access), then press Enter here.");
            println!();

            let options = SessionOptions {
                headless: false,
                ..SessionOptions::default()
            };
            let session = Session::start(options)?;

            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;

            let count = session.harvest_cookies()?;
            println!("Saved {} cookies to {:?}", count, manager.path());
        }
    }

    Ok(())
}
