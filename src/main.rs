mod database;
mod error;
mod ingest;
mod media;
mod pipeline;
mod search;
mod tags;
mod utils;

use std::path::PathBuf;
use std::process::ExitCode;
use anyhow::{Result, Context, bail};
use clap::{Parser, ValueEnum};
use tracing::{info, error, Level};

use crate::database::repo::{MatchStore, StoreTable};
use crate::pipeline::batch::{self, BatchReport};
use crate::pipeline::orchestrator::{Collaborators, SearchOrchestrator};
use crate::search::client::{HttpClient, DEFAULT_TIMEOUT};
use crate::search::provider::SearchPlace;
use crate::tags::challenge::SessionRetrySolver;
use crate::utils::config::{self, MatchFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputMode {
    Default,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterArg {
    Default,
    BestMatch,
}

/// Get similar images from iqdb and tag them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image file, or a folder with `--input-mode folder`
    prog_input: PathBuf,

    /// iqdb place to search
    #[arg(long)]
    place: Option<SearchPlace>,

    #[arg(long)]
    minimum_similarity: Option<f64>,

    /// Upload a resized copy instead of the original
    #[arg(long)]
    resize: bool,

    /// Size of the resized copy, e.g. 300x300
    #[arg(long, value_parser = config::parse_size)]
    size: Option<(u32, u32)>,

    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    match_filter: Option<FilterArg>,

    /// Append each match's tags to `<image>.txt`
    #[arg(long)]
    write_tags: bool,

    /// Append each match's url to `<host>.txt` next to the image
    #[arg(long)]
    write_url: bool,

    #[arg(long, value_enum, default_value_t = InputMode::Default)]
    input_mode: InputMode,

    /// Stop at the first file that fails
    #[arg(long)]
    abort_on_error: bool,

    /// Config file, defaults to config.toml in the user data directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug {
        Level::DEBUG
    } else if args.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(report) if report.errors.is_empty() => ExitCode::SUCCESS,
        Ok(report) => {
            error!("Found error(s)");
            for (path, e) in &report.errors {
                eprintln!("path: {}\nerror: {}", path.display(), e);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<BatchReport> {
    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(place) = args.place {
        config.place = place;
    }
    if let Some(similarity) = args.minimum_similarity {
        config::check_similarity(similarity)?;
        config.minimum_similarity = Some(similarity);
    }
    if let Some(filter) = args.match_filter {
        config.match_filter = match filter {
            FilterArg::Default => MatchFilter::All,
            FilterArg::BestMatch => MatchFilter::BestMatch,
        };
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    config.resize |= args.resize;
    config.size = args.size.or(config.size);
    config.abort_on_error |= args.abort_on_error;
    config.write_tags |= args.write_tags;
    config.write_url |= args.write_url;
    config.print_tags = args.input_mode == InputMode::Default;

    info!("iqdb-tagger starting...");
    info!("Input: {:?}", args.prog_input);
    info!("DB: {:?}", config.db_path);

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }
    let store = MatchStore::open(&config.db_path, &config.thumb_folder)
        .context("Failed to open database")?;

    let client = HttpClient::new(DEFAULT_TIMEOUT)?;
    let solver = SessionRetrySolver::new(client.clone())
        .with_retries(config.challenge_attempts, config.challenge_delay);
    let net = Collaborators {
        uploader: &client,
        fetcher: &client,
        solver: Some(&solver),
    };
    let orchestrator = SearchOrchestrator::new(config, store, net);

    let report = match args.input_mode {
        InputMode::Folder => {
            if !args.prog_input.is_dir() {
                bail!("Input is not a valid folder: {:?}", args.prog_input);
            }
            batch::run_folder(&orchestrator, &args.prog_input)?
        }
        InputMode::Default => {
            let outcome = orchestrator.run(&args.prog_input)?;
            BatchReport {
                processed: 1,
                errors: outcome
                    .errors
                    .into_iter()
                    .map(|e| (args.prog_input.clone(), e))
                    .collect(),
            }
        }
    };

    let store = orchestrator.store();
    info!(
        processed = report.processed,
        images = store.count(StoreTable::Images)?,
        matches = store.count(StoreTable::Matches)?,
        tags = store.count(StoreTable::Tags)?,
        "Run completed."
    );
    Ok(report)
}
