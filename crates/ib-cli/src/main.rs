mod dispatch;
mod platform;
mod reddit;
mod shutdown;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ib_core::{KeywordCatalog, find_matches, render_table};
use ib_store::{DataDir, ReplyStateStore, Settings, load_catalog, load_templates};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{BotData, DispatchConfig, Dispatcher};
use crate::reddit::RedditClient;

#[derive(Parser)]
#[command(name = "immaginibot", about = "Reddit bot replying to word.png with images")]
struct Cli {
    /// Data directory (default: $IB_DATA_DIR or ~/.immaginibot)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch comments and inbox until SIGINT/SIGTERM
    Run,

    /// Validate the catalog and templates
    Check,

    /// Run the match pipeline on a text and print the reply body
    Match {
        /// Comment text
        text: String,
    },

    /// Render the catalog as a markdown table
    Export {
        /// Include hidden sets and hidden keywords
        #[arg(long)]
        hidden: bool,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show reply ledger statistics
    Status,

    /// Reply to a live comment as if it contained the given text
    Force {
        /// Target comment id
        comment_id: String,
        /// Text to match in place of the comment body
        text: String,
    },
}

fn open_data_dir(cli: &Cli) -> Result<DataDir> {
    let base_dir = cli
        .data_dir
        .clone()
        .or_else(|| std::env::var("IB_DATA_DIR").ok().map(PathBuf::from));
    DataDir::open(base_dir.as_deref()).context("failed to open data directory")
}

fn open_catalog(data: &DataDir) -> Result<KeywordCatalog> {
    load_catalog(&data.catalog_path()).context("failed to load catalog")
}

fn load_settings(data: &DataDir) -> Result<Settings> {
    Settings::load(&data.settings_path()).context("failed to load bot.toml")
}

fn load_bot_data(data: &DataDir) -> Result<BotData> {
    Ok(BotData {
        catalog: open_catalog(data)?,
        templates: load_templates(&data.templates_dir()).context("failed to load templates")?,
        ledger: ReplyStateStore::open(&data.status_path()).context("failed to load status")?,
    })
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,immaginibot=info,ib_store=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Run => cmd_run(&cli).await,
        Commands::Check => cmd_check(&cli),
        Commands::Match { text } => cmd_match(&cli, text),
        Commands::Export { hidden, out } => cmd_export(&cli, *hidden, out.as_deref()),
        Commands::Status => cmd_status(&cli),
        Commands::Force { comment_id, text } => cmd_force(&cli, comment_id, text).await,
    }
}

// ---------------------------------------------------------------------------
// Advisory pidfile for observability
// ---------------------------------------------------------------------------

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile(path: &Path) -> Option<PathBuf> {
    if let Ok(content) = std::fs::read_to_string(path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!("another immaginibot (PID {pid}) is using this data directory");
        } else {
            tracing::info!("cleaned up stale pidfile (PID {pid} is dead)");
            let _ = std::fs::remove_file(path);
        }
    }

    match std::fs::File::create(path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path.to_path_buf())
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(cli: &Cli) -> Result<()> {
    let data = open_data_dir(cli)?;
    let settings = load_settings(&data)?;
    settings
        .require_credentials()
        .context("cannot log in to reddit")?;
    let bot_data = load_bot_data(&data)?;

    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());
    let pidfile = acquire_pidfile(&data.pidfile_path());

    let result = run_bot(&settings, bot_data, cancel).await;

    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    result
}

async fn run_bot(settings: &Settings, bot_data: BotData, cancel: CancellationToken) -> Result<()> {
    let connected = tokio::select! {
        _ = cancel.cancelled() => None,
        connected = RedditClient::connect(settings) => Some(connected),
    };
    let Some(connected) = connected else {
        return Ok(());
    };
    let platform = connected.context("failed to connect to reddit")?;

    let config = DispatchConfig::from_settings(&settings.bot);
    let mut dispatcher = Dispatcher::connect(platform, bot_data, config, cancel)
        .await
        .context("failed to start dispatcher")?;
    dispatcher.run().await;
    Ok(())
}

fn cmd_check(cli: &Cli) -> Result<()> {
    let data = open_data_dir(cli)?;
    let settings = load_settings(&data)?;
    let catalog = open_catalog(&data)?;
    load_templates(&data.templates_dir()).context("failed to load templates")?;

    println!("sets:        {}", catalog.len());
    println!("keywords:    {}", catalog.keyword_count());
    println!("images:      {}", catalog.image_count());
    println!("templates:   ok");
    let credentials = match settings.require_credentials() {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    println!("credentials: {credentials}");
    Ok(())
}

fn cmd_match(cli: &Cli, text: &str) -> Result<()> {
    let data = open_data_dir(cli)?;
    let settings = load_settings(&data)?;
    let catalog = open_catalog(&data)?;
    let templates = load_templates(&data.templates_dir()).context("failed to load templates")?;
    let mut rng = SmallRng::from_os_rng();

    let report = find_matches(&catalog, text, &mut rng);
    for (requested, substituted) in &report.fuzzy {
        eprintln!("fuzzy: {requested} -> {substituted}");
    }
    for word in &report.misses {
        eprintln!("miss: {word}");
    }

    if report.is_empty() {
        println!("(no images matched)");
        return Ok(());
    }
    let username = if settings.reddit.username.is_empty() {
        "immaginibot"
    } else {
        settings.reddit.username.as_str()
    };
    let body = templates.compose_body(&report.matches, report.any_fuzzy(), username, "preview");
    println!("{body}");
    Ok(())
}

fn cmd_export(cli: &Cli, hidden: bool, out: Option<&Path>) -> Result<()> {
    let data = open_data_dir(cli)?;
    let catalog = open_catalog(&data)?;
    let table = render_table(&catalog, hidden);

    match out {
        Some(path) => {
            std::fs::write(path, &table)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("exported to {}", path.display());
        }
        None => print!("{table}"),
    }
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let data = open_data_dir(cli)?;
    let store = ReplyStateStore::open(&data.status_path()).context("failed to load status")?;
    let ledger = store.ledger();

    println!("hot:      {}", ledger.hot_len());
    println!("active:   {}", ledger.active_len());
    println!("deleted:  {}", ledger.hot_len() - ledger.active_len());
    println!("cold:     {}", ledger.cold_records().len());
    Ok(())
}

async fn cmd_force(cli: &Cli, comment_id: &str, text: &str) -> Result<()> {
    let data = open_data_dir(cli)?;
    let settings = load_settings(&data)?;
    settings
        .require_credentials()
        .context("cannot log in to reddit")?;
    let bot_data = load_bot_data(&data)?;

    let platform = RedditClient::connect(&settings)
        .await
        .context("failed to connect to reddit")?;
    let config = DispatchConfig::from_settings(&settings.bot);
    let mut dispatcher = Dispatcher::connect(platform, bot_data, config, CancellationToken::new())
        .await
        .context("failed to start dispatcher")?;

    match dispatcher
        .force_reply(&comment_id.to_ascii_lowercase(), text)
        .await
        .context("forced reply failed")?
    {
        Some(forced) => println!("replied {} on {}", forced.record.id, forced.permalink),
        None => println!("(no reply posted)"),
    }
    Ok(())
}
