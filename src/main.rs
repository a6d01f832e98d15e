use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tracing_subscriber::EnvFilter;

use tagreel::app::{App, AppEvent};
use tagreel::config::{Config, Settings};
use tagreel::feed::{
    build_client, refresh_all, run_source_loop, FeedStore, FeedWorker, WorkerCommand,
};
use tagreel::storage::document::ensure_exists;
use tagreel::tag::Registry;
use tagreel::ui::{self, Channels, StoryRenderer};
use tagreel::util::catch_thread_panic;

/// Get the config directory path (~/.config/tagreel/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("tagreel"))
}

#[derive(Parser, Debug)]
#[command(
    name = "tagreel",
    about = "Terminal feed reader with tagged, filterable story groups"
)]
struct Args {
    /// Config file (default: ~/.config/tagreel/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the feed documents (default: ~/.config/tagreel)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Fetch every feed once and exit
    #[arg(long)]
    once: bool,

    /// Print each feed's groups and story counts, then exit
    #[arg(long)]
    list: bool,
}

/// The TUI owns the terminal, so interactive runs log to a file.
fn init_tracing(config_dir: &Path, interactive: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if interactive {
        let log_path = config_dir.join("tagreel.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    create_private_dir(&config_dir)?;
    init_tracing(&config_dir, !args.once && !args.list)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    if !config_path.exists() {
        eprintln!("Error: No config file found at {}", config_path.display());
        eprintln!();
        eprintln!("Create it with at least one feed:");
        eprintln!("  [[feeds]]");
        eprintln!("  url = \"https://example.com/feed.xml\"");
        std::process::exit(1);
    }

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let registry = Arc::new(Registry::with_builtins());
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config_dir.clone());
    let settings =
        Settings::from_config(&config, &registry, &data_dir).context("Invalid configuration")?;

    create_private_dir(&data_dir.join("feeds"))?;
    for feed in &settings.feeds {
        ensure_exists(&feed.path, &feed.url)
            .with_context(|| format!("Failed to create document for {}", feed.url))?;
    }
    tracing::info!(
        feeds = settings.feeds.len(),
        config = %config_path.display(),
        "Configuration loaded"
    );

    if args.list {
        list_groups(&settings, &registry);
        return Ok(());
    }

    let client = build_client().context("Failed to build HTTP client")?;

    if args.once {
        let sources: Vec<_> = settings.feeds.iter().map(|f| f.source()).collect();
        let mut failed = 0;
        for outcome in refresh_all(client, Arc::new(sources)).await {
            match outcome.result {
                Ok(count) => println!("{}: {} entries", outcome.url, count),
                Err(e) => {
                    failed += 1;
                    eprintln!("{}: {}", outcome.url, e);
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} feed(s) failed to refresh");
        }
        return Ok(());
    }

    run_interactive(settings, registry, client).await
}

/// Loads every document once and prints what it contributes.
fn list_groups(settings: &Settings, registry: &Arc<Registry>) {
    for (index, feed) in settings.feeds.iter().enumerate() {
        let mut store = FeedStore::new(index, feed.store_settings(), Arc::clone(registry));
        match store.update() {
            Ok(()) => {
                let unread = store.stories().iter().filter(|s| !s.is_read()).count();
                println!(
                    "{} ({} stories, {} unread)",
                    store.url(),
                    store.stories().len(),
                    unread
                );
                for tag in store.tags() {
                    println!("  {tag}");
                }
            }
            Err(e) => eprintln!("{}: {}", feed.url, e),
        }
    }
}

async fn run_interactive(
    settings: Settings,
    registry: Arc<Registry>,
    client: reqwest::Client,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>(64);
    let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>(256);

    let mut app = App::new(&settings, Arc::clone(&registry), Box::new(StoryRenderer));
    let (view_tx, view_rx) = watch::channel(app.view_state());

    let stores = settings
        .feeds
        .iter()
        .enumerate()
        .map(|(i, f)| FeedStore::new(i, f.store_settings(), Arc::clone(&registry)))
        .collect();
    let worker = FeedWorker::new(stores, registry, command_rx, view_rx, event_tx.clone());
    let tick = settings.tick;
    let panic_tx = event_tx.clone();
    let worker_handle = std::thread::Builder::new()
        .name("feed-worker".to_string())
        .spawn(move || {
            if let Err(error) = catch_thread_panic(|| worker.run(tick)) {
                tracing::error!(error = %error, "Feed worker panicked");
                let _ = panic_tx.blocking_send(AppEvent::TaskPanicked {
                    task: "feed worker",
                    error,
                });
            }
        })
        .context("Failed to start feed worker")?;

    let wake = Arc::new(Notify::new());
    let fetchers: Vec<_> = settings
        .feeds
        .iter()
        .map(|feed| {
            tokio::spawn(run_source_loop(
                client.clone(),
                feed.source(),
                settings.fetch_interval,
                settings.retry,
                Arc::clone(&wake),
                event_tx.clone(),
            ))
        })
        .collect();
    drop(event_tx);

    let channels = Channels {
        events: event_rx,
        commands: command_tx,
        view: view_tx,
        wake,
    };
    let result = ui::run(&mut app, channels, tick).await;

    for fetcher in fetchers {
        fetcher.abort();
    }
    if worker_handle.join().is_err() {
        tracing::error!("Feed worker thread did not exit cleanly");
    }
    tracing::info!("Shut down");
    result
}
