use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use vocabsync::collection::Collection;
use vocabsync::config::{Cli, Command, Config, default_config_dir, default_config_path};
use vocabsync::http::{Fetcher, ReqwestClient, SystemClock};
use vocabsync::progress::LogProgress;
use vocabsync::{SyncEngine, SyncSettings, unpack_error};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    init_tracing(args.json);

    // With --config, the collection lives next to the given file; otherwise
    // both sit under ~/.vocabsync/.
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    let config_path = config_path.to_string_lossy().into_owned();
    let cfg = Config::new(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&*e), path = %config_path, "failed to load config file");
        std::process::exit(1);
    });

    let result = match args.command.unwrap_or(Command::Sync) {
        Command::Sync => sync(&cfg, &config_path, &data_dir).await,
        Command::Status => status(&cfg, &data_dir).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %unpack_error(&*e), "vocabsync failed");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_collection(cfg: &Config, data_dir: &Path) -> anyhow::Result<Collection> {
    let path = cfg.collection_path(data_dir);
    Collection::open(&path)
        .await
        .with_context(|| format!("opening collection {}", path.display()))
}

async fn sync(cfg: &Config, config_path: &str, data_dir: &Path) -> anyhow::Result<()> {
    let collection = open_collection(cfg, data_dir).await?;
    let fetcher = Fetcher::new(ReqwestClient::new()?, SystemClock, cfg.api_key.clone())
        .with_margin(cfg.rate_limit_margin());

    let mut engine =
        SyncEngine::new(SyncSettings::from(cfg), fetcher, collection).with_progress(Arc::new(LogProgress));

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, stopping after the current record");
            cancel.cancel();
        }
    });

    let outcome = engine.run().await?;
    Config::write_last_sync(config_path, outcome.watermark)?;

    tracing::info!(
        written = outcome.stats.written,
        skipped = outcome.stats.skipped,
        last_sync = %outcome.watermark,
        "saved watermark"
    );
    Ok(())
}

async fn status(cfg: &Config, data_dir: &Path) -> anyhow::Result<()> {
    let collection = open_collection(cfg, data_dir).await?;
    let notes = match collection.deck_by_name(&cfg.deck_name).await? {
        Some(deck) => collection.count_notes(deck.id).await?,
        None => 0,
    };

    println!("deck:      {}", cfg.deck_name);
    match cfg.last_sync {
        Some(ts) => println!("last sync: {}", ts.to_rfc3339()),
        None => println!("last sync: never"),
    }
    println!("notes:     {}", notes);
    Ok(())
}
