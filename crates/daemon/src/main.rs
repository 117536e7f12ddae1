use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use daemon::analysis::GeminiAnalyzer;
use daemon::db::{Database, ProjectRepository};
use daemon::embeddings::HttpEmbedder;
use daemon::media::download::YtDlpDownloader;
use daemon::media::{CommandRunner, ProcessRunner};
use daemon::pipeline::StorageLayout;
use daemon::{api, Collaborators, Config, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("reading configuration")?;
    let api_key = config
        .google_api_key
        .clone()
        .context("GOOGLE_API_KEY must be set")?;

    let layout = StorageLayout::new(&config.data_dir);
    layout
        .ensure()
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let db = Arc::new(Database::new(&layout.registry_db())?);
    info!("Registry opened at {}", layout.registry_db().display());

    let interrupted = db
        .fail_interrupted()
        .context("recovering interrupted projects")?;
    if interrupted > 0 {
        warn!(count = interrupted, "marked interrupted projects as failed");
    }

    let commands: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(config.command_timeout));
    let collaborators = Collaborators {
        projects: db.clone(),
        vectors: db,
        downloader: Arc::new(YtDlpDownloader::new(config.ytdlp_bin.clone(), commands.clone())),
        analyzer: Arc::new(
            GeminiAnalyzer::new(&config, api_key).context("building analysis client")?,
        ),
        embedder: Arc::new(HttpEmbedder::new(&config).context("building embedding client")?),
        commands,
    };
    let pipeline = Pipeline::new(&config, collaborators).context("initializing pipeline")?;
    let app = api::app(pipeline, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("Starting daemon server on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
