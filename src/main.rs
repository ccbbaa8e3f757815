// Entry point for the keepsake terminal client
// `play` opens the player screen on one recording, `upload` sends files to a story

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rodio::OutputStream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keepsake::config::Config;
use keepsake::context::AppContext;
use keepsake::player::{PlaybackSession, RodioEngineFactory};
use keepsake::scheduler::TokioScheduler;
use keepsake::store::HttpStore;
use keepsake::ui::PlayerApp;
use keepsake::upload::{ItemOutcome, LocalFile, UploadSession};

#[derive(Parser, Debug)]
#[command(name = "keepsake")]
#[command(about = "Play and upload story recordings")]
#[command(version)]
struct Args {
    /// Config file (defaults to <config dir>/keepsake/config.toml)
    #[arg(long, env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a recording by URL or storage path
    Play { source: String },

    /// Upload files to a story
    Upload {
        story_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Delete the uploaded objects again afterwards
        #[arg(long)]
        discard: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Suppress ALSA buffer warnings that pollute the TUI
    std::env::set_var("ALSA_PCM_NO_MMAP", "1");

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let mut config = Config::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => Config::load().context("Failed to load config")?,
    };

    let context = AppContext::init(config).context("Failed to initialize app context")?;

    let result = match args.command {
        Command::Play { source } => {
            init_file_logging(&context)?;
            play(&context, &source).await
        }
        Command::Upload {
            story_id,
            files,
            discard,
        } => {
            init_stderr_logging(context.config());
            upload(&context, &story_id, &files, discard).await
        }
    };

    context.dispose();
    result
}

fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

fn init_stderr_logging(config: &Config) {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// The TUI owns the terminal, so logs go to a file in the app directory
fn init_file_logging(context: &AppContext) -> Result<()> {
    let dir = Config::app_dir().context("Could not find config directory")?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("keepsake.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::registry()
        .with(env_filter(context.config()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();
    Ok(())
}

async fn play(context: &AppContext, source: &str) -> Result<()> {
    let store = context.store();
    let url = resolve_url(&store, source);

    // The stream must outlive every engine; it stays on this thread
    let (_stream, stream_handle) =
        OutputStream::try_default().context("Failed to open audio output")?;

    let session = PlaybackSession::new(
        Arc::new(store),
        Arc::new(RodioEngineFactory::new(stream_handle)),
        Arc::new(TokioScheduler),
        context.config().retry.policy(),
    );
    session.start(&url)?;

    let title = source.rsplit('/').next().unwrap_or(source).to_string();
    let mut app = PlayerApp::new(session, title);
    app.run().await
}

fn resolve_url(store: &HttpStore, source: &str) -> String {
    if source.starts_with("http://") || source.starts_with("https://") {
        source.to_string()
    } else {
        store.public_url(source)
    }
}

async fn upload(
    context: &AppContext,
    story_id: &str,
    paths: &[PathBuf],
    discard: bool,
) -> Result<()> {
    if !context.is_authenticated() {
        tracing::warn!("Not signed in, uploading with the anon key");
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }

    let session = UploadSession::new(Arc::new(context.store()));
    session.add_files(files)?;
    let report = session.upload_to_story(story_id).await?;

    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Saved { url, .. } => println!("saved   {}  {}", item.name, url),
            ItemOutcome::Failed { error } => println!("FAILED  {}  {}", item.name, error),
        }
    }

    if discard {
        let cleanup = session.cleanup().await;
        println!(
            "discarded {} uploaded file(s), {} left behind",
            cleanup.removed.len(),
            cleanup.failed.len()
        );
    }

    session.teardown();

    let failed = report.failures().len();
    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed to upload", failed, report.items.len());
    }
    Ok(())
}
