use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use lookalike::{
    config, matcher, reference, server, storage, Embedder, FaceService, OnnxEmbedder,
};

#[derive(Parser)]
#[command(name = "lookalike")]
#[command(
    version,
    about = "Score how closely a face resembles the average of a reference set"
)]
struct Cli {
    /// Config file (defaults to the system-wide config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Reference image directory
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// Compare a local image against the reference faces
    Compare {
        /// Image to score
        image: PathBuf,
        /// Reference image directory
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// Precompute reference embeddings into a cache file
    Index {
        /// Cache file to write (defaults to `reference_cache` from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Reference image directory
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    env_logger::builder()
        .filter_level(if cli.debug || cfg.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Serve { host, port, images } => {
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(images) = images {
                cfg.reference_images_dir = images;
            }
            serve(&cfg)
        }
        Commands::Compare { image, images } => {
            if let Some(images) = images {
                cfg.reference_images_dir = images;
            }
            compare(&cfg, &image)
        }
        Commands::Index { output, images } => {
            if let Some(images) = images {
                cfg.reference_images_dir = images;
            }
            index(&cfg, output)
        }
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

/// Model plus reference set. A failed reference build is logged, not fatal:
/// the service then stays not ready.
fn build_service(cfg: &config::Config) -> Result<FaceService> {
    let embedder: Arc<dyn Embedder> = Arc::new(OnnxEmbedder::new(cfg)?);
    let mut service = FaceService::from_config(embedder, cfg);

    if let Some(cache) = cfg.reference_cache.as_deref().filter(|p| p.exists()) {
        match storage::load_reference_set(cache, &cfg.model_name, &cfg.reference_images_dir) {
            Ok(set) => {
                info!(
                    "Loaded {} reference face(s) from {}",
                    set.len(),
                    cache.display()
                );
                service.install(set);
                return Ok(service);
            }
            Err(e) => warn!("Ignoring reference cache: {:#}", e),
        }
    }

    if !service.initialize(&cfg.reference_images_dir, &cfg.supported_image_formats) {
        error!("Reference faces unavailable; compare requests will fail until restart");
    }
    Ok(service)
}

fn serve(cfg: &config::Config) -> Result<()> {
    let service = build_service(cfg)?;
    let state = server::AppState::new(service, server::UploadSettings::from_config(cfg));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::serve(cfg, state))
}

fn compare(cfg: &config::Config, image: &Path) -> Result<()> {
    let service = build_service(cfg)?;
    if !service.is_ready() {
        anyhow::bail!(
            "No reference faces available in {}",
            cfg.reference_images_dir.display()
        );
    }

    let result = service.compare_path(image)?;
    let score = matcher::round2(result.similarity);
    info!("Similarity: {:.2}% (distance {:.4})", score, result.distance);
    info!("Verdict: {}", matcher::Verdict::from_score(score));
    info!(
        "Closest reference: {} (distance {:.4})",
        result.best_match_filename, result.best_match_distance
    );
    Ok(())
}

fn index(cfg: &config::Config, output: Option<PathBuf>) -> Result<()> {
    let output = output
        .or_else(|| cfg.reference_cache.clone())
        .context("No output given and `reference_cache` is not set in config")?;

    let embedder = OnnxEmbedder::new(cfg)?;
    let set = reference::build_reference_set(
        &embedder,
        &cfg.reference_images_dir,
        &cfg.supported_image_formats,
        cfg.face_confidence_threshold,
    )?;
    storage::save_reference_set(&output, &cfg.model_name, &cfg.reference_images_dir, &set)
        .context("Failed to save reference cache")?;

    info!(
        "✓ Cached {} reference face(s) to {}",
        set.len(),
        output.display()
    );
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
