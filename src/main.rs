//! Profile Photo Server - Entry point
//!
//! Serves the profile photo selector over HTTP (default) or MCP stdio.

use clap::Parser;
use profile_photo_server::{run_server_with_config, DetectionParams, ServerConfig, Transport};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "profile-photo-server", version, about)]
struct Args {
    /// Path of the JSON Haar cascade model
    #[arg(long, env = "FACE_MODEL_PATH", default_value = "haarcascade_frontalface_default.json")]
    model_path: PathBuf,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    #[arg(long, env = "TRANSPORT", value_enum, default_value_t = Transport::Http)]
    transport: Transport,

    /// Scale factor between detection passes (must be > 1)
    #[arg(long, env = "FACE_SCALE_STEP", default_value_t = 1.1)]
    scale_step: f64,

    /// Hits a face needs beyond this count to be reported
    #[arg(long, env = "FACE_MIN_NEIGHBORS", default_value_t = 4)]
    min_neighbors: u32,

    /// Smallest face edge in pixels (0 = model window)
    #[arg(long, env = "FACE_MIN_SIZE", default_value_t = 0)]
    min_face_size: u32,

    /// Downscale images whose longest side exceeds this (0 disables)
    #[arg(long, env = "FACE_MAX_IMAGE_SIDE", default_value_t = 1024)]
    max_image_side: u32,

    /// Skip scan windows whose pixel standard deviation is at or below this (0 scans all)
    #[arg(long, env = "FACE_MIN_WINDOW_STDDEV", default_value_t = 0.0)]
    min_window_stddev: f64,

    /// Stage input documents as temporary files in this directory
    #[arg(long, env = "STAGE_DIR")]
    stage_dir: Option<PathBuf>,

    #[arg(long, env = "MAX_REQUEST_BYTES", default_value_t = profile_photo_server::config::DEFAULT_MAX_REQUEST_BYTES)]
    max_request_bytes: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            model_path: args.model_path,
            host: args.host,
            port: args.port,
            transport: args.transport,
            detection: DetectionParams {
                scale_step: args.scale_step,
                min_neighbors: args.min_neighbors,
                min_face_size: args.min_face_size,
                max_image_side: args.max_image_side,
                min_window_stddev: args.min_window_stddev,
            },
            stage_dir: args.stage_dir,
            max_request_bytes: args.max_request_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profile_photo_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(transport = ?args.transport, "Starting Profile Photo Server");

    run_server_with_config(args.into()).await
}
