mod sink;

use ipcam_common::config::{Config, ConfigError};
use ipcam_reader::{IpCameraReader, ReaderError};
use std::path::PathBuf;
use tracing::{error, info, warn};

use sink::FrameSink;

const STATS_EVERY: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum GrabberError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error on {0}: {1}")]
    Io(String, std::io::Error),
    #[error("unknown output layout '{0}', expected 'sequential' or 'dated'")]
    UnknownLayout(String),
    #[error("camera stream {0} could not be opened")]
    NotStreaming(String),
}

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.stream.url,
        mode = config.stream.mode,
        output = %config.output.dir.display(),
        "starting ipcam grabber"
    );

    if let Err(e) = run(&config) {
        error!(error = %e, "grabber failed");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), GrabberError> {
    let mut sink = FrameSink::new(&config.output)?;
    let mut reader = IpCameraReader::from_config(config);
    if !reader.is_streaming() {
        return Err(GrabberError::NotStreaming(config.stream.url.clone()));
    }

    let timeout = config.output.frame_timeout();
    let mut grabbed = 0u64;
    loop {
        if config.output.max_frames > 0 && grabbed >= config.output.max_frames {
            info!(grabbed, "frame limit reached");
            break;
        }

        let name = reader.next_frame_name();
        match reader.next_frame_timeout(timeout) {
            Ok(frame) => {
                grabbed += 1;
                sink.offer(&name, &frame)?;
            }
            Err(ReaderError::Timeout(waited)) => {
                warn!(?waited, "no frame from camera");
                continue;
            }
            Err(ReaderError::Closed) => {
                warn!("camera stream closed");
                break;
            }
        }

        if grabbed % STATS_EVERY == 0 {
            let stats = reader.stats();
            info!(
                grabbed,
                saved = sink.saved(),
                published = stats.acquisition.frames_published,
                dropped = stats.acquisition.frames_dropped,
                failed = stats.acquisition.failed_reads,
                "grabber progress"
            );
        }
    }

    reader.close();
    info!(
        grabbed,
        saved = sink.saved(),
        dir = %sink.dir().display(),
        "grabber finished"
    );
    Ok(())
}
