use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::detector::RemoteDetectorConfig;
use crate::dispatch::DispatcherConfig;

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub detector: RemoteDetectorConfig,
    pub dispatcher: DispatcherConfig,
    pub label_font: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8081),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/uploads")),
            detector: RemoteDetectorConfig::from_env(),
            dispatcher: DispatcherConfig {
                workers: env_usize("WORKER_COUNT", 2),
                queue_capacity: env_usize("JOB_QUEUE_CAPACITY", 32),
                job_timeout: Duration::from_secs(env_usize("JOB_TIMEOUT_SECS", 300) as u64),
            },
            label_font: env::var("LABEL_FONT").ok().map(PathBuf::from),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
