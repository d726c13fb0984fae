use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub converter: ConverterConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root for the job database, converted files and working directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("mp3ify.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("converted")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }
}

/// The external converter command.
///
/// `args` entries may contain `{source}`, `{job_id}` and `{work_dir}`,
/// substituted per job. The converter runs inside the job's working
/// directory and must leave exactly one result file there.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConverterConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Seconds between SIGTERM and a forced kill when a job is cancelled
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,

    /// Number of trailing stderr lines kept for failure reasons
    #[serde(default = "default_stderr_tail")]
    pub stderr_tail_lines: usize,
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_args() -> Vec<String> {
    [
        "--newline",
        "--no-playlist",
        "--extract-audio",
        "--audio-format",
        "mp3",
        "--output",
        "%(title)s.%(ext)s",
        "{source}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_kill_grace() -> u64 {
    5
}

fn default_stderr_tail() -> usize {
    20
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            kill_grace_secs: default_kill_grace(),
            stderr_tail_lines: default_stderr_tail(),
        }
    }
}

impl ConverterConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum simultaneous converter processes (0 = unbounded)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Events buffered per subscriber before it is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}
