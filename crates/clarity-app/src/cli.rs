//! CLI argument definitions for the Clarity application.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::{Path, PathBuf};

/// Clarity - records the screen and summarizes what you worked on.
#[derive(Parser, Debug)]
#[command(name = "clarity", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the database, screenshots and videos.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Start recording immediately.
    #[arg(long = "record")]
    pub record: bool,

    /// Use generated frames instead of the real screen.
    #[arg(long = "mock-capture")]
    pub mock_capture: bool,
}

impl CliArgs {
    /// Priority: --config flag > CLARITY_CONFIG env var > ~/.clarity/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CLARITY_CONFIG") {
            return PathBuf::from(p);
        }
        home_dir()
            .map(|home| home.join(".clarity").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Priority: --port flag > CLARITY_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = std::env::var("CLARITY_PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok())
        {
            return p;
        }
        config_port
    }

    /// Priority: --data-dir flag > config file value. `~` is expanded.
    pub fn resolve_data_dir(&self, config_dir: &str) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => expand_home(config_dir),
        }
    }

    /// Filter directive, if one was given on the command line.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var(var).ok().map(PathBuf::from)
}

/// Expand a leading `~/` (or `~\`) to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = path
        .strip_prefix("~/")
        .or_else(|| path.strip_prefix("~\\"));
    match (rest, home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        (None, Some(home)) if path == "~" => home,
        _ => Path::new(path).to_path_buf(),
    }
}
