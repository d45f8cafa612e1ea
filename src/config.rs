use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_API_URL: &str = "https://xkcd.com";
const DEFAULT_INDEX_FILE: &str = ".xkcd.index";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Location of the index file (defaults to ~/.xkcd.index)
  pub index_path: PathBuf,
  /// Base URL of the xkcd JSON API
  pub api_url: String,
  /// Deadline for a whole command, in milliseconds
  pub timeout_ms: u64,
  /// Items fetched concurrently by `index update`
  pub workers: usize,
  pub user_agent: String,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
  /// An index synchronized more recently than this is considered up to date
  pub update_interval_hours: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      index_path: default_index_path(),
      api_url: DEFAULT_API_URL.to_string(),
      timeout_ms: 30_000,
      workers: 5,
      user_agent: format!("xkcd-index/{}", env!("CARGO_PKG_VERSION")),
      log_file: None,
      update_interval_hours: 24,
    }
  }
}

fn default_index_path() -> PathBuf {
  dirs::home_dir()
    .map(|home| home.join(DEFAULT_INDEX_FILE))
    .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_FILE))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./xkcd.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/xkcd/config.yaml
  ///
  /// Without any file, the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("xkcd.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("xkcd").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty document deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}
