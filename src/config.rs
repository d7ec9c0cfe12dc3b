use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the restaurant review server
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Seconds between reachability checks
  #[serde(default = "default_check_interval")]
  pub check_interval_secs: u64,
  /// Request timeout in seconds
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      check_interval_secs: default_check_interval(),
      timeout_secs: default_timeout(),
    }
  }
}

impl ApiConfig {
  pub fn check_interval(&self) -> Duration {
    Duration::from_secs(self.check_interval_secs.max(1))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Set to false to run without a local store (every read hits the network)
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database location (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
  /// Origin static assets are served from
  #[serde(default = "default_asset_origin")]
  pub origin: String,
  /// Current cache generation tag
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Older generations that survive activation alongside the current one
  #[serde(default)]
  pub keep_generations: Vec<String>,
  /// Paths cached at install time
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Served when an image cannot be fetched
  #[serde(default = "default_fallback_image")]
  pub fallback_image: String,
  /// File extensions treated as images (lowercase, no dot)
  #[serde(default = "default_image_extensions", deserialize_with = "deserialize_lowercase_vec")]
  pub image_extensions: Vec<String>,
  /// Asset cache database location (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      origin: default_asset_origin(),
      generation: default_generation(),
      keep_generations: Vec::new(),
      manifest: default_manifest(),
      fallback_image: default_fallback_image(),
      image_extensions: default_image_extensions(),
      path: None,
    }
  }
}

impl AssetsConfig {
  /// Generations that survive activation.
  pub fn expected_generations(&self) -> Vec<String> {
    let mut expected = vec![self.generation.clone()];
    for g in &self.keep_generations {
      if !expected.contains(g) {
        expected.push(g.clone());
      }
    }
    expected
  }
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

fn default_api_url() -> String {
  "http://localhost:1337".to_string()
}

fn default_check_interval() -> u64 {
  5
}

fn default_timeout() -> u64 {
  10
}

fn default_true() -> bool {
  true
}

fn default_asset_origin() -> String {
  "http://localhost:8000".to_string()
}

fn default_generation() -> String {
  "restaurant-static-v1".to_string()
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/restaurant.html",
    "/styles/styles.min.css",
    "/images/",
    "/images/fallback.png",
    "/scripts/",
    "/scripts/main.js",
    "/scripts/dbhelper.js",
    "/scripts/restaurant_info.js",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_fallback_image() -> String {
  "/images/fallback.png".to_string()
}

fn default_image_extensions() -> Vec<String> {
  ["webp", "jpg", "jpeg", "png", "gif", "svg"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./restaurant-reviews.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restaurant-reviews/config.yaml
  ///
  /// Falls back to defaults when no file is found. The API URL can be
  /// overridden with RESTAURANT_REVIEWS_API_URL.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("RESTAURANT_REVIEWS_API_URL") {
      config.api.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("restaurant-reviews.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restaurant-reviews").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory holding the store, the asset cache and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("restaurant-reviews"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("store.db")),
    }
  }

  pub fn assets_path(&self) -> Result<PathBuf> {
    match &self.assets.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("assets.db")),
    }
  }
}
