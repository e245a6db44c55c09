use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub clusterer: ClustererConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub models: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Skip entries whose name starts with a dot, including whole subtrees.
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,

    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "heic", "heif"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_skip_hidden() -> bool {
    true
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            skip_hidden: default_skip_hidden(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Paths per transaction; a crash loses at most one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    50
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustererConfig {
    /// Maximum centroid distance at which faces count as the same person.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Upper bound for near-miss merge suggestions.
    #[serde(default = "default_merge_suggestion_threshold")]
    pub merge_suggestion_threshold: f32,
}

fn default_distance_threshold() -> f32 {
    0.6
}

fn default_min_cluster_size() -> usize {
    1
}

fn default_merge_suggestion_threshold() -> f32 {
    0.7
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            min_cluster_size: default_min_cluster_size(),
            merge_suggestion_threshold: default_merge_suggestion_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_dir")]
    pub path: PathBuf,

    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
}

fn default_thumbnail_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("facetrove/thumbnails")
}

fn default_thumbnail_size() -> u32 {
    150
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            path: default_thumbnail_dir(),
            size: default_thumbnail_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding the ONNX model files, downloaded on first use.
    #[serde(default = "default_model_dir")]
    pub dir: PathBuf,
}

fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facetrove/models")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: default_model_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facetrove")
        .join("facetrove.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            indexer: IndexerConfig::default(),
            clusterer: ClustererConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facetrove")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.scanner.skip_hidden);
        assert!(!config.scanner.follow_symlinks);
        assert!(config.scanner.image_extensions.contains(&"jpg".to_string()));
        assert_eq!(config.indexer.batch_size, 50);
        assert_eq!(config.clusterer.distance_threshold, 0.6);
        assert_eq!(config.thumbnails.size, 150);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.indexer.batch_size, config.indexer.batch_size);
        assert_eq!(back.db_path, config.db_path);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let back: Config = toml::from_str("db_path = \"/tmp/test.db\"").unwrap();
        assert_eq!(back.db_path, PathBuf::from("/tmp/test.db"));
        assert_eq!(back.indexer.batch_size, 50);
        assert!(back.scanner.skip_hidden);
    }
}
