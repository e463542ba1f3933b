//! Lorekeeper configuration, persisted as TOML.
//!
//! Lives at `$XDG_CONFIG_HOME/lorekeeper/config.toml` by default. Every field
//! has a default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::insights::InsightsConfig;
use crate::persist::write_atomic;
use crate::resolution::ResolutionConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoreConfig {
    /// Base directory for knowledge bases. Defaults to the XDG data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
}

impl LoreConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as TOML, atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("cannot serialize config: {e}"),
        })?;
        write_atomic(path, text.as_bytes()).map_err(|e| match e {
            crate::error::PersistError::Io { source, .. } => write_err(source),
            other => ConfigError::Invalid {
                message: other.to_string(),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolution.validate()?;
        if !(0.0..=1.0).contains(&self.insights.pagerank_damping) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "insights.pagerank_damping must be within [0, 1], got {}",
                    self.insights.pagerank_damping
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoreConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoreConfig::default());
        assert_eq!(config.insights.louvain_seed, 42);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/lore\"\n[resolution]\nauto_merge_threshold = 0.9\n[insights]\nmax_path_length = 3\n",
        )
        .unwrap();

        let config = LoreConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/lore")));
        assert_eq!(config.resolution.auto_merge_threshold, 0.9);
        assert_eq!(config.resolution.review_threshold, 0.7);
        assert_eq!(config.insights.max_path_length, 3);
        assert_eq!(config.insights.pagerank_iterations, 100);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = LoreConfig::default();
        config.resolution.ngram_size = 4;
        config.save(&path).unwrap();
        assert_eq!(LoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[resolution]\nreview_threshold = 2.0\n").unwrap();
        assert!(matches!(LoreConfig::load(&path), Err(ConfigError::Invalid { .. })));

        std::fs::write(&path, "[resolution\n").unwrap();
        assert!(matches!(LoreConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
