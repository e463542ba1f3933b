//! XDG-compliant path resolution for lorekeeper.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(lore::paths::no_home),
        help("Set the HOME environment variable, or pass --data-dir explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(lore::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global directories for lorekeeper.
#[derive(Debug, Clone)]
pub struct LorePaths {
    /// `$XDG_CONFIG_HOME/lorekeeper/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/lorekeeper/`
    pub data_dir: PathBuf,
}

impl LorePaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("lorekeeper");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("lorekeeper");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Use explicit directories instead of the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    /// `data_dir/knowledge_bases/`
    pub fn knowledge_base_dir(&self) -> PathBuf {
        self.data_dir.join("knowledge_bases")
    }

    /// Path to the global config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.knowledge_base_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_root_layout() {
        let paths = LorePaths::with_root("/tmp/lore");
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/lore/config/config.toml"));
        assert_eq!(
            paths.knowledge_base_dir(),
            PathBuf::from("/tmp/lore/data/knowledge_bases")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = LorePaths::with_root(dir.path());
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.knowledge_base_dir().is_dir());
        assert!(paths.config_dir.is_dir());
    }
}
