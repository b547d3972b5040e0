use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const DB_FILE: &str = "pantry.db";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory (the override, or the platform default)
    /// and make sure it exists.
    pub fn load(data_dir_override: Option<&Path>) -> Result<Self> {
        let data_dir = if let Some(dir) = data_dir_override {
            dir.to_path_buf()
        } else {
            let proj_dirs =
                ProjectDirs::from("", "", "pantry").context("Could not determine home directory")?;
            proj_dirs.data_dir().to_path_buf()
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join(DB_FILE);
        tracing::debug!(db = %db_path.display(), "using database");

        Ok(Config { db_path, data_dir })
    }

    /// Default location of the seed CSV files.
    pub fn seed_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_override_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("pantry");
        let config = Config::load(Some(&dir)).unwrap();
        assert!(dir.is_dir());
        assert_eq!(config.db_path, dir.join("pantry.db"));
        assert_eq!(config.seed_dir(), dir.join("data"));
    }
}
