use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;

pub const CONFIG_DIR_ENV: &str = "VOXEL_PILOT_CONFIG_DIR";

/// Locates and parses TOML config files.
///
/// Search order:
/// 1) `VOXEL_PILOT_CONFIG_DIR/<relative_path>`
/// 2) `./<relative_path>`
/// 3) `<repo_root>/config/<relative_path>` (repo-local convenience)
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parses the first match of the search order; a missing file yields `T::default()`.
    /// Returns the path that was read, if any.
    pub fn parse_or_default<T: DeserializeOwned + Default>(
        relative_path: &str,
    ) -> anyhow::Result<(T, Option<PathBuf>)> {
        match Self::resolve_path(relative_path) {
            Some(path) => Ok((Self::parse_path(&path)?, Some(path))),
            None => Ok((T::default(), None)),
        }
    }

    pub fn parse_path<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse_from_string(&text).with_context(|| format!("In config file {}", path.display()))
    }

    pub fn parse_from_string<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
        toml::from_str(text).with_context(|| "Failed to parse TOML")
    }

    pub fn resolve_path(relative_path: &str) -> Option<PathBuf> {
        Self::resolve_in(
            Path::new(relative_path),
            env::var_os(CONFIG_DIR_ENV).map(PathBuf::from),
            env::current_dir().ok(),
        )
    }

    fn resolve_in(
        rel: &Path,
        config_dir: Option<PathBuf>,
        cwd: Option<PathBuf>,
    ) -> Option<PathBuf> {
        let repo_config = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)
            .map(|root| root.join("config"));

        [config_dir, cwd, repo_config]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(rel))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        goal: String,
    }

    #[test]
    fn config_dir_wins_over_cwd() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("x.toml"), "goal = \"a\"").unwrap();
        std::fs::write(b.path().join("x.toml"), "goal = \"b\"").unwrap();

        let found = ConfigLoader::resolve_in(
            Path::new("x.toml"),
            Some(a.path().to_path_buf()),
            Some(b.path().to_path_buf()),
        )
        .unwrap();
        let parsed: Sample = ConfigLoader::parse_path(&found).unwrap();
        assert_eq!(parsed.goal, "a");
    }

    #[test]
    fn falls_back_to_cwd_then_nothing() {
        let empty = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        std::fs::write(cwd.path().join("x.toml"), "goal = \"cwd\"").unwrap();

        let found = ConfigLoader::resolve_in(
            Path::new("x.toml"),
            Some(empty.path().to_path_buf()),
            Some(cwd.path().to_path_buf()),
        );
        assert_eq!(found, Some(cwd.path().join("x.toml")));

        let none = ConfigLoader::resolve_in(
            Path::new("does-not-exist.toml"),
            Some(empty.path().to_path_buf()),
            None,
        );
        assert_eq!(none, None);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "goal = ").unwrap();
        let err = ConfigLoader::parse_path::<Sample>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }
}
