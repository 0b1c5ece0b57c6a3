use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "devcycle.toml";

/// Where the config lives. Relative paths inside the config (service
/// directories, the run log) are resolved against `dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub dir: PathBuf,
}

impl ConfigLocation {
    fn from_file(path: PathBuf) -> Self {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { path, dir }
    }

    /// Resolve a path from the config: `~` and `$HOME` expand, absolute paths
    /// stay as they are, anything else is joined onto the config directory.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(crate::platform::expand_home(raw));
        if expanded.is_absolute() {
            expanded
        } else {
            self.dir.join(expanded)
        }
    }
}

/// Walk from `start` towards the filesystem root looking for `filename`.
pub fn find_upwards(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
}

/// Locate the config: an explicit file must exist; otherwise search upwards
/// from the working directory.
pub fn locate_config(cli_file: Option<&Path>) -> anyhow::Result<ConfigLocation> {
    if let Some(path) = cli_file {
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(ConfigLocation::from_file(path.canonicalize()?));
    }

    let cwd = std::env::current_dir()?;
    find_upwards(&cwd, CONFIG_FILENAME)
        .map(ConfigLocation::from_file)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No {} found in {} or any parent directory (run `devcycle init`)",
                CONFIG_FILENAME,
                cwd.display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_config_in_ancestor() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "").unwrap();

        let nested = tmp.path().join("apps").join("web");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_upwards(&nested, CONFIG_FILENAME), Some(config_path));
    }

    #[test]
    fn nothing_inside_tree_is_found() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        // A devcycle.toml above the temp dir is possible but never inside it.
        if let Some(found) = find_upwards(&nested, CONFIG_FILENAME) {
            assert!(!found.starts_with(tmp.path()));
        }
    }

    #[test]
    fn explicit_file_sets_dir() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("custom.toml");
        fs::write(&config_path, "").unwrap();

        let location = locate_config(Some(&config_path)).unwrap();
        assert_eq!(location.path, config_path.canonicalize().unwrap());
        assert_eq!(location.dir, tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn explicit_missing_file_errors() {
        let err = locate_config(Some(Path::new("/tmp/no_such_devcycle_config.toml")))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Config file not found"), "{err}");
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let location = ConfigLocation::from_file(PathBuf::from("/work/kits/devcycle.toml"));
        assert_eq!(location.resolve("."), PathBuf::from("/work/kits/."));
        assert_eq!(location.resolve("../auth"), PathBuf::from("/work/kits/../auth"));
        #[cfg(unix)]
        assert_eq!(location.resolve("/srv/auth"), PathBuf::from("/srv/auth"));
    }
}
