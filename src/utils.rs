//! Shared path helpers for configuration, state and log files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File name of the configuration document.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default state file, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = "sync_state.json";

/// Default log file, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "zsxq_sync.log";

/// Gets the cross-platform per-user configuration path.
///
/// Returns the path as `{config_dir}/zsxq-sync/config.json` where `config_dir` is:
/// - Linux: `~/.config`
/// - macOS: `~/Library/Application Support`
/// - Windows: `C:\Users\<user>\AppData\Roaming`
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined.
pub fn get_user_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to determine config directory"))?;

    Ok(config_dir.join("zsxq-sync").join(CONFIG_FILE_NAME))
}

/// Resolves which configuration file to use.
///
/// An explicit path always wins. Otherwise `./config.json` is used when it
/// exists, then the per-user path; if neither exists the local path is
/// returned so the error names the file users most likely expect.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    match get_user_config_path() {
        Ok(user) if user.exists() => user,
        _ => local,
    }
}

/// Ensures the parent directory of `path` exists.
///
/// Creates the directory structure if it doesn't exist using `create_dir_all`.
///
/// # Errors
///
/// Returns an error if directory creation fails.
pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn get_user_config_path_returns_valid_path() {
        let path = get_user_config_path();
        assert!(path.is_ok());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("zsxq-sync"));
        assert!(path.ends_with(CONFIG_FILE_NAME));
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/custom.json")));
        assert_eq!(path, PathBuf::from("/tmp/custom.json"));
    }

    #[test]
    fn ensure_parent_directory_creates_nested_dirs() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a").join("b").join("state.json");

        ensure_parent_directory(&file).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[test]
    fn ensure_parent_directory_accepts_bare_file_names() {
        assert!(ensure_parent_directory(Path::new("state.json")).is_ok());
    }
}
