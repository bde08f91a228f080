use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ScriptgenConfig;

pub const CONFIG_FILE_NAME: &str = "scriptgen.toml";

/// Directory holding the global `config.toml`
///
/// Can be overridden with SCRIPTGEN_CONFIG_HOME for testing
pub fn global_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("SCRIPTGEN_CONFIG_HOME") {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".config/scriptgen"))
}

/// Discovers scriptgen configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    for dir in start_dir.ancestors() {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Ok(Some(config_path));
        }
    }

    // Fallback to global config
    if let Some(global) = global_config_dir().map(|dir| dir.join("config.toml")) {
        if global.is_file() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path. Otherwise discovers it from
/// `start_dir` upwards. Returns the defaults when nothing is found, together with the path that
/// was loaded, if any.
pub fn load_config_with_discovery(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<(ScriptgenConfig, Option<PathBuf>)> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(start_dir)?,
    };

    let Some(path) = path else {
        tracing::debug!(start = %start_dir.display(), "no configuration found, using defaults");
        return Ok((ScriptgenConfig::default(), None));
    };

    let config = ScriptgenConfig::from_file(&path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok((config, Some(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_discover_config_in_current_dir() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[generation]\n").unwrap();

        let found = discover_config(temp.path()).unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    #[serial]
    fn test_discover_config_in_parent_dir() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[generation]\n").unwrap();
        let nested = temp.path().join("src/Project/Generators");
        fs::create_dir_all(&nested).unwrap();

        let found = discover_config(&nested).unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    #[serial]
    fn test_global_config_fallback() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global");
        fs::create_dir_all(&global).unwrap();
        fs::write(global.join("config.toml"), "[generation]\nmessages = true\n").unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();

        std::env::set_var("SCRIPTGEN_CONFIG_HOME", &global);
        let loaded = load_config_with_discovery(None, &project);
        std::env::remove_var("SCRIPTGEN_CONFIG_HOME");

        let (config, path) = loaded.unwrap();
        assert_eq!(path, Some(global.join("config.toml")));
        assert!(config.generation.messages);
    }

    #[test]
    #[serial]
    fn test_missing_config_yields_defaults() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("SCRIPTGEN_CONFIG_HOME", temp.path().join("nowhere"));
        let loaded = load_config_with_discovery(None, temp.path());
        std::env::remove_var("SCRIPTGEN_CONFIG_HOME");

        let (config, path) = loaded.unwrap();
        assert!(path.is_none());
        assert_eq!(config, ScriptgenConfig::default());
    }

    #[test]
    #[serial]
    fn test_explicit_invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        fs::write(&path, "[generation]\nscript_extension = \"\"\n").unwrap();

        let err = load_config_with_discovery(Some(&path), temp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("script_extension"));
    }
}
