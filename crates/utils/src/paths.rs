use std::{env, path::PathBuf};

const CONFIG_ENV: &str = "COUNTDOWN_CONFIG";
const CONFIG_DIR: &str = ".countdown";
const CONFIG_FILE: &str = "config.json";

/// Directory holding the pipeline's local files (`~/.countdown`).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Resolve the config file: explicit path, then `COUNTDOWN_CONFIG`, then
/// `~/.countdown/config.json`.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
        tracing::warn!("{} is set but empty, using default location", CONFIG_ENV);
    }

    config_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = config_path(Some(PathBuf::from("/tmp/custom.json")));
        assert_eq!(path, PathBuf::from("/tmp/custom.json"));
    }

    #[test]
    fn test_default_location_ends_with_config_file() {
        let path = config_dir().join(CONFIG_FILE);
        assert!(path.ends_with(".countdown/config.json"));
    }
}
