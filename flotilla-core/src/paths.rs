//! Filesystem locations used by Flotilla.

use std::path::PathBuf;

/// Get the Flotilla data directory.
///
/// Resolution order:
/// 1. `FLOTILLA_DATA_DIR` environment variable
/// 2. `/var/lib/flotilla` if it exists (system install)
/// 3. `~/.flotilla` for user installs
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOTILLA_DATA_DIR") {
        return PathBuf::from(dir);
    }

    let system_dir = PathBuf::from("/var/lib/flotilla");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::home_dir().map(|h| h.join(".flotilla")).unwrap_or(system_dir)
}

/// Directory holding `config.json`.
pub fn config_dir() -> PathBuf {
    data_dir()
}

/// Get the database path.
pub fn db_path() -> PathBuf {
    data_dir().join("flotilla.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_data_dir() {
        std::env::set_var("FLOTILLA_DATA_DIR", "/tmp/flotilla-test");
        assert_eq!(data_dir(), PathBuf::from("/tmp/flotilla-test"));
        assert!(db_path().starts_with("/tmp/flotilla-test"));
        assert!(config_dir().starts_with("/tmp/flotilla-test"));
        std::env::remove_var("FLOTILLA_DATA_DIR");
    }
}
