use std::path::{Path, PathBuf};

/// Default port the daemon listens on for the bridge.
pub const BRIDGE_TCP_PORT: u16 = 9876;

const APP_DIR: &str = "jukebox";

fn under(base: Option<PathBuf>, fallback: &str, segments: &[&str]) -> PathBuf {
    let mut path = base.unwrap_or_else(|| Path::new(fallback).to_path_buf());
    path.extend(segments);
    path.push(APP_DIR);
    path
}

/// Log file and runtime state.  XDG layout on every unix, macOS included.
pub fn data_dir() -> PathBuf {
    if cfg!(windows) {
        under(dirs::data_local_dir(), ".", &[])
    } else {
        under(dirs::home_dir(), "/tmp", &[".local", "share"])
    }
}

/// Where `config.toml` lives.
pub fn config_dir() -> PathBuf {
    if cfg!(windows) {
        under(dirs::config_dir(), ".", &[])
    } else {
        under(dirs::home_dir(), ".", &[".config"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(data_dir().ends_with(APP_DIR));
        assert!(config_dir().ends_with(APP_DIR));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_layout() {
        assert!(data_dir().ends_with(".local/share/jukebox"));
        assert!(config_dir().ends_with(".config/jukebox"));
    }

    #[test]
    fn test_missing_home_falls_back() {
        assert_eq!(under(None, "/tmp", &["a"]), PathBuf::from("/tmp/a/jukebox"));
    }
}
