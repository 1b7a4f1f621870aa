//! Configuration and log paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/steptrace/`, `~/.local/share/steptrace/logs/`
//! - macOS: `~/Library/Application Support/steptrace/`
//! - Windows: `%APPDATA%\steptrace\`

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Application name used for the project directories
const APP_NAME: &str = "steptrace";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("logs"))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = log_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}

/// Default location of the trace file when none is given
pub fn default_trace_path(working_directory: &Path) -> PathBuf {
    working_directory.join("steptrace.json")
}

/// Replace `path` with `contents` in one step.
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new file,
/// never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_under_config_dir() {
        if let (Some(dir), Some(path)) = (config_dir(), config_path()) {
            assert!(path.starts_with(dir));
            assert!(path.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new contents").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents");
        // Only the target remains; the temporary file was renamed away
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_default_trace_path() {
        let path = default_trace_path(Path::new("/work"));
        assert_eq!(path, PathBuf::from("/work/steptrace.json"));
    }
}
