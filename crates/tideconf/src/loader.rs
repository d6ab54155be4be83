//! Config file resolution, loading, and environment variable overlay.

use crate::{ConfigError, HubConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Resolve which config file to load, if any.
///
/// An explicit CLI path wins; otherwise `./eventide.toml` is used when it
/// exists. The hub is always launched with an explicit path by the client,
/// so discovery only matters for running the hub by hand.
pub fn resolve_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from("eventide.toml");
    if local.exists() {
        return Some(local);
    }

    None
}

/// Load config from a TOML file. Does not validate; callers validate after
/// the env overlay.
pub fn load_from_file(path: &Path) -> Result<HubConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Apply `EVENTIDE_*` environment variable overrides.
pub fn apply_env_overrides(config: &mut HubConfig) {
    if let Ok(v) = env::var("EVENTIDE_UDP_PORT") {
        if let Ok(port) = v.parse() {
            config.udp_port = port;
        }
    }
    if let Ok(v) = env::var("EVENTIDE_EVENT_BUFFER_LENGTH") {
        if let Ok(len) = v.parse() {
            config.global_event_buffer_length = len;
        }
    }
    if let Ok(v) = env::var("EVENTIDE_LOG_LEVEL") {
        config.log_level = Some(v);
    }
    // RUST_LOG still works through the subscriber's EnvFilter; the explicit
    // variable only feeds the config default.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_path_wins() {
        let resolved = resolve_config_file(Some(Path::new("/tmp/custom.toml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/custom.toml")));
    }

    #[test]
    fn load_from_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "udp_port = 9200\n[[devices]]\nclass = \"pulse\"\npoll_interval = 0.05"
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.udp_port, 9200);
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load_from_file(Path::new("/nonexistent/eventide.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn load_bad_toml_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "udp_port = \"not a port").unwrap();
        let err = load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
