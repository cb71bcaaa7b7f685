//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_wuensche::BusConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Explicit CPC library; the platform locations are searched when unset
    pub path: Option<PathBuf>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_wuensche::BusState;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [library]
            path = "/opt/ems/libcpc.so"

            [bus]
            channel = "CHAN01"
            state = "passive"
            fd = true
            nom_bitrate = 500000
            data_bitrate = 2000000
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(
            config.library.path.as_deref(),
            Some(Path::new("/opt/ems/libcpc.so"))
        );
        assert_eq!(config.bus.channel, "CHAN01");
        assert_eq!(config.bus.state, BusState::Passive);
        assert_eq!(config.bus.timing_request.fd, Some(true));
        assert_eq!(config.bus.timing_request.data_bitrate, Some(2_000_000));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.library.path.is_none());
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nchannel = \"CHAN02\"\nbitrate = 125000").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.bus.channel, "CHAN02");
        assert_eq!(config.bus.timing_request.bitrate, Some(125_000));
    }

    #[test]
    fn test_load_config_errors() {
        let missing = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus\nchannel =").unwrap();
        let invalid = load_config(file.path()).unwrap_err();
        assert!(invalid.to_string().contains("Failed to parse config file"));
    }
}
