//! Channel discovery
//!
//! Prefers the JSON channel list of the vendor library and falls back to the section
//! names of `cpcconf.ini`.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::cpclib::CpcLibrary;

#[cfg(windows)]
pub const CPCCONF_PATHS: &[&str] = &["cpcconf.ini", "C:\\WINDOWS\\cpcconf.ini"];

#[cfg(not(windows))]
pub const CPCCONF_PATHS: &[&str] = &["cpcconf.ini", "/etc/cpcconf.ini"];

const DEFAULT_SECTION: &str = "DEFAULT";

/// One channel that can be passed to `BusConfig::channel`
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    pub name: String,
    /// Descriptor object from the JSON channel list
    pub descriptor: Option<Value>,
}

impl ChannelEntry {
    /// Identifier to open this channel with
    pub fn channel(&self) -> String {
        match &self.descriptor {
            Some(descriptor) => {
                let mut wrapped = Map::new();
                wrapped.insert(self.name.clone(), descriptor.clone());
                Value::Object(wrapped).to_string()
            }
            None => self.name.clone(),
        }
    }
}

/// Parse the library's JSON channel list
///
/// The list is an object keyed by channel; malformed text yields no channels.
pub fn channels_from_json(json: &str) -> Vec<ChannelEntry> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(channels)) => channels
            .into_iter()
            .map(|(name, descriptor)| ChannelEntry {
                name,
                descriptor: Some(descriptor),
            })
            .collect(),
        Ok(other) => {
            log::warn!("Unexpected channel list shape: {}", other);
            Vec::new()
        }
        Err(e) => {
            log::warn!("Failed to parse channel list: {}", e);
            Vec::new()
        }
    }
}

/// Section names of an ini document, in order, without `DEFAULT`
pub fn ini_section_names(content: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name == DEFAULT_SECTION {
            continue;
        }
        if !sections.iter().any(|s| s == name) {
            sections.push(name.to_string());
        }
    }
    sections
}

/// Channels from the first readable `cpcconf.ini`
pub fn channels_from_ini<P: AsRef<Path>>(paths: &[P]) -> Vec<ChannelEntry> {
    for path in paths {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                log::debug!("Reading channels from {:?}", path);
                return ini_section_names(&content)
                    .into_iter()
                    .map(|name| ChannelEntry {
                        name,
                        descriptor: None,
                    })
                    .collect();
            }
            Err(e) => log::trace!("Skipping {:?}: {}", path, e),
        }
    }
    Vec::new()
}

/// Every channel the installed library and configuration know about
pub fn list_channels(library: Option<&CpcLibrary>) -> Vec<ChannelEntry> {
    let from_json = library
        .and_then(CpcLibrary::channel_list_json)
        .map(|json| channels_from_json(&json))
        .unwrap_or_default();
    if !from_json.is_empty() {
        return from_json;
    }
    log::debug!("No JSON channel list, falling back to cpcconf.ini");
    channels_from_ini(CPCCONF_PATHS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_channels_from_json() {
        let channels = channels_from_json(
            r#"{"CPC-USB/FD 1234": {"InterfaceType": "CPC-USB/FD", "Serial": 1234}}"#,
        );
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "CPC-USB/FD 1234");

        let reparsed: Value = serde_json::from_str(&channels[0].channel()).unwrap();
        assert_eq!(reparsed["CPC-USB/FD 1234"]["Serial"], 1234);
    }

    #[test]
    fn test_channels_from_bad_json() {
        assert!(channels_from_json("not json").is_empty());
        assert!(channels_from_json("[1, 2]").is_empty());
        assert!(channels_from_json("{}").is_empty());
    }

    #[test]
    fn test_ini_section_names() {
        let content = "\
; comment
[DEFAULT]
Timeout=100

[CHAN00]
InterfaceType=CPC-USB
 [ CHAN01 ]
[CHAN00]
";
        assert_eq!(ini_section_names(content), vec!["CHAN00", "CHAN01"]);
    }

    #[test]
    fn test_channels_from_ini_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpcconf.ini");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[CHAN00]\nInterfaceType=CPC-USB\n[CHAN03]").unwrap();

        let missing = dir.path().join("missing.ini");
        let channels = channels_from_ini(&[missing, path]);
        let names: Vec<_> = channels.iter().map(ChannelEntry::channel).collect();
        assert_eq!(names, vec!["CHAN00", "CHAN03"]);
    }
}
