//! Device info strings
//!
//! Interfaces, drivers and the library answer info requests with short strings keyed by a
//! source and a type code. Known codes have names; anything else is addressed by its
//! decimal value.

use std::collections::BTreeMap;

use crate::types::{Result, WuenscheError};

pub const SOURCE_UNKNOWN: u8 = 0;
pub const SOURCE_INTERFACE: u8 = 1;
pub const SOURCE_DRIVER: u8 = 2;
pub const SOURCE_LIBRARY: u8 = 3;

pub const TYPE_UNKNOWN: u8 = 0;
pub const TYPE_VERSION: u8 = 1;
pub const TYPE_SERIAL: u8 = 2;
pub const TYPE_CANFD: u8 = 3;
pub const TYPE_CHANNEL_NR: u8 = 4;

const SOURCE_NAMES: [(u8, &str); 4] = [
    (SOURCE_UNKNOWN, "unknown"),
    (SOURCE_INTERFACE, "interface"),
    (SOURCE_DRIVER, "driver"),
    (SOURCE_LIBRARY, "library"),
];

const TYPE_NAMES: [(u8, &str); 5] = [
    (TYPE_UNKNOWN, "unknown"),
    (TYPE_VERSION, "version"),
    (TYPE_SERIAL, "serial"),
    (TYPE_CANFD, "canfd"),
    (TYPE_CHANNEL_NR, "channel_nr"),
];

/// Info types requested while opening a channel
pub const REQUESTED_TYPES: [u8; 4] = [TYPE_VERSION, TYPE_SERIAL, TYPE_CANFD, TYPE_CHANNEL_NR];

fn name_of(table: &[(u8, &'static str)], code: u8) -> String {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

fn code_of(table: &[(u8, &str)], name: &str) -> Option<u8> {
    if name.is_empty() {
        return None;
    }
    table
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
        .or_else(|| name.parse::<u8>().ok())
}

/// Name of an info source code
pub fn source_name(source: u8) -> String {
    name_of(&SOURCE_NAMES, source)
}

/// Name of an info type code
pub fn type_name(info_type: u8) -> String {
    name_of(&TYPE_NAMES, info_type)
}

/// Code of a named or numeric info source
pub fn source_code(name: &str) -> Result<u8> {
    code_of(&SOURCE_NAMES, name)
        .ok_or_else(|| WuenscheError::UnknownInfoKey(format!("source '{}'", name)))
}

/// Code of a named or numeric info type
pub fn type_code(name: &str) -> Result<u8> {
    code_of(&TYPE_NAMES, name)
        .ok_or_else(|| WuenscheError::UnknownInfoKey(format!("type '{}'", name)))
}

/// Info text as sent by the device, without trailing NULs
pub fn text_from_bytes(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

/// Named info sources, excluding "unknown"
pub fn info_sources() -> Vec<&'static str> {
    SOURCE_NAMES
        .iter()
        .filter(|(code, _)| *code != SOURCE_UNKNOWN)
        .map(|(_, name)| *name)
        .collect()
}

/// Named info types, excluding "unknown"
pub fn info_types() -> Vec<&'static str> {
    TYPE_NAMES
        .iter()
        .filter(|(code, _)| *code != TYPE_UNKNOWN)
        .map(|(_, name)| *name)
        .collect()
}

/// Collected info strings, keyed by source and type name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoTable {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl InfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an answer, replacing any earlier one
    pub fn insert(&mut self, source: u8, info_type: u8, value: impl Into<String>) {
        let value = value.into();
        log::debug!(
            "Info {}/{} = '{}'",
            source_name(source),
            type_name(info_type),
            value
        );
        self.entries
            .entry(source_name(source))
            .or_default()
            .insert(type_name(info_type), value);
    }

    /// Make sure a source appears in the table even before any answer arrives
    pub fn touch_source(&mut self, source: u8) {
        self.entries.entry(source_name(source)).or_default();
    }

    pub fn get(&self, source: &str, info_type: &str) -> Option<&str> {
        self.entries
            .get(source)
            .and_then(|types| types.get(info_type))
            .map(String::as_str)
    }

    /// All entries as (source, type, value)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries.iter().flat_map(|(source, types)| {
            types
                .iter()
                .map(move |(t, v)| (source.as_str(), t.as_str(), v.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|types| types.is_empty())
    }
}
