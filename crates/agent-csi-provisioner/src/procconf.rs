//! The process-module config and its merge into `ruxitagentproc.conf`.
//!
//! The conf file is line oriented: `[section]` headers introduce sections and
//! every other non-comment line is `key value`. A merge rewrites the values of
//! keys the config supplies, appends supplied keys missing from a section at
//! the end of that section, and appends whole sections the file lacks.
//! Everything else passes through verbatim.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use agent_csi_core::paths::{PRISTINE_PROC_CONF_FILE, PROC_CONF_FILE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

const GENERAL_SECTION: &str = "general";
const HOST_GROUP_KEY: &str = "hostGroup";

/// Ordered `section -> key -> value` view of a config.
pub type ProcessModuleMap = BTreeMap<String, BTreeMap<String, String>>;

/// One `key value` entry of a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModuleProperty {
    /// Section name without brackets.
    pub section: String,
    /// Key within the section.
    pub key: String,
    /// Value written after the key.
    pub value: String,
}

impl ProcessModuleProperty {
    /// Create a property.
    #[must_use]
    pub fn new(section: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A config revision as served by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModuleConfig {
    /// Monotonic revision number.
    pub revision: u64,
    /// The properties of this revision.
    #[serde(default)]
    pub properties: Vec<ProcessModuleProperty>,
}

impl ProcessModuleConfig {
    /// Add or replace a property.
    ///
    /// Properties with an empty key are ignored. An empty value removes the
    /// existing `(section, key)` property instead of adding one.
    pub fn add(&mut self, property: ProcessModuleProperty) {
        if property.key.is_empty() {
            return;
        }
        let existing = self
            .properties
            .iter()
            .position(|p| p.section == property.section && p.key == property.key);

        match (existing, property.value.is_empty()) {
            (Some(index), true) => {
                self.properties.remove(index);
            }
            (Some(index), false) => self.properties[index].value = property.value,
            (None, false) => self.properties.push(property),
            (None, true) => {}
        }
    }

    /// Set `[general] hostGroup`; an empty host group removes it.
    pub fn add_host_group(&mut self, host_group: &str) {
        self.add(ProcessModuleProperty::new(
            GENERAL_SECTION,
            HOST_GROUP_KEY,
            host_group,
        ));
    }

    /// Ordered map view used by [`merge`].
    #[must_use]
    pub fn to_map(&self) -> ProcessModuleMap {
        let mut map = ProcessModuleMap::new();
        for property in &self.properties {
            map.entry(property.section.clone())
                .or_default()
                .insert(property.key.clone(), property.value.clone());
        }
        map
    }
}

fn section_header(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
}

fn take_section(section: Option<&str>, pending: &mut ProcessModuleMap, out: &mut Vec<String>) {
    if let Some(props) = section.and_then(|name| pending.remove(name)) {
        out.extend(props.into_iter().map(|(key, value)| format!("{key} {value}")));
    }
}

/// Merge `map` into the conf file `content`.
///
/// `merge(&merge(p, m), m) == merge(p, m)` for every `p` and `m`.
#[must_use]
pub fn merge(content: &str, map: &ProcessModuleMap) -> String {
    let mut pending = map.clone();
    let mut out = Vec::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        if let Some(header) = section_header(line) {
            take_section(current.as_deref(), &mut pending, &mut out);
            current = Some(header.to_string());
            out.push(line.to_string());
            continue;
        }
        if line.trim_start().starts_with('#') {
            out.push(line.to_string());
            continue;
        }

        let key = line.split(' ').next().unwrap_or_default();
        let replacement = current
            .as_deref()
            .and_then(|section| pending.get_mut(section))
            .and_then(|props| props.remove(key));
        match replacement {
            Some(value) => out.push(format!("{key} {value}")),
            None => out.push(line.to_string()),
        }
    }
    take_section(current.as_deref(), &mut pending, &mut out);

    for (section, props) in pending {
        if props.is_empty() {
            continue;
        }
        out.push(format!("[{section}]"));
        out.extend(props.into_iter().map(|(key, value)| format!("{key} {value}")));
    }

    let mut merged = out.join("\n");
    merged.push('\n');
    merged
}

/// Rewrite `<conf_dir>/ruxitagentproc.conf` as the pristine copy merged with
/// `map`.
///
/// The pristine copy `_ruxitagentproc.conf` is taken from the installed conf
/// file the first time a directory is configured.
///
/// # Errors
///
/// Returns an error if either file cannot be read or written.
pub fn apply_to_conf_dir(conf_dir: &Path, map: &ProcessModuleMap) -> Result<()> {
    let conf = conf_dir.join(PROC_CONF_FILE);
    let pristine = conf_dir.join(PRISTINE_PROC_CONF_FILE);

    if !pristine.exists() {
        debug!(path = %pristine.display(), "Preserving pristine process-module config");
        fs::copy(&conf, &pristine)?;
    }

    let merged = merge(&fs::read_to_string(&pristine)?, map);
    fs::write(&conf, merged)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRISTINE: &str = "\
# installed by the agent package
[general]
tenant abc
hostGroup old

[container]
enabled false
";

    fn config(props: &[(&str, &str, &str)]) -> ProcessModuleConfig {
        let mut config = ProcessModuleConfig::default();
        for (section, key, value) in props {
            config.add(ProcessModuleProperty::new(*section, *key, *value));
        }
        config
    }

    #[test]
    fn add_replaces_and_removes() {
        let mut config = config(&[("general", "a", "1"), ("general", "b", "2")]);
        config.add(ProcessModuleProperty::new("general", "a", "3"));
        assert_eq!(config.properties.len(), 2);
        assert_eq!(config.to_map()["general"]["a"], "3");

        config.add(ProcessModuleProperty::new("general", "b", ""));
        assert_eq!(config.properties.len(), 1);

        config.add(ProcessModuleProperty::new("general", "", "x"));
        config.add(ProcessModuleProperty::new("general", "new", ""));
        assert_eq!(config.properties.len(), 1);
    }

    #[test]
    fn host_group() {
        let mut config = config(&[("general", "other", "other")]);
        config.add_host_group("prod");
        assert_eq!(config.to_map()["general"].len(), 2);
        assert_eq!(config.to_map()["general"]["hostGroup"], "prod");

        config.add_host_group("");
        assert_eq!(config.to_map()["general"].get("hostGroup"), None);

        let before = config.clone();
        config.add_host_group("");
        assert_eq!(config, before);
    }

    #[test]
    fn merge_replaces_appends_and_keeps() {
        let map = config(&[
            ("general", "hostGroup", "new"),
            ("general", "server", "https://x"),
            ("container", "enabled", "true"),
            ("extra", "k", "v"),
        ])
        .to_map();

        let merged = merge(PRISTINE, &map);

        assert_eq!(
            merged,
            "\
# installed by the agent package
[general]
tenant abc
hostGroup new

server https://x
[container]
enabled true
[extra]
k v
"
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let map = config(&[
            ("general", "hostGroup", "new"),
            ("general", "server", "https://x"),
            ("extra", "k", "v"),
        ])
        .to_map();

        let once = merge(PRISTINE, &map);
        assert_eq!(merge(&once, &map), once);
    }

    #[test]
    fn empty_map_keeps_content() {
        assert_eq!(merge(PRISTINE, &ProcessModuleMap::new()), PRISTINE);
    }

    #[test]
    fn apply_always_merges_from_pristine() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROC_CONF_FILE), PRISTINE).unwrap();

        apply_to_conf_dir(dir.path(), &config(&[("general", "a", "1")]).to_map()).unwrap();
        apply_to_conf_dir(dir.path(), &config(&[("general", "b", "2")]).to_map()).unwrap();

        let conf = fs::read_to_string(dir.path().join(PROC_CONF_FILE)).unwrap();
        assert!(conf.contains("b 2"));
        assert!(!conf.contains("a 1"));
        assert_eq!(
            fs::read_to_string(dir.path().join(PRISTINE_PROC_CONF_FILE)).unwrap(),
            PRISTINE
        );
    }
}
