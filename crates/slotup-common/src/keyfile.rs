//! Keyfile documents: the INI-style format shared by bundle manifests,
//! the system configuration and persisted slot status.
//!
//! The grammar is deliberately small: `[group]` headers, `key=value`
//! entries, `#` or `;` comment lines, blank lines ignored. Group order
//! and key order within a group are preserved so written documents stay
//! diffable. Duplicate keys within a group are last-wins.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

/// Errors from parsing or interpreting a keyfile document.
#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("line {line}: not a group header or key=value entry: '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("line {line}: key=value entry outside any [group]")]
    EntryOutsideGroup { line: usize },

    #[error("line {line}: empty group name")]
    EmptyGroupName { line: usize },

    #[error("group '{group}' key '{key}': expected {expected}, got '{value}'")]
    InvalidValue {
        group: String,
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for keyfile operations.
pub type Result<T> = std::result::Result<T, KeyFileError>;

#[derive(Debug, Clone)]
struct Group {
    name: String,
    entries: Vec<(String, String)>,
}

/// An ordered, in-memory keyfile document.
#[derive(Debug, Clone, Default)]
pub struct KeyFile {
    groups: Vec<Group>,
}

impl KeyFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document from text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = KeyFile::new();
        let mut current: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| KeyFileError::InvalidLine {
                        line: line_no,
                        content: line.to_string(),
                    })?
                    .trim();
                if name.is_empty() {
                    return Err(KeyFileError::EmptyGroupName { line: line_no });
                }
                current = Some(doc.group_index_or_insert(name));
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| KeyFileError::InvalidLine {
                line: line_no,
                content: line.to_string(),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(KeyFileError::InvalidLine {
                    line: line_no,
                    content: line.to_string(),
                });
            }

            let group = current.ok_or(KeyFileError::EntryOutsideGroup { line: line_no })?;
            doc.set_in_group(group, key, value.trim());
        }

        Ok(doc)
    }

    /// Load and parse a document from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write the document to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    /// Group names in document order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// Keys of a group in document order; empty if the group is absent.
    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.entries.iter().map(|(k, _)| k.as_str()).collect())
            .unwrap_or_default()
    }

    /// Raw string lookup.
    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .and_then(|g| g.entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_string(&self, group: &str, key: &str) -> Option<String> {
        self.get(group, key).map(str::to_string)
    }

    /// Boolean lookup; accepts `true`/`false`/`1`/`0` (case-insensitive).
    pub fn get_bool(&self, group: &str, key: &str) -> Result<Option<bool>> {
        match self.get(group, key) {
            None => Ok(None),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                _ => Err(KeyFileError::InvalidValue {
                    group: group.to_string(),
                    key: key.to_string(),
                    expected: "boolean",
                    value: v.to_string(),
                }),
            },
        }
    }

    pub fn get_u64(&self, group: &str, key: &str) -> Result<Option<u64>> {
        match self.get(group, key) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| KeyFileError::InvalidValue {
                    group: group.to_string(),
                    key: key.to_string(),
                    expected: "unsigned integer",
                    value: v.to_string(),
                }),
        }
    }

    /// Set a value, creating the group as needed. Replaces an existing
    /// key in place to keep document order stable.
    pub fn set(&mut self, group: &str, key: &str, value: impl Into<String>) {
        let idx = self.group_index_or_insert(group);
        self.set_in_group(idx, key, value);
    }

    /// Serialize back to keyfile text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", group.name);
            for (key, value) in &group.entries {
                let _ = writeln!(out, "{key}={value}");
            }
        }
        out
    }

    fn group_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(idx) = self.groups.iter().position(|g| g.name == name) {
            return idx;
        }
        self.groups.push(Group {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self.groups.len() - 1
    }

    fn set_in_group(&mut self, group: usize, key: &str, value: impl Into<String>) {
        let entries = &mut self.groups[group].entries;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => entries.push((key.to_string(), value.into())),
        }
    }
}
