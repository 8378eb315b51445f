//! Minimal `.properties` / `.cfg` codec.
//!
//! Entries keep their insertion order so list-valued views derived from a
//! configuration come back in the order they were declared.

use indexmap::IndexMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("failed to read properties file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed \\uxxxx escape at line {line}")]
    InvalidUnicodeEscape { line: usize },
}

/// An ordered key/value property set with optional header comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    header: Vec<String>,
    entries: IndexMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, lines: &[&str]) -> Self {
        self.header = lines.iter().map(|l| (*l).to_owned()).collect();
        self
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, PropertiesError> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn parse(input: &str) -> Result<Self, PropertiesError> {
        let mut entries = IndexMap::new();
        let mut logical = String::new();
        let mut start_line = 0;

        for (idx, raw) in input.lines().enumerate() {
            let line = if logical.is_empty() {
                start_line = idx + 1;
                let trimmed = raw.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed
            } else {
                raw.trim_start()
            };

            if ends_with_continuation(line) {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }
            logical.push_str(line);
            let (key, value) = split_entry(&logical, start_line)?;
            entries.insert(key, value);
            logical.clear();
        }
        if !logical.is_empty() {
            let (key, value) = split_entry(&logical, start_line)?;
            entries.insert(key, value);
        }

        Ok(Self {
            header: Vec::new(),
            entries,
        })
    }

    /// Load a file, or an empty set if it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, PropertiesError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::parse_bytes(&fs::read(path)?)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn extend<I, K, V>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> IndexMap<String, String> {
        self.entries
    }

    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.entries
    }

    /// Serialize to the textual properties format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for (key, value) in &self.entries {
            out.push_str(&escape(key, true));
            out.push('=');
            out.push_str(&escape(value, false));
            out.push('\n');
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }
}

impl From<IndexMap<String, String>> for Properties {
    fn from(entries: IndexMap<String, String>) -> Self {
        Self {
            header: Vec::new(),
            entries,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        props.extend(iter);
        props
    }
}

fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

fn split_entry(logical: &str, line: usize) -> Result<(String, String), PropertiesError> {
    let mut key_end = logical.len();
    let mut escaped = false;
    for (i, c) in logical.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let raw_key = &logical[..key_end];
    let mut rest = logical[key_end..].trim_start_matches([' ', '\t', '\x0c']);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches([' ', '\t', '\x0c']);
    }

    Ok((unescape(raw_key, line)?, unescape(rest, line)?))
}

fn unescape(input: &str, line: usize) -> Result<String, PropertiesError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or(PropertiesError::InvalidUnicodeEscape { line })?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

fn escape(input: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, c) in input.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}
