//! Files generated from loadout state at sync time instead of copied from an archive.

use crate::loadout::Loadout;
use crate::path::GamePath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum IntrinsicError {
    #[error("{0} does not support reading state back from disk")]
    Unsupported(GamePath),
    #[error("{0} is not valid UTF-8")]
    Encoding(GamePath),
}

/// A file whose bytes are produced from, and optionally parsed back into,
/// loadout state.
pub trait IntrinsicFile: Send + Sync {
    fn path(&self) -> &GamePath;

    /// Serialize the current loadout state into `out`.
    fn write(&self, loadout: &Loadout, out: &mut Vec<u8>) -> Result<(), IntrinsicError>;

    fn supports_ingest(&self) -> bool {
        false
    }

    /// Fold an on-disk edit back into the loadout.
    fn ingest(&self, _data: &[u8], _loadout: &mut Loadout) -> Result<(), IntrinsicError> {
        Err(IntrinsicError::Unsupported(self.path().clone()))
    }
}

/// Supplies the intrinsic files of a loadout.
pub trait IntrinsicProvider: Send + Sync {
    fn intrinsic_files(&self, loadout: &Loadout) -> Vec<Box<dyn IntrinsicFile>>;
}

/// One [`IniFile`] per INI document recorded on the loadout.
#[derive(Debug, Default, Clone, Copy)]
pub struct IniFiles;

impl IntrinsicProvider for IniFiles {
    fn intrinsic_files(&self, loadout: &Loadout) -> Vec<Box<dyn IntrinsicFile>> {
        loadout
            .ini_files
            .keys()
            .map(|path| Box::new(IniFile::new(path.clone())) as Box<dyn IntrinsicFile>)
            .collect()
    }
}

/// Section name to key/value pairs. The unnamed leading section is `""`.
/// Section and key lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IniDocument {
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let (_, entries) = self
            .sections
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))?;
        entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let entries = self.section_mut(section);
        let existing = entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()
            .unwrap_or_else(|| key.to_string());
        entries.insert(existing, value.into());
    }

    fn section_mut(&mut self, section: &str) -> &mut BTreeMap<String, String> {
        let name = self
            .sections
            .keys()
            .find(|name| name.eq_ignore_ascii_case(section))
            .cloned()
            .unwrap_or_else(|| section.to_string());
        self.sections.entry(name).or_default()
    }

    /// Parses INI text. Blank lines and lines starting with `;` or `#` are
    /// skipped, inline comments outside quotes are stripped, quoted values
    /// are unescaped, and a trailing backslash continues a value on the next line.
    pub fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        let mut section = String::new();
        let mut lines = text.lines();

        while let Some(raw) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                doc.section_mut(&section);
                continue;
            }

            let Some(sep) = line.find('=') else {
                continue;
            };
            let key = line[..sep].trim();
            let mut value = strip_inline_comment(&line[sep + 1..]).trim().to_string();

            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = unescape(&value[1..value.len() - 1]);
            } else {
                while value.ends_with('\\') {
                    value.pop();
                    let Some(next) = lines.next() else {
                        break;
                    };
                    value.push('\n');
                    value.push_str(strip_inline_comment(next).trim_end());
                }
            }

            if key.is_empty() {
                continue;
            }
            doc.set(&section, key, value);
        }
        doc
    }

    /// Deterministic rendering: sections and keys in sorted order, the
    /// unnamed section first and without a header.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            if !name.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push('[');
                out.push_str(name);
                out.push_str("]\n");
            }
            for (key, value) in entries {
                out.push_str(key);
                out.push('=');
                out.push_str(&render_value(value));
                out.push('\n');
            }
        }
        out
    }
}

fn strip_inline_comment(value: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in value.char_indices() {
        match c {
            '\\' if in_quotes && !escaped => {
                escaped = true;
                continue;
            }
            '"' if !escaped => in_quotes = !in_quotes,
            ';' | '#' if !in_quotes => return &value[..idx],
            _ => {}
        }
        escaped = false;
    }
    value
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn render_value(value: &str) -> String {
    let needs_quotes = value != value.trim()
        || value.ends_with('\\')
        || value.contains([';', '#', '"', '\n', '\r', '\t']);
    if !needs_quotes {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// An INI file whose content lives in [`Loadout::ini_files`].
#[derive(Debug, Clone)]
pub struct IniFile {
    path: GamePath,
}

impl IniFile {
    pub fn new(path: GamePath) -> Self {
        Self { path }
    }
}

impl IntrinsicFile for IniFile {
    fn path(&self) -> &GamePath {
        &self.path
    }

    fn write(&self, loadout: &Loadout, out: &mut Vec<u8>) -> Result<(), IntrinsicError> {
        if let Some(doc) = loadout.ini_files.get(&self.path) {
            out.extend_from_slice(doc.render().as_bytes());
        }
        Ok(())
    }

    fn supports_ingest(&self) -> bool {
        true
    }

    fn ingest(&self, data: &[u8], loadout: &mut Loadout) -> Result<(), IntrinsicError> {
        let text =
            std::str::from_utf8(data).map_err(|_| IntrinsicError::Encoding(self.path.clone()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        loadout
            .ini_files
            .insert(self.path.clone(), IniDocument::parse(text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_comments_and_quotes() {
        let doc = IniDocument::parse(
            "top=1\n; comment\n[Display]\nWidth = 1920 ; inline\nTitle=\"a ; b\"\n# other\n[display]\nheight=1080\n",
        );
        assert_eq!(doc.get("", "top"), Some("1"));
        assert_eq!(doc.get("Display", "width"), Some("1920"));
        assert_eq!(doc.get("DISPLAY", "Title"), Some("a ; b"));
        assert_eq!(doc.get("Display", "Height"), Some("1080"));
        assert_eq!(doc.sections.len(), 2);
    }

    #[test]
    fn joins_continuation_lines() {
        let doc = IniDocument::parse("[S]\nlist=a\\\nb\\\nc\n");
        assert_eq!(doc.get("S", "list"), Some("a\nb\nc"));
    }

    #[test]
    fn render_then_parse_is_stable() {
        let mut doc = IniDocument::default();
        doc.set("", "root", "x");
        doc.set("General", "Name", " padded ");
        doc.set("General", "Path", "C:\\Games\\");
        doc.set("General", "Note", "semi;colon \"quoted\"\nnext");
        let text = doc.render();
        assert_eq!(IniDocument::parse(&text), doc);
        assert_eq!(IniDocument::parse(&text).render(), text);
    }
}
