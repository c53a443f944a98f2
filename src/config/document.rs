//! Structured model of a section-based configuration file
//!
//! The document is a flat arena of [`Line`]s. Sections are not nested
//! structures but index ranges into that arena: a section runs from its
//! header to the next header or end of file. Lines before the first header
//! belong to no section.
//!
//! Every line keeps its original bytes. Untouched lines are written back
//! verbatim, so `parse(bytes).serialize() == bytes` for any input, valid
//! UTF-8 or not. Only lines an edit actually touches are re-rendered, and
//! a re-render keeps the line's indentation, separator style and trailing
//! comment.
//!
//! ## Duplicate sections
//!
//! When a section name appears more than once, the first occurrence defines
//! both the read and the writable scope. Later duplicates are preserved
//! byte-for-byte and otherwise ignored.
//!
//! ## Keys
//!
//! Keys match ASCII case-insensitively (`Secret` and `secret` are the same
//! key). Section names match exactly.

use std::ops::Range;

/// Line terminator of a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    /// Last line of a file without a trailing newline
    None,
}

impl LineEnding {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
            LineEnding::None => b"",
        }
    }
}

/// A `key = value` line, active or commented out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    indent: String,
    /// Comment marker plus following whitespace (`";"`, `"; "`); empty when active
    comment_prefix: String,
    key: String,
    /// Separator including surrounding whitespace (`" = "`, `"="`, `" => "`)
    separator: String,
    value: String,
    /// Whitespace and inline comment after the value
    trailing: String,
    commented: bool,
}

impl KeyValue {
    fn new(key: &str, separator: &str, value: String) -> Self {
        KeyValue {
            indent: String::new(),
            comment_prefix: String::new(),
            key: key.to_string(),
            separator: separator.to_string(),
            value,
            trailing: String::new(),
            commented: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw value as written, escapes included
    pub fn raw_value(&self) -> &str {
        &self.value
    }

    /// Value with `\;` escapes resolved
    pub fn value(&self) -> String {
        unescape_value(&self.value)
    }

    pub fn is_commented(&self) -> bool {
        self.commented
    }

    /// Inline comment after the value, if any
    pub fn trailing_comment(&self) -> Option<&str> {
        let t = self.trailing.trim_start();
        (!t.is_empty()).then_some(t)
    }

    fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    fn render(&self) -> String {
        let prefix = if self.commented {
            self.comment_prefix.as_str()
        } else {
            ""
        };
        format!(
            "{}{}{}{}{}{}",
            self.indent, prefix, self.key, self.separator, self.value, self.trailing
        )
    }
}

/// Parsed meaning of a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// Comments, directives (`#include`) and anything unrecognised
    Comment,
    SectionHeader {
        name: String,
    },
    KeyValue(KeyValue),
}

/// One physical line of the document
#[derive(Debug, Clone)]
pub struct Line {
    kind: LineKind,
    raw: Vec<u8>,
    eol: LineEnding,
    dirty: bool,
}

impl Line {
    fn parsed(raw: &[u8], eol: LineEnding) -> Self {
        let kind = match std::str::from_utf8(raw) {
            Ok(text) => classify(text),
            Err(_) => LineKind::Comment,
        };
        Line {
            kind,
            raw: raw.to_vec(),
            eol,
            dirty: false,
        }
    }

    fn synthesized(kind: LineKind, eol: LineEnding) -> Self {
        Line {
            kind,
            raw: Vec::new(),
            eol,
            dirty: true,
        }
    }

    pub fn kind(&self) -> &LineKind {
        &self.kind
    }

    fn entry(&self) -> Option<&KeyValue> {
        match &self.kind {
            LineKind::KeyValue(kv) => Some(kv),
            _ => None,
        }
    }

    fn entry_mut(&mut self) -> Option<&mut KeyValue> {
        match &mut self.kind {
            LineKind::KeyValue(kv) => Some(kv),
            _ => None,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        if self.dirty {
            match &self.kind {
                LineKind::Blank => {}
                LineKind::Comment => out.extend_from_slice(&self.raw),
                LineKind::SectionHeader { name } => {
                    out.extend_from_slice(format!("[{}]", name).as_bytes())
                }
                LineKind::KeyValue(kv) => out.extend_from_slice(kv.render().as_bytes()),
            }
        } else {
            out.extend_from_slice(&self.raw);
        }
        out.extend_from_slice(self.eol.as_bytes());
    }
}

/// Index range of one section inside the line arena
#[derive(Debug, Clone, PartialEq, Eq)]
struct SectionRange {
    name: String,
    header: usize,
    /// Exclusive
    end: usize,
}

impl SectionRange {
    fn body(&self) -> Range<usize> {
        self.header + 1..self.end
    }
}

/// Editable in-memory model of a section-based configuration file
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    lines: Vec<Line>,
    sections: Vec<SectionRange>,
    default_eol: LineEnding,
    modified: bool,
}

impl ConfigDocument {
    /// Parse a document. Never fails: unrecognised lines are kept as comments.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while !rest.is_empty() {
            match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let (body, eol) = if pos > 0 && rest[pos - 1] == b'\r' {
                        (&rest[..pos - 1], LineEnding::CrLf)
                    } else {
                        (&rest[..pos], LineEnding::Lf)
                    };
                    lines.push(Line::parsed(body, eol));
                    rest = &rest[pos + 1..];
                }
                None => {
                    lines.push(Line::parsed(rest, LineEnding::None));
                    rest = &[];
                }
            }
        }

        let crlf = lines.iter().filter(|l| l.eol == LineEnding::CrLf).count();
        let lf = lines.iter().filter(|l| l.eol == LineEnding::Lf).count();
        let default_eol = if crlf > lf {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };

        let mut doc = ConfigDocument {
            lines,
            sections: Vec::new(),
            default_eol,
            modified: false,
        };
        doc.reindex();
        doc
    }

    /// Parse from text
    pub fn parse_str(text: &str) -> Self {
        Self::parse(text.as_bytes())
    }

    /// Serialize back to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.lines.iter().map(|l| l.raw.len() + 2).sum());
        for line in &self.lines {
            line.write_to(&mut out);
        }
        out
    }

    /// Serialize to text, replacing invalid UTF-8 sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.serialize()).into_owned()
    }

    /// Whether any edit changed the document since parsing
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Distinct section names in document order
    pub fn sections(&self) -> impl Iterator<Item = &str> + '_ {
        self.sections
            .iter()
            .enumerate()
            .filter(move |(i, s)| !self.sections[..*i].iter().any(|p| p.name == s.name))
            .map(|(_, s)| s.name.as_str())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.find_section(name).is_some()
    }

    /// Active `(key, value)` pairs of a section, in order
    pub fn entries(&self, section: &str) -> Vec<(&str, String)> {
        let Some(range) = self.scope(section) else {
            return Vec::new();
        };
        self.lines[range]
            .iter()
            .filter_map(Line::entry)
            .filter(|kv| !kv.commented)
            .map(|kv| (kv.key.as_str(), kv.value()))
            .collect()
    }

    /// Append `[name]` at end of document if the section is absent
    ///
    /// Returns `true` when the header was added.
    pub fn ensure_section(&mut self, name: &str) -> bool {
        if self.has_section(name) {
            return false;
        }

        if let Some(last) = self.lines.last_mut() {
            if last.eol == LineEnding::None {
                last.eol = self.default_eol;
            }
        }
        if self
            .lines
            .last()
            .is_some_and(|l| l.kind != LineKind::Blank)
        {
            self.lines
                .push(Line::synthesized(LineKind::Blank, self.default_eol));
        }
        self.lines.push(Line::synthesized(
            LineKind::SectionHeader {
                name: name.to_string(),
            },
            self.default_eol,
        ));

        self.modified = true;
        self.reindex();
        true
    }

    /// First active value of `key` within `section`; commented lines are ignored
    pub fn get_value(&self, section: &str, key: &str) -> Option<String> {
        let range = self.scope(section)?;
        self.lines[range]
            .iter()
            .filter_map(Line::entry)
            .find(|kv| !kv.commented && kv.matches(key))
            .map(KeyValue::value)
    }

    /// Set `key` to `value` within `section`, creating the section if needed
    ///
    /// An active occurrence is replaced in place. Without one, the first
    /// commented-out occurrence is uncommented and replaced. Otherwise a new
    /// line is inserted directly after the section header. Setting the value
    /// a key already has changes nothing. Returns `true` if bytes changed.
    ///
    /// An active line wins even when a commented occurrence of the key comes
    /// first in the section, so the edit never yields two active lines and
    /// repeated calls land on the same line.
    pub fn set_value(&mut self, section: &str, key: &str, value: &str) -> bool {
        self.ensure_section(section);
        let Some(range) = self.scope(section) else {
            return false;
        };
        let escaped = escape_value(value);

        let active = self.find_entry(range.clone(), key, false);
        let target = active.or_else(|| self.find_entry(range.clone(), key, true));

        if let Some(idx) = target {
            let line = &mut self.lines[idx];
            let Some(kv) = line.entry_mut() else {
                return false;
            };
            if !kv.commented && kv.value == escaped {
                return false;
            }
            kv.commented = false;
            kv.value = escaped;
            line.dirty = true;
            self.modified = true;
            return true;
        }

        let separator = self.lines[range.clone()]
            .iter()
            .filter_map(Line::entry)
            .map(|kv| kv.separator.as_str())
            .find(|sep| !sep.contains("=>"))
            .unwrap_or(" = ")
            .to_string();

        let header = range.start - 1;
        if self.lines[header].eol == LineEnding::None {
            self.lines[header].eol = self.default_eol;
        }
        self.lines.insert(
            range.start,
            Line::synthesized(
                LineKind::KeyValue(KeyValue::new(key, &separator, escaped)),
                self.default_eol,
            ),
        );

        self.modified = true;
        self.reindex();
        true
    }

    /// Comment out the first active occurrence of `key`; no-op if absent
    pub fn comment_key(&mut self, section: &str, key: &str) -> bool {
        self.toggle(section, key, true)
    }

    /// Uncomment the first commented-out occurrence of `key`; no-op if absent
    pub fn uncomment_key(&mut self, section: &str, key: &str) -> bool {
        self.toggle(section, key, false)
    }

    /// Remove every active occurrence of `key` in `section`
    ///
    /// Returns the number of lines removed.
    pub fn remove_key(&mut self, section: &str, key: &str) -> usize {
        let Some(range) = self.scope(section) else {
            return 0;
        };
        let doomed: Vec<usize> = range
            .filter(|&i| {
                self.lines[i]
                    .entry()
                    .is_some_and(|kv| !kv.commented && kv.matches(key))
            })
            .collect();

        for &idx in doomed.iter().rev() {
            self.lines.remove(idx);
        }
        if !doomed.is_empty() {
            self.modified = true;
            self.reindex();
        }
        doomed.len()
    }

    /// Reorder the listed keys within `section` to the given order
    ///
    /// Only active lines whose key appears in `ordered_keys` move, and they
    /// move only among the positions such lines already occupy. Repeated
    /// keys keep their relative order. Every other line stays put.
    pub fn normalize_order(&mut self, section: &str, ordered_keys: &[&str]) -> bool {
        let Some(range) = self.scope(section) else {
            return false;
        };
        let rank = |line: &Line| -> Option<usize> {
            let kv = line.entry().filter(|kv| !kv.commented)?;
            ordered_keys.iter().position(|k| kv.matches(k))
        };

        let positions: Vec<usize> = range.filter(|&i| rank(&self.lines[i]).is_some()).collect();
        let mut ranked: Vec<(usize, usize)> = positions
            .iter()
            .map(|&i| (rank(&self.lines[i]).unwrap_or(usize::MAX), i))
            .collect();
        // Stable: equal ranks keep document order.
        ranked.sort_by_key(|&(r, _)| r);

        if ranked.iter().map(|&(_, i)| i).eq(positions.iter().copied()) {
            return false;
        }

        let moved: Vec<Line> = ranked.iter().map(|&(_, i)| self.lines[i].clone()).collect();
        for (slot, line) in positions.into_iter().zip(moved) {
            self.lines[slot] = line;
        }

        self.modified = true;
        self.reindex();
        true
    }

    /// Move section `name` so it sits directly before section `before`
    ///
    /// The whole section moves, trailing blank lines included. No-op when
    /// either section is missing or `name` already comes first.
    pub fn move_section_before(&mut self, name: &str, before: &str) -> bool {
        let (Some(src), Some(dst)) = (
            self.find_section(name).cloned(),
            self.find_section(before).cloned(),
        ) else {
            return false;
        };
        if src.header <= dst.header {
            return false;
        }

        let was_last = src.end == self.lines.len();
        let mut block: Vec<Line> = self.lines.drain(src.header..src.end).collect();
        if let Some(last) = block.last_mut() {
            if last.eol == LineEnding::None {
                last.eol = self.default_eol;
            }
        }
        if block.last().is_some_and(|l| l.kind != LineKind::Blank) {
            block.push(Line::synthesized(LineKind::Blank, self.default_eol));
        }
        // The separator that preceded a trailing section goes with it.
        if was_last && self.lines.last().is_some_and(|l| l.kind == LineKind::Blank) {
            self.lines.pop();
        }

        self.lines.splice(dst.header..dst.header, block);
        self.modified = true;
        self.reindex();
        true
    }

    fn toggle(&mut self, section: &str, key: &str, comment: bool) -> bool {
        let Some(range) = self.scope(section) else {
            return false;
        };
        let Some(idx) = self.find_entry(range, key, !comment) else {
            return false;
        };

        let line = &mut self.lines[idx];
        if let Some(kv) = line.entry_mut() {
            kv.commented = comment;
            if comment && kv.comment_prefix.is_empty() {
                kv.comment_prefix = ";".to_string();
            }
        }
        line.dirty = true;
        self.modified = true;
        true
    }

    fn find_entry(&self, range: Range<usize>, key: &str, commented: bool) -> Option<usize> {
        range.into_iter().find(|&i| {
            self.lines[i]
                .entry()
                .is_some_and(|kv| kv.commented == commented && kv.matches(key))
        })
    }

    fn find_section(&self, name: &str) -> Option<&SectionRange> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn scope(&self, name: &str) -> Option<Range<usize>> {
        self.find_section(name).map(SectionRange::body)
    }

    fn reindex(&mut self) {
        let mut sections: Vec<SectionRange> = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            if let LineKind::SectionHeader { name } = &line.kind {
                if let Some(prev) = sections.last_mut() {
                    prev.end = i;
                }
                sections.push(SectionRange {
                    name: name.clone(),
                    header: i,
                    end: self.lines.len(),
                });
            }
        }
        if let Some(last) = sections.last_mut() {
            last.end = self.lines.len();
        }
        self.sections = sections;
    }
}

/// Resolve `\;` escapes in a raw value
pub fn unescape_value(raw: &str) -> String {
    raw.replace("\\;", ";")
}

/// Escape `;` so a value does not turn into a comment
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_backslash = false;
    for c in value.chars() {
        if c == ';' && !prev_backslash {
            out.push('\\');
        }
        prev_backslash = c == '\\';
        out.push(c);
    }
    out
}

fn classify(text: &str) -> LineKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }

    if let Some(inner) = trimmed.strip_prefix('[') {
        return match inner.find(']') {
            Some(end) if !inner[..end].trim().is_empty() => LineKind::SectionHeader {
                name: inner[..end].trim().to_string(),
            },
            _ => LineKind::Comment,
        };
    }

    let indent_len = text.len() - text.trim_start().len();
    let (indent, body) = text.split_at(indent_len);

    if body.starts_with(';') || body.starts_with('#') {
        let marker_len = body.len() - body.trim_start_matches([';', '#']).len();
        let after_marker = &body[marker_len..];
        let ws_len = after_marker.len() - after_marker.trim_start().len();
        let (prefix, rest) = body.split_at(marker_len + ws_len);
        return match parse_key_value(indent, rest) {
            Some(mut kv) => {
                kv.comment_prefix = prefix.to_string();
                kv.commented = true;
                LineKind::KeyValue(kv)
            }
            None => LineKind::Comment,
        };
    }

    match parse_key_value(indent, body) {
        Some(kv) => LineKind::KeyValue(kv),
        None => LineKind::Comment,
    }
}

fn parse_key_value(indent: &str, body: &str) -> Option<KeyValue> {
    let eq = body.find('=')?;
    let key = body[..eq].trim_end();
    if !is_valid_key(key) {
        return None;
    }

    let mut sep_end = eq + 1;
    if body[sep_end..].starts_with('>') {
        sep_end += 1;
    }
    let after = &body[sep_end..];
    sep_end += after.len() - after.trim_start().len();
    let separator = &body[key.len()..sep_end];

    let rest = &body[sep_end..];
    let comment_at = find_unescaped_semicolon(rest).unwrap_or(rest.len());
    let value = rest[..comment_at].trim_end();
    let trailing = &rest[value.len()..];

    Some(KeyValue {
        indent: indent.to_string(),
        comment_prefix: String::new(),
        key: key.to_string(),
        separator: separator.to_string(),
        value: value.to_string(),
        trailing: trailing.to_string(),
        commented: false,
    })
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn find_unescaped_semicolon(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len()).find(|&i| bytes[i] == b';' && (i == 0 || bytes[i - 1] != b'\\'))
}
