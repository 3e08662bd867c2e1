//! Flat key/value metadata model shared by every extraction strategy.

use crate::organizer_core::date::{format_exif_date, system_time_to_local};
use crate::organizer_core::media::MediaFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::time::UNIX_EPOCH;

/// Mapping from symbolic tag name ("DateTimeOriginal", "Make", "GPSInfo", ...)
/// to a heterogeneous value.
pub type MetadataMap = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<MetadataValue>),
    Map(MetadataMap),
    /// Raw bytes that could not be typed; decode with `decode_bytes`.
    Bytes(Vec<u8>),
}

impl MetadataValue {
    pub fn text(s: impl Into<String>) -> Self {
        MetadataValue::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MetadataMap> {
        match self {
            MetadataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Numeric view of the value. Text is parsed, including `a/b` fractions.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Text(s) => parse_number(s.trim()),
            _ => None,
        }
    }

    /// String conversion used when a caller needs text from any value type.
    pub fn to_text(&self) -> String {
        match self {
            MetadataValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert a JSON value from the external tool. Nulls are dropped.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(MetadataValue::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(MetadataValue::Integer(i)),
                None => n.as_f64().map(MetadataValue::Float),
            },
            Value::String(s) => Some(MetadataValue::Text(s)),
            Value::Array(items) => Some(MetadataValue::List(
                items.into_iter().filter_map(Self::from_json).collect(),
            )),
            Value::Object(obj) => Some(MetadataValue::Map(
                obj.into_iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Text(s) => write!(f, "{}", s),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            MetadataValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            MetadataValue::Bytes(bytes) => write!(f, "{}", decode_bytes(bytes)),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

/// Best-effort text decode of a binary tag value: UTF-8 first, Latin-1 otherwise.
/// Trailing NUL padding is dropped.
pub fn decode_bytes(bytes: &[u8]) -> String {
    let trimmed = match bytes.iter().rposition(|b| *b != 0) {
        Some(last) => &bytes[..=last],
        None => &[],
    };
    match std::str::from_utf8(trimmed) {
        Ok(s) => s.to_string(),
        Err(e) => {
            log::debug!("Binary tag value is not UTF-8 ({}), decoding as Latin-1", e);
            trimmed.iter().map(|b| *b as char).collect()
        }
    }
}

/// Basic filesystem metadata, also the terminal fallback of every chain.
pub fn basic_metadata(file: &MediaFile) -> MetadataMap {
    let mut map = MetadataMap::new();
    map.insert("FileName".to_string(), MetadataValue::Text(file.file_name()));

    let (Some(size), Some(modified)) = (file.size, file.modified) else {
        log::debug!(
            "No filesystem attributes for {}, basic metadata limited to the name",
            file.path.display()
        );
        return map;
    };

    map.insert("FileSize".to_string(), MetadataValue::Integer(size as i64));
    if let Ok(since_epoch) = modified.duration_since(UNIX_EPOCH) {
        map.insert(
            "FileDateTime".to_string(),
            MetadataValue::Float(since_epoch.as_secs_f64()),
        );
    }
    if let Some(parent) = file.path.parent() {
        map.insert(
            "Directory".to_string(),
            MetadataValue::Text(parent.to_string_lossy().to_string()),
        );
    }
    if let Some(date) = format_exif_date(&system_time_to_local(modified)) {
        map.insert("FileModifyDate".to_string(), MetadataValue::Text(date));
    }
    map
}

/// Insert every entry of `source` whose key is not yet present in `target`.
pub fn merge_missing(target: &mut MetadataMap, source: MetadataMap) {
    for (key, value) in source {
        target.entry(key).or_insert(value);
    }
}

/// Insert every entry of `source`, replacing existing keys.
pub fn overlay(target: &mut MetadataMap, source: MetadataMap) {
    target.extend(source);
}

fn parse_number(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    s.parse().ok()
}

/// Parse a serialized literal such as `{1: 'N', 2: (37, 46, 3012/100)}` or
/// `[37, 46, 3012/100]`. Only data literals are accepted; anything else
/// yields `None`.
pub fn parse_literal(input: &str) -> Option<MetadataValue> {
    let mut parser = LiteralParser {
        chars: input.trim().chars().peekable(),
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.chars.peek().is_some() {
        return None;
    }
    Some(value)
}

struct LiteralParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl LiteralParser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn value(&mut self) -> Option<MetadataValue> {
        self.skip_ws();
        match *self.chars.peek()? {
            '{' => self.map(),
            '[' => self.sequence(']'),
            '(' => self.sequence(')'),
            '\'' | '"' => self.quoted().map(MetadataValue::Text),
            _ => self.atom(),
        }
    }

    fn map(&mut self) -> Option<MetadataValue> {
        self.chars.next();
        let mut map = MetadataMap::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&'}') {
                self.chars.next();
                return Some(MetadataValue::Map(map));
            }
            let key = self.value()?.to_text();
            self.skip_ws();
            if self.chars.next()? != ':' {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.chars.next()? {
                ',' => continue,
                '}' => return Some(MetadataValue::Map(map)),
                _ => return None,
            }
        }
    }

    fn sequence(&mut self, close: char) -> Option<MetadataValue> {
        self.chars.next();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&close) {
                self.chars.next();
                return Some(MetadataValue::List(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next()? {
                ',' => continue,
                c if c == close => return Some(MetadataValue::List(items)),
                _ => return None,
            }
        }
    }

    fn quoted(&mut self) -> Option<String> {
        let quote = self.chars.next()?;
        let mut out = String::new();
        loop {
            match self.chars.next()? {
                '\\' => out.push(self.chars.next()?),
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn atom(&mut self) -> Option<MetadataValue> {
        let mut raw = String::new();
        while let Some(&c) = self.chars.peek() {
            if matches!(c, ',' | ':' | '}' | ']' | ')') {
                break;
            }
            raw.push(c);
            self.chars.next();
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(MetadataValue::Integer(i));
        }
        if let Some(x) = parse_number(raw) {
            return Some(MetadataValue::Float(x));
        }
        match raw {
            "True" | "true" => Some(MetadataValue::Bool(true)),
            "False" | "false" => Some(MetadataValue::Bool(false)),
            _ if raw.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                Some(MetadataValue::Text(raw.to_string()))
            }
            _ => None,
        }
    }
}
