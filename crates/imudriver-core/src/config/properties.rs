//! Java-style `.properties` reader
//!
//! The middleware hands drivers their settings as a flat properties file:
//! `key=value` or `key:value`, `#`/`!` comments, backslash continuation
//! lines and the usual escapes including `\uXXXX`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// A parsed properties file
#[derive(Debug, Clone, Default)]
pub struct Properties {
    map: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse properties from a string
    pub fn parse(content: &str) -> Self {
        let mut props = Properties::new();
        let mut logical = String::new();

        for line in content.lines() {
            let piece = if logical.is_empty() {
                line.trim()
            } else {
                line.trim_start()
            };

            if logical.is_empty() && (piece.is_empty() || piece.starts_with('#') || piece.starts_with('!')) {
                continue;
            }

            if ends_with_continuation(piece) {
                logical.push_str(&piece[..piece.len() - 1]);
                continue;
            }

            logical.push_str(piece);
            props.insert_line(&logical);
            logical.clear();
        }

        if !logical.is_empty() {
            props.insert_line(&logical);
        }
        props
    }

    /// Load properties from a file; non-UTF-8 input is read as Latin-1
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
        };
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Parse a value, `None` when missing, `Some(Err)` when malformed
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).map(|v| v.trim().parse())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Entries whose key starts with `prefix`, with the prefix removed
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.map
            .iter()
            .filter_map(move |(k, v)| k.strip_prefix(prefix).map(|rest| (rest, v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert_line(&mut self, line: &str) {
        let (key, value) = split_key_value(line);
        self.map.insert(unescape(key), unescape(value));
    }
}

/// An odd number of trailing backslashes continues the line
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

/// Split at the first unescaped `=` or `:`
fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' | ':' if !escaped => {
                return (line[..i].trim_end(), line[i + 1..].trim_start());
            }
            _ => escaped = false,
        }
    }
    (line.trim(), "")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0C'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
