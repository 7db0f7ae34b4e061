//! `.env` file rendering and parsing.

use tracing::warn;

use crate::document::validate_key;

const QUOTE_TRIGGERS: &[char] = &[' ', '"', '\'', '\\', '#', '\n', '\r', '\t'];

fn needs_quotes(value: &str) -> bool {
    value.contains(QUOTE_TRIGGERS) || value.trim() != value
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render `(key, value)` pairs as `.env` text, one `KEY=VALUE` per line.
pub fn render<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key);
        out.push('=');
        if needs_quotes(value) {
            out.push_str(&quote(value));
        } else {
            out.push_str(value);
        }
        out.push('\n');
    }
    out
}

fn unescape_double(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_value(raw: &str) -> String {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if raw.len() >= 2 && bytes[0] == b'"' && bytes[raw.len() - 1] == b'"' {
        return unescape_double(&raw[1..raw.len() - 1]);
    }
    if raw.len() >= 2 && bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'' {
        return raw[1..raw.len() - 1].to_string();
    }
    raw.to_string()
}

/// Parse `.env` text into `(key, value)` pairs in file order.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is
/// accepted, and lines without a valid `KEY=` are skipped with a warning.
pub fn parse(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            warn!(line = index + 1, "Skipping .env line without '='");
            continue;
        };

        let key = key.trim();
        if validate_key(key).is_err() {
            warn!(line = index + 1, "Skipping .env line with invalid key");
            continue;
        }

        pairs.push((key.to_string(), parse_value(value)));
    }

    pairs
}
