//! Parameter access for declarative YAML manifests.
//!
//! Keys are dotted paths (`spec.source.targetRevision`). Values are read and
//! written as strings; numeric-looking values are stored as YAML numbers.
//!
//! Writes replace the targeted scalar inside the existing text so comments,
//! quoting and layout survive. When the key is absent or not written as a
//! single-line scalar the whole file is re-serialized instead, which drops
//! comments.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::{Mapping, Value};

pub trait ParameterStore: Send + Sync {
    fn read_field(&self, path: &Path, key: &str) -> anyhow::Result<String>;
    fn write_field(&self, path: &Path, key: &str, value: &str) -> anyhow::Result<()>;
}

/// YAML files below a repository root.
#[derive(Debug, Clone)]
pub struct YamlParameterStore {
    root: PathBuf,
}

impl YamlParameterStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn load(&self, path: &Path) -> anyhow::Result<Value> {
        self.load_text(path).map(|(_, _, doc)| doc)
    }

    fn load_text(&self, path: &Path) -> anyhow::Result<(PathBuf, String, Value)> {
        let full = self.resolve(path);
        let content = std::fs::read_to_string(&full)
            .with_context(|| format!("Failed to read manifest: {}", full.display()))?;
        let doc = serde_yaml::from_str(&content)
            .with_context(|| format!("Malformed manifest: {}", full.display()))?;
        Ok((full, content, doc))
    }
}

impl ParameterStore for YamlParameterStore {
    fn read_field(&self, path: &Path, key: &str) -> anyhow::Result<String> {
        let doc = self.load(path)?;
        let value = lookup(&doc, key).ok_or_else(|| {
            anyhow::anyhow!("Key '{}' not found in {}", key, path.display())
        })?;
        scalar_to_string(value).ok_or_else(|| {
            anyhow::anyhow!("Key '{}' in {} is not a scalar", key, path.display())
        })
    }

    fn write_field(&self, path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
        let (full, content, mut doc) = self.load_text(path)?;
        set(&mut doc, key, parse_scalar(value))
            .with_context(|| format!("Failed to set '{}' in {}", key, path.display()))?;
        let updated = match edit_in_place(&content, key, value) {
            Some(edited) if serde_yaml::from_str::<Value>(&edited).is_ok_and(|v| v == doc) => {
                edited
            }
            _ => {
                tracing::debug!(path = %full.display(), key, "rewriting whole manifest");
                serde_yaml::to_string(&doc).context("Failed to serialize manifest")?
            }
        };
        std::fs::write(&full, updated)
            .with_context(|| format!("Failed to write manifest: {}", full.display()))
    }
}

fn lookup<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(doc, |cur, segment| cur.get(segment))
}

fn set(doc: &mut Value, key: &str, value: Value) -> anyhow::Result<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("Empty key"))?;

    let mut cur = doc;
    for segment in parents {
        if cur.is_null() {
            *cur = Value::Mapping(Mapping::new());
        }
        let map = cur
            .as_mapping_mut()
            .ok_or_else(|| anyhow::anyhow!("'{}' is not a mapping", segment))?;
        cur = map
            .entry(Value::String(segment.to_string()))
            .or_insert(Value::Null);
    }
    if cur.is_null() {
        *cur = Value::Mapping(Mapping::new());
    }
    let map = cur
        .as_mapping_mut()
        .ok_or_else(|| anyhow::anyhow!("parent of '{}' is not a mapping", last))?;
    map.insert(Value::String(last.to_string()), value);
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_scalar(value: &str) -> Value {
    match value.parse::<i64>() {
        Ok(n) => Value::Number(n.into()),
        Err(_) => Value::String(value.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Plain,
    Single,
    Double,
}

/// Replace the single-line scalar at `key` inside `content`, keeping every
/// other byte.
///
/// Returns `None` when no line holds `key` as an inline scalar. Keys under
/// sequence items are never matched.
fn edit_in_place(content: &str, key: &str, value: &str) -> Option<String> {
    let target: Vec<&str> = key.split('.').collect();
    let mut path: Vec<(usize, Option<String>)> = Vec::new();
    let mut block_parent: Option<usize> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let text = line.trim_end_matches(['\n', '\r']);
        let body = text.trim_start_matches(' ');
        let indent = text.len() - body.len();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        if let Some(parent) = block_parent {
            if indent > parent {
                continue;
            }
            block_parent = None;
        }
        if indent == 0 && (body.starts_with("---") || body.starts_with("...")) {
            continue;
        }
        while path.last().is_some_and(|(level, _)| *level >= indent) {
            path.pop();
        }
        if body == "-" || body.starts_with("- ") {
            if body.ends_with('|') || body.ends_with('>') {
                block_parent = Some(indent);
            }
            path.push((indent, None));
            continue;
        }

        let Some((name, after_colon)) = split_key(body) else {
            continue;
        };
        let rest = &body[after_colon..];
        if rest.trim_start().starts_with(['|', '>']) {
            block_parent = Some(indent);
        }
        path.push((indent, Some(name)));

        let matches = path.len() == target.len()
            && path
                .iter()
                .zip(&target)
                .all(|((_, segment), want)| segment.as_deref() == Some(*want));
        if !matches {
            continue;
        }
        let (from, to, quote) = scalar_span(rest)?;
        let base = line_start + indent + after_colon;
        let mut edited = String::with_capacity(content.len() + value.len());
        edited.push_str(&content[..base + from]);
        edited.push_str(&render_scalar(value, quote));
        edited.push_str(&content[base + to..]);
        return Some(edited);
    }
    None
}

/// Split `key: rest` into the key name and the byte index just past the colon.
fn split_key(body: &str) -> Option<(String, usize)> {
    let (name, colon) = match body.chars().next()? {
        quote @ ('"' | '\'') => {
            let close = body[1..].find(quote)? + 1;
            (body[1..close].to_string(), close + 1)
        }
        _ => {
            let colon = body.match_indices(':').map(|(i, _)| i).find(|&i| {
                body[i + 1..].chars().next().is_none_or(char::is_whitespace)
            })?;
            (body[..colon].trim_end().to_string(), colon)
        }
    };
    let after = body[colon..].strip_prefix(':')?;
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    Some((name, colon + 1))
}

/// Byte range of the inline scalar in `rest` and how it is quoted.
fn scalar_span(rest: &str) -> Option<(usize, usize, Quote)> {
    let from = rest.len() - rest.trim_start().len();
    let token = &rest[from..];
    let (len, quote) = match token.chars().next()? {
        '"' => (closing_double(token)? + 1, Quote::Double),
        '\'' => (closing_single(token)? + 1, Quote::Single),
        '#' | '|' | '>' | '&' | '*' | '!' | '[' | '{' | '%' | '@' | '`' => return None,
        _ => {
            let end = token
                .find(" #")
                .or_else(|| token.find("\t#"))
                .unwrap_or(token.len());
            (token[..end].trim_end().len(), Quote::Plain)
        }
    };
    let tail = token[len..].trim_start();
    if !tail.is_empty() && !tail.starts_with('#') {
        return None;
    }
    Some((from, from + len, quote))
}

fn closing_double(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn closing_single(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Numbers are always written plain. Other values keep the original quoting
/// unless plain text would read back as a different type.
fn render_scalar(value: &str, quote: Quote) -> String {
    let scalar = parse_scalar(value);
    let plain = serde_yaml::from_str::<Value>(value).is_ok_and(|v| v == scalar);
    if plain && (quote == Quote::Plain || scalar.is_number()) {
        return value.to_string();
    }
    match quote {
        Quote::Single => format!("'{}'", value.replace('\'', "''")),
        Quote::Plain | Quote::Double => {
            format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
        }
    }
}
