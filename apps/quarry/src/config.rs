//! # Configuration
//!
//! Quarry reads a TOML file (the bundled `config.toml` when none is given),
//! applies `--set key=value` overrides on top, then validates every option.
//!
//! ## Options
//!
//! | Key               | Type            | Notes                               |
//! |-------------------|-----------------|-------------------------------------|
//! | `storage.data`    | path            | database file                       |
//! | `storage.backend` | `redb`/`memory` |                                     |
//! | `log.level`       | level           | `trace` .. `error`                  |
//! | `log.format`      | `text`/`json`   | `QUARRY_LOG_FORMAT` wins if set     |
//! | `log.output`      | list            | any of `stdout`, `file`             |
//! | `log.directory`   | path            | directory of the `file` output      |
//!
//! Relative paths resolve against the directory of the config file.
//! List overrides accept `key=[a,b]` or the same key repeated.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use toml::{Table, Value};

/// The bundled configuration, used when no file is given.
pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// File name of the `file` log output inside `log.directory`.
pub const LOG_FILE_NAME: &str = "quarry.log";

const KNOWN_OPTIONS: [&str; 6] = [
    "storage.data",
    "storage.backend",
    "log.level",
    "log.format",
    "log.output",
    "log.directory",
];

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while loading the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("missing config option: {0}")]
    MissingOption(String),

    #[error("config option '{path}' has unexpected value '{found}', expected {expected}")]
    UnexpectedValue {
        path: String,
        found: String,
        expected: &'static str,
    },

    #[error("unrecognised config options: {}", .0.join(", "))]
    UnrecognisedOptions(Vec<String>),

    #[error("unknown log output '{0}', expected one of: stdout, file")]
    UnknownOutput(String),

    #[error("malformed override '{0}', expected key=value")]
    MalformedOverride(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// OVERRIDES
// =============================================================================

/// One `--set key=value` command-line override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
}

impl Override {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Override {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOverride(s.to_string()))?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(ConfigError::MalformedOverride(s.to_string()));
        }
        Ok(Self::new(key, value.trim()))
    }
}

/// `[a, b]` splits into items; anything else is a single item.
fn split_list(raw: &str) -> (Vec<String>, bool) {
    match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(inner) => (
            inner
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            true,
        ),
        None => (vec![raw.to_string()], false),
    }
}

/// Merge overrides into `table`. Repeated keys accumulate into a list.
fn apply_overrides(table: &mut Table, overrides: &[Override]) -> Result<(), ConfigError> {
    let mut grouped: BTreeMap<&str, (Vec<String>, bool)> = BTreeMap::new();
    for o in overrides {
        let (items, listed) = split_list(&o.value);
        let entry = grouped.entry(o.key.as_str()).or_default();
        if !entry.0.is_empty() {
            entry.1 = true;
        }
        entry.0.extend(items);
        entry.1 |= listed;
    }

    for (key, (mut items, listed)) in grouped {
        let value = match items.pop() {
            Some(only) if !listed && items.is_empty() => Value::String(only),
            last => {
                items.extend(last);
                Value::Array(items.into_iter().map(Value::String).collect())
            }
        };
        set_dotted(table, key, value)?;
    }
    Ok(())
}

fn set_dotted(table: &mut Table, key: &str, value: Value) -> Result<(), ConfigError> {
    let mut segments: Vec<&str> = key.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return Err(ConfigError::MalformedOverride(key.to_string()));
    };

    let mut current = table;
    let mut path = String::new();
    for segment in segments {
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(segment);
        if !current.contains_key(segment) {
            current.insert(segment.to_string(), Value::Table(Table::new()));
        }
        current = match current.get_mut(segment) {
            Some(Value::Table(inner)) => inner,
            Some(other) => {
                return Err(ConfigError::UnexpectedValue {
                    path,
                    found: describe(other),
                    expected: "a table",
                });
            }
            None => return Err(ConfigError::MissingOption(path)),
        };
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Redb,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File,
}

impl FromStr for LogOutput {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "file" => Ok(Self::File),
            other => Err(ConfigError::UnknownOutput(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    pub data: PathBuf,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub outputs: Vec<LogOutput>,
    pub directory: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            outputs: vec![LogOutput::Stdout],
            directory: PathBuf::from("logs"),
        }
    }
}

impl LogConfig {
    /// Path of the `file` output.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.directory.join(LOG_FILE_NAME)
    }

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        format!("quarry={0},quarry_core={0}", self.level)
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load `path`, or the bundled defaults when `path` is `None`, and apply
    /// `overrides`.
    pub fn load(path: Option<&Path>, overrides: &[Override]) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                let content = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
                let base = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                Self::from_toml(&content, base, overrides)
            }
            None => {
                let base = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
                Self::from_toml(DEFAULT_CONFIG, &base, overrides)
            }
        }
    }

    /// Parse and validate TOML `content`; relative paths resolve against `base`.
    pub fn from_toml(content: &str, base: &Path, overrides: &[Override]) -> Result<Self, ConfigError> {
        let mut table: Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        apply_overrides(&mut table, overrides)?;

        let reader = Reader { table: &table, base };
        reader.check_recognised()?;

        let storage = StorageConfig {
            data: reader.path("storage.data")?,
            backend: match reader.string("storage.backend", "\"redb\" or \"memory\"")? {
                "redb" => Backend::Redb,
                "memory" => Backend::Memory,
                other => return Err(reader.unexpected("storage.backend", other, "\"redb\" or \"memory\"")),
            },
        };

        let level_expected = "one of trace, debug, info, warn, error";
        let level = reader.string("log.level", level_expected)?;
        if !LEVELS.contains(&level) {
            return Err(reader.unexpected("log.level", level, level_expected));
        }

        let log = LogConfig {
            level: level.to_string(),
            format: match reader.string("log.format", "\"text\" or \"json\"")? {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => return Err(reader.unexpected("log.format", other, "\"text\" or \"json\"")),
            },
            outputs: reader.outputs("log.output")?,
            directory: reader.path("log.directory")?,
        };

        Ok(Self { storage, log })
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

struct Reader<'a> {
    table: &'a Table,
    base: &'a Path,
}

impl Reader<'_> {
    fn get(&self, path: &str) -> Result<&Value, ConfigError> {
        let mut segments = path.split('.');
        let mut current = segments
            .next()
            .and_then(|first| self.table.get(first))
            .ok_or_else(|| ConfigError::MissingOption(path.to_string()))?;
        for segment in segments {
            current = match current {
                Value::Table(inner) => inner
                    .get(segment)
                    .ok_or_else(|| ConfigError::MissingOption(path.to_string()))?,
                _ => return Err(ConfigError::MissingOption(path.to_string())),
            };
        }
        Ok(current)
    }

    fn string(&self, path: &str, expected: &'static str) -> Result<&str, ConfigError> {
        match self.get(path)? {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::UnexpectedValue {
                path: path.to_string(),
                found: describe(other),
                expected,
            }),
        }
    }

    fn path(&self, path: &str) -> Result<PathBuf, ConfigError> {
        let raw = self.string(path, "a path string")?;
        if raw.is_empty() {
            return Err(self.unexpected(path, raw, "a path string"));
        }
        let p = PathBuf::from(raw);
        Ok(if p.is_absolute() { p } else { self.base.join(p) })
    }

    fn outputs(&self, path: &str) -> Result<Vec<LogOutput>, ConfigError> {
        let expected = "a list of outputs";
        let names: Vec<&str> = match self.get(path)? {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.as_str()),
                    other => Err(ConfigError::UnexpectedValue {
                        path: path.to_string(),
                        found: describe(other),
                        expected,
                    }),
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(ConfigError::UnexpectedValue {
                    path: path.to_string(),
                    found: describe(other),
                    expected,
                });
            }
        };

        let mut outputs = Vec::with_capacity(names.len());
        for name in names {
            let output = name.parse::<LogOutput>()?;
            if !outputs.contains(&output) {
                outputs.push(output);
            }
        }
        if outputs.is_empty() {
            return Err(self.unexpected(path, "[]", expected));
        }
        Ok(outputs)
    }

    fn unexpected(&self, path: &str, found: &str, expected: &'static str) -> ConfigError {
        ConfigError::UnexpectedValue {
            path: path.to_string(),
            found: format!("{found}[string]"),
            expected,
        }
    }

    /// Every leaf must be a known option, and every section a table.
    fn check_recognised(&self) -> Result<(), ConfigError> {
        let sections: BTreeSet<&str> = KNOWN_OPTIONS
            .iter()
            .filter_map(|k| k.split_once('.').map(|(section, _)| section))
            .collect();

        let mut unrecognised = Vec::new();
        let mut pending: Vec<(String, &Value)> = self
            .table
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .collect();

        while let Some((path, value)) = pending.pop() {
            match value {
                Value::Table(inner) if !KNOWN_OPTIONS.contains(&path.as_str()) => {
                    if inner.is_empty() && !sections.contains(path.as_str()) {
                        unrecognised.push(path);
                        continue;
                    }
                    pending.extend(inner.iter().map(|(k, v)| (format!("{path}.{k}"), v)));
                }
                other if sections.contains(path.as_str()) => {
                    return Err(ConfigError::UnexpectedValue {
                        path,
                        found: describe(other),
                        expected: "a table",
                    });
                }
                _ if KNOWN_OPTIONS.contains(&path.as_str()) => {}
                _ => unrecognised.push(path),
            }
        }

        if unrecognised.is_empty() {
            Ok(())
        } else {
            unrecognised.sort();
            Err(ConfigError::UnrecognisedOptions(unrecognised))
        }
    }
}

/// `value[type]`, as shown in validation errors.
fn describe(value: &Value) -> String {
    let shown = match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(d) => d.to_string(),
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Table(_) => "{..}".to_string(),
    };
    format!("{shown}[{}]", value.type_str())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn bundled_defaults_parse() {
        let config = Config::from_toml(DEFAULT_CONFIG, Path::new("/srv/quarry"), &[])
            .expect("defaults");
        assert_eq!(config.storage.backend, Backend::Redb);
        assert_eq!(config.storage.data, PathBuf::from("/srv/quarry/data/quarry.redb"));
        assert_eq!(config.log.outputs, vec![LogOutput::Stdout]);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn override_parsing() {
        let o: Override = "log.level = info".parse().expect("override");
        assert_eq!(o, Override::new("log.level", "info"));
        assert!("log.level".parse::<Override>().is_err());
        assert!("log..level=x".parse::<Override>().is_err());
    }

    #[test]
    fn split_list_forms() {
        assert_eq!(split_list("[a, b]"), (vec!["a".into(), "b".into()], true));
        assert_eq!(split_list("[]"), (vec![], true));
        assert_eq!(split_list("a"), (vec!["a".into()], false));
    }

    #[test]
    fn describe_shows_type() {
        assert_eq!(describe(&Value::Integer(123_456)), "123456[integer]");
        assert_eq!(describe(&Value::Boolean(true)), "true[boolean]");
    }
}
