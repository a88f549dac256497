use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ConfigError;

/// Secrets lookup: a parsed `.env` file first, then the process environment.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("dotenv_keys", &self.dotenv.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        let env = Self::parse_dotenv(&contents);
        tracing::debug!(path = %path.display(), keys = env.dotenv.len(), "loaded dotenv");
        Ok(env)
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dotenv.insert(key.into(), value.into());
        self
    }

    /// Blank values count as unset in both sources.
    pub fn get(&self, key: &str) -> Option<String> {
        self.dotenv
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.trim().is_empty())
    }
}

fn unquote(value: &str) -> Option<&str> {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
}

/// `KEY=value` with an optional `export ` prefix. Unquoted values end at ` #`.
fn parse_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }

    let raw = raw.trim();
    let value = match unquote(raw) {
        Some(inner) => inner,
        None => raw.split_once(" #").map_or(raw, |(head, _)| head).trim_end(),
    };
    (!value.trim().is_empty()).then(|| (key, value.to_string()))
}

/// Parses `.env` contents; later assignments override earlier ones.
pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(parse_line)
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
