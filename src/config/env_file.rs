use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Read a dotenv-style file into a map.
///
/// Accepts `KEY=VALUE`, an optional leading `export`, single or double
/// quoted values, blank lines and `#` comments. Lines without `=` are skipped
/// rather than rejected since these files are owned by the services, not by
/// us. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading env file {}", path.display()))?;
    Ok(parse_env(&content))
}

/// Look up a single key in an env file.
pub fn lookup(path: &Path, key: &str) -> Result<Option<String>> {
    Ok(read_env_file(path)?.remove(key))
}

fn parse_env(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
