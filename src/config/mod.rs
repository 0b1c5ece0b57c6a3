pub mod env_file;
pub mod model;
pub mod resolve;
pub mod validate;

use std::path::Path;

use model::DevcycleConfig;

/// Load and parse a config file, returning the config together with its raw
/// source so validation can point into it.
pub fn load_config(path: &Path) -> anyhow::Result<(DevcycleConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: DevcycleConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}

/// Load the config at `location` and validate it. Diagnostics are printed
/// to stderr; the error only carries the count.
pub fn load_checked(location: &resolve::ConfigLocation) -> anyhow::Result<DevcycleConfig> {
    let (config, source) = load_config(&location.path)?;
    let filename = location
        .path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| resolve::CONFIG_FILENAME.to_string());

    if let Err(errors) = validate::validate(&config, &source, &filename) {
        let count = errors.len();
        for err in errors {
            eprintln!("{:?}", miette::Report::new(err));
        }
        anyhow::bail!("{} has {} problem(s)", filename, count);
    }
    Ok(config)
}
