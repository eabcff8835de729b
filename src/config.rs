//! Configuration loading for specplus.
//!
//! Configuration comes from an optional TOML file (`specplus.toml` by
//! default). Paths that users commonly write with `~` or `$VARS` are
//! expanded once at load time so the rest of the crate only ever sees
//! concrete paths.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Loads specplus configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML syntax
/// - A path cannot be expanded (e.g. an unset `$VAR`)
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    expand_paths(config)
}

/// Loads specplus configuration from a TOML string.
///
/// # Example
///
/// ```
/// use specplus::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [runner]
///     command = "bundle exec rspec"
///     port = 2222
/// "#)?;
///
/// assert_eq!(config.runner.port, 2222);
/// assert_eq!(config.project.site_file.to_str(), Some("site.yml"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    expand_paths(config)
}

/// Loads the file at `path` if it exists, otherwise returns defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config file at {}, using defaults", path.display());
        expand_paths(Config::default())
    }
}

fn expand_paths(mut config: Config) -> Result<Config> {
    config.project.base_dir = expand(&config.project.base_dir)?;
    config.runner.private_key_path = expand(&config.runner.private_key_path)?;
    Ok(config)
}

fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_is_default() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.project.base_dir, PathBuf::from("."));
        assert_eq!(config.project.inventory_file, PathBuf::from("hosts"));
        assert_eq!(config.project.spec_suffix, "_spec.rb");
        assert_eq!(config.runner.command, "rspec");
        assert_eq!(config.runner.user, "root");
    }

    #[test]
    fn test_expands_home() {
        let config = load_config_str(
            r#"
            [runner]
            private_key_path = "~/.ssh/deploy"
            "#,
        )
        .unwrap();
        assert!(!config.runner.private_key_path.starts_with("~"));
        assert!(config.runner.private_key_path.ends_with(".ssh/deploy"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(load_config_str("[project\nbase_dir = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [project]
            base_dir = "/srv/ansible"
            site_file = "main.yml"

            [runner.env]
            RSPEC_COLOR = "1"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.project.base_dir, PathBuf::from("/srv/ansible"));
        assert_eq!(config.project.site_file, PathBuf::from("main.yml"));
        assert_eq!(config.runner.env.get("RSPEC_COLOR").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_or_default(Path::new("/nonexistent/specplus.toml")).unwrap();
        assert_eq!(config.runner.port, 22);
    }
}
