use anyhow::{Context, Result};
use rabbitkit::types::catalog_from;
use rabbitkit::{ADMIN_TAG, Catalog, DesiredUser, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("rabbitsync"))
}

/// Get the default catalog path
pub fn default_catalog_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("users.toml"))
}

/// Resolve an optional `--file` argument, expanding `~`.
pub fn resolve_path(file: Option<&str>) -> Result<PathBuf> {
    match file {
        Some(f) => Ok(expand(f)),
        None => default_catalog_path(),
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================================================
// Settings
// ============================================================================

/// Connection and timing settings from the `[settings]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Path to rabbitmqctl
    #[serde(default)]
    pub ctl: Option<String>,
    /// HOME for rabbitmqctl
    #[serde(default)]
    pub home: Option<String>,
    /// Deadline for routine commands
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// Readiness gate override
    #[serde(default)]
    pub wait: Option<WaitSettings>,
}

impl Settings {
    pub fn ctl_path(&self) -> Option<PathBuf> {
        self.ctl.as_deref().map(expand)
    }

    pub fn home_path(&self) -> Option<PathBuf> {
        self.home.as_deref().map(expand)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Readiness policy: the `[settings.wait]` table, else the defaults.
    pub fn wait_policy(&self) -> RetryPolicy {
        self.wait
            .as_ref()
            .map_or_else(RetryPolicy::readiness, WaitSettings::policy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attempts() -> u32 {
    RetryPolicy::readiness().max_attempts
}

fn default_step_secs() -> u64 {
    RetryPolicy::readiness().step_delay.as_secs()
}

fn default_timeout_secs() -> u64 {
    RetryPolicy::readiness().attempt_timeout.as_secs()
}

impl WaitSettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts,
            Duration::from_secs(self.step_secs),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Problems with a catalog's user declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("user #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("user '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("user '{name}' lists 'administrator' in tags; use `admin = true` instead")]
    ReservedTag { name: String },

    #[error("settings.wait.attempts must be at least 1")]
    NoWaitAttempts,
}

/// The catalog file: settings plus desired users.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub users: Vec<DesiredUser>,
}

impl CatalogFile {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid catalog {}", path.display()))
    }

    /// Load the catalog if the file exists, otherwise an empty one.
    ///
    /// Used by commands that only need settings.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No catalog at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate catalog TOML.
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content).context("Invalid TOML")?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.settings.wait.as_ref().is_some_and(|w| w.attempts == 0) {
            return Err(CatalogError::NoWaitAttempts);
        }

        let mut seen = HashSet::new();
        for (index, user) in self.users.iter().enumerate() {
            if user.name.trim().is_empty() {
                return Err(CatalogError::EmptyName { index: index + 1 });
            }
            if !seen.insert(user.name.as_str()) {
                return Err(CatalogError::DuplicateName(user.name.clone()));
            }
            if user.tags.contains(ADMIN_TAG) {
                return Err(CatalogError::ReservedTag {
                    name: user.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Desired users keyed by name.
    pub fn catalog(&self) -> Catalog {
        catalog_from(self.users.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbitkit::Ensure;
    use std::io::Write;

    const SAMPLE: &str = r#"
[settings]
ctl = "/usr/sbin/rabbitmqctl"
command_timeout_secs = 30

[settings.wait]
attempts = 5
step_secs = 2

[[users]]
name = "app"
password = "s3cret"
tags = ["monitoring", "management"]

[[users]]
name = "ops"
password = "hunter2"
admin = true

[[users]]
name = "guest"
ensure = "absent"
"#;

    #[test]
    fn test_parse_sample_catalog() {
        let file = CatalogFile::parse(SAMPLE).unwrap();
        assert_eq!(file.users.len(), 3);
        assert_eq!(
            file.settings.ctl_path(),
            Some(PathBuf::from("/usr/sbin/rabbitmqctl"))
        );
        assert_eq!(
            file.settings.command_timeout(),
            Some(Duration::from_secs(30))
        );

        let catalog = file.catalog();
        assert_eq!(catalog["app"].desired.sorted_tags(), vec!["management", "monitoring"]);
        assert!(catalog["ops"].desired.admin);
        assert_eq!(catalog["guest"].desired.ensure, Ensure::Absent);
        assert_eq!(catalog["guest"].desired.password, None);
    }

    #[test]
    fn test_wait_settings_fill_defaults() {
        let file = CatalogFile::parse(SAMPLE).unwrap();
        let policy = file.settings.wait_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.step_delay, Duration::from_secs(2));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_wait_table_uses_readiness_defaults() {
        let file = CatalogFile::parse("").unwrap();
        assert_eq!(file.settings.wait_policy(), RetryPolicy::readiness());
        assert!(file.users.is_empty());
    }

    #[test]
    fn test_rejects_zero_wait_attempts() {
        let err = CatalogFile::parse("[settings.wait]\nattempts = 0\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CatalogError>(),
            Some(&CatalogError::NoWaitAttempts)
        );
    }

    #[test]
    fn test_rejects_reserved_tag() {
        let err = CatalogFile::parse(
            r#"
[[users]]
name = "root"
tags = ["administrator"]
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CatalogError>(),
            Some(&CatalogError::ReservedTag {
                name: "root".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = CatalogFile::parse(
            r#"
[[users]]
name = "app"

[[users]]
name = "app"
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CatalogError>(),
            Some(&CatalogError::DuplicateName("app".to_string()))
        );
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = CatalogFile::parse("[[users]]\nname = \"  \"\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::EmptyName { index: 1 })
        ));
    }

    #[test]
    fn test_rejects_unknown_ensure() {
        assert!(CatalogFile::parse("[[users]]\nname = \"a\"\nensure = \"maybe\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = CatalogFile::load(file.path()).unwrap();
        assert_eq!(loaded.users.len(), 3);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CatalogFile::load_or_default(&dir.path().join("users.toml")).unwrap();
        assert!(loaded.users.is_empty());
        assert!(loaded.settings.ctl.is_none());
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = CatalogFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_resolve_path_expands_tilde() {
        let path = resolve_path(Some("~/users.toml")).unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("users.toml"));
    }
}
