use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store location used when no config names one, relative to the project root.
pub const DEFAULT_STORE_PATH: &str = ".histrail/history.sqlite3";

/// Shape shared by the project and user config files. Every value is
/// optional so the two layers can be merged key by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistrailConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub default_days: Option<u32>,
    #[serde(default)]
    pub default_weeks: Option<u32>,
}

impl HistrailConfig {
    /// `self` wins wherever it sets a value.
    #[must_use]
    pub fn layered_over(self, base: Self) -> Self {
        Self {
            store: StoreConfig {
                path: self.store.path.or(base.store.path),
            },
            retention: RetentionConfig {
                default_days: self.retention.default_days.or(base.retention.default_days),
                default_weeks: self.retention.default_weeks.or(base.retention.default_weeks),
            },
            output: self.output.or(base.output),
        }
    }
}

/// Fully resolved settings for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub store_path: PathBuf,
    pub retention: RetentionConfig,
    pub output: Option<String>,
}

/// Read `.histrail/config.toml` under `project_root`; defaults when absent.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<HistrailConfig> {
    load_file(&project_root.join(".histrail/config.toml"))
}

/// Read `<config_dir>/histrail/config.toml`; defaults when absent.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<HistrailConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(HistrailConfig::default());
    };
    load_file(&config_dir.join("histrail/config.toml"))
}

fn load_file(path: &Path) -> Result<HistrailConfig> {
    if !path.exists() {
        return Ok(HistrailConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<HistrailConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Project config layered over user config. A relative store path is
/// resolved against `project_root`.
///
/// # Errors
///
/// Returns an error when either config file is unreadable or malformed.
pub fn resolve_config(project_root: &Path) -> Result<EffectiveConfig> {
    let user = load_user_config()?;
    let project = load_project_config(project_root)?;
    Ok(effective(project_root, project.layered_over(user)))
}

fn effective(project_root: &Path, config: HistrailConfig) -> EffectiveConfig {
    let store_path = config
        .store
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
    let store_path = if store_path.is_absolute() {
        store_path
    } else {
        project_root.join(store_path)
    };
    EffectiveConfig {
        store_path,
        retention: config.retention,
        output: config.output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project_config(dir: &TempDir, content: &str) {
        let config_dir = dir.path().join(".histrail");
        std::fs::create_dir_all(&config_dir).expect("create config dir");
        std::fs::write(config_dir.join("config.toml"), content).expect("write config");
    }

    #[test]
    fn missing_project_config_uses_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = load_project_config(dir.path()).expect("load should succeed");
        assert_eq!(cfg, HistrailConfig::default());

        let resolved = effective(dir.path(), cfg);
        assert_eq!(resolved.store_path, dir.path().join(DEFAULT_STORE_PATH));
        assert_eq!(resolved.retention.default_days, None);
    }

    #[test]
    fn project_config_parses_sections() {
        let dir = TempDir::new().expect("temp dir");
        write_project_config(
            &dir,
            r#"
output = "json"

[store]
path = "var/audit.sqlite3"

[retention]
default_days = 90
"#,
        );

        let cfg = load_project_config(dir.path()).expect("load should succeed");
        assert_eq!(cfg.store.path, Some(PathBuf::from("var/audit.sqlite3")));
        assert_eq!(cfg.retention.default_days, Some(90));
        assert_eq!(cfg.output.as_deref(), Some("json"));

        let resolved = effective(dir.path(), cfg);
        assert_eq!(resolved.store_path, dir.path().join("var/audit.sqlite3"));
    }

    #[test]
    fn malformed_config_names_the_file() {
        let dir = TempDir::new().expect("temp dir");
        write_project_config(&dir, "[retention]\ndefault_days = \"soon\"\n");

        let err = load_project_config(dir.path()).expect_err("parse should fail");
        assert!(err.to_string().contains("Failed to parse"));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn project_values_override_user_values() {
        let user = HistrailConfig {
            store: StoreConfig {
                path: Some(PathBuf::from("/srv/history.sqlite3")),
            },
            retention: RetentionConfig {
                default_days: Some(30),
                default_weeks: Some(8),
            },
            output: Some("pretty".into()),
        };
        let project = HistrailConfig {
            retention: RetentionConfig {
                default_days: Some(7),
                default_weeks: None,
            },
            ..HistrailConfig::default()
        };

        let merged = project.layered_over(user);
        assert_eq!(merged.store.path, Some(PathBuf::from("/srv/history.sqlite3")));
        assert_eq!(merged.retention.default_days, Some(7));
        assert_eq!(merged.retention.default_weeks, Some(8));
        assert_eq!(merged.output.as_deref(), Some("pretty"));

        let resolved = effective(Path::new("/work/app"), merged);
        assert_eq!(resolved.store_path, PathBuf::from("/srv/history.sqlite3"));
    }
}
