use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

/// How a conditional whose expression can't be resolved affects the lines
/// it guards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndeterminatePolicy {
    /// Keep the guarded lines live. Nothing is silently dropped.
    #[default]
    AssumeLive,
    AssumeDead,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spec document to open when no path is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<PathBuf>,

    /// Directory searched for files pulled in by `%include` and `%{load:...}`.
    /// Defaults to the directory of the spec document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sourcedir: Option<PathBuf>,

    /// Write the document back when the outermost edit session closes.
    pub autosave: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cpu: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_os: Option<String>,

    /// Section names accepted in addition to the standard ones.
    pub extra_sections: Vec<String>,

    pub indeterminate: IndeterminatePolicy,

    /// Macros explicitly undefined, hiding document and built-in definitions.
    pub undefine: Vec<String>,

    /// Macro overrides, shadowing definitions from the document.
    pub macros: BTreeMap<String, String>,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let mut config = Self::from_toml(&content).map_err(|source| {
            ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        // Expand shell variables and tilde in the configured paths
        config.spec_path = config
            .spec_path
            .map(|path| Self::expand_path(&path).unwrap_or(path));
        config.sourcedir = config
            .sourcedir
            .map(|path| Self::expand_path(&path).unwrap_or(path));

        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from [`Config::config_path`]. `None` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/specfile-kit");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }

    fn expand_path(path: &Path) -> Option<PathBuf> {
        let path_str = path.to_string_lossy();
        match shellexpand::full(&path_str) {
            Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_path() {
        let config_path = Config::config_path();
        let path_str = config_path.to_string_lossy();

        assert!(!path_str.starts_with('~'));
        assert!(path_str.ends_with(".config/specfile-kit/config.toml"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.indeterminate, IndeterminatePolicy::AssumeLive);
        assert!(!config.autosave);
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_toml(
            r#"
autosave = true
target_cpu = "aarch64"
target_os = "linux"
extra_sections = ["generate_buildrequires_extra"]
indeterminate = "assume-dead"
undefine = ["rhel"]

[macros]
fedora = "38"
"#,
        )
        .unwrap();

        assert!(config.autosave);
        assert_eq!(config.target_cpu.as_deref(), Some("aarch64"));
        assert_eq!(config.indeterminate, IndeterminatePolicy::AssumeDead);
        assert_eq!(config.undefine, vec!["rhel".to_string()]);
        assert_eq!(config.macros.get("fedora").map(String::as_str), Some("38"));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(Config::from_toml(r#"indeterminate = "maybe""#).is_err());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test/path");
        let expanded = Config::expand_path(&path);

        assert!(expanded.is_some());
        let expanded = expanded.unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_with_env_var() {
        unsafe {
            env::set_var("SPECFILE_TEST_VAR", "/test/env/path");
        }

        let path = PathBuf::from("$SPECFILE_TEST_VAR/subdir");
        let expanded = Config::expand_path(&path);

        assert_eq!(expanded, Some(PathBuf::from("/test/env/path/subdir")));

        unsafe {
            env::remove_var("SPECFILE_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_path_with_absolute_path() {
        let path = PathBuf::from("/absolute/path");
        let expanded = Config::expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let non_existent_config = temp_dir.path().join("nonexistent.toml");

        let result = Config::load_from_path(&non_existent_config).unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_load_config_file_with_bad_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "autosave = [").unwrap();

        let result = Config::load_from_path(&config_file);

        assert!(matches!(result, Err(ConfigError::ConfigParseError { .. })));
    }

    #[test]
    fn test_load_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_file,
            "spec_path = \"/tmp/test.spec\"\nautosave = true\ntarget_cpu = \"x86_64\"\n\n[macros]\nfedora = \"37\"\n",
        )
        .unwrap();

        let loaded_config = Config::load_from_path(&config_file).unwrap().unwrap();

        let mut expected = Config {
            spec_path: Some(PathBuf::from("/tmp/test.spec")),
            autosave: true,
            target_cpu: Some("x86_64".to_string()),
            ..Config::default()
        };
        expected.macros.insert("fedora".to_string(), "37".to_string());
        assert_eq!(loaded_config, expected);
    }

    #[test]
    fn test_config_with_env_var_in_toml() {
        unsafe {
            env::set_var("SPECFILE_ROOT", "/custom/specs");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "spec_path = \"$SPECFILE_ROOT/foo.spec\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();

        assert_eq!(config.spec_path, Some(PathBuf::from("/custom/specs/foo.spec")));

        unsafe {
            env::remove_var("SPECFILE_ROOT");
        }
    }
}
