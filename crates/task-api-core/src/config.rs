use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::actions::{Action, ActionRegistry};
use crate::error::{ConfigError, Result};
use crate::exec::{ExecLimits, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_SHELL};
use crate::tokens::TokenStore;

pub const DEFAULT_PORT: u16 = 8889;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONFIG_FILE: &str = "task-api.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Settings (the rendered config file)
// ---------------------------------------------------------------------------

/// The config file as written by the deployment layer. Key names follow the
/// charm options (`auth-enabled`, `tokens`, ...); `auth_enabled` is also
/// accepted, as older rendered files spell it that way.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, alias = "auth_enabled")]
    pub auth_enabled: bool,
    /// Either the raw list text or an inline YAML sequence.
    #[serde(default)]
    pub actions: serde_yaml::Value,
    /// `token: user` text, a mapping of token to user, or null.
    #[serde(default)]
    pub tokens: serde_yaml::Value,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auth_enabled: false,
            actions: serde_yaml::Value::Null,
            tokens: serde_yaml::Value::Null,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: Settings = if text.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(text)?
        };
        settings.check_limits()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    fn check_limits(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "timeout-secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "max-concurrent",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "max-output-bytes",
                reason: "must be at least 1".into(),
            });
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "shell",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Parse actions and tokens into an immutable snapshot.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let actions = match &self.actions {
            serde_yaml::Value::String(text) => ActionRegistry::parse(text)?,
            other => ActionRegistry::from_value(other.clone())?,
        };
        let tokens = TokenStore::from_value(&self.tokens)?;
        Ok(Snapshot {
            port: self.port,
            auth_enabled: self.auth_enabled,
            actions,
            tokens,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    /// Executor limits. These are fixed for the life of the process.
    pub fn limits(&self) -> ExecLimits {
        ExecLimits {
            max_concurrent: self.max_concurrent,
            max_output_bytes: self.max_output_bytes,
            shell: self.shell.clone(),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let snapshot = match self.snapshot() {
            Ok(s) => s,
            Err(e) => {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: e.to_string(),
                });
                return warnings;
            }
        };

        if snapshot.actions.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no actions configured; every request will return 404".into(),
            });
        }
        if snapshot.auth_enabled && snapshot.tokens.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "auth-enabled is true but no tokens are configured; every request will be rejected".into(),
            });
        }
        if !snapshot.auth_enabled && !snapshot.tokens.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "tokens are configured but auth-enabled is false; they are ignored".into(),
            });
        }
        for action in snapshot.actions.iter() {
            if let Some(t) = action.timeout_secs {
                if t > self.timeout_secs.saturating_mul(10) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "action '{}' timeout ({t}s) is more than 10x the default ({}s)",
                            action.name, self.timeout_secs
                        ),
                    });
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One immutable, consistent view of the reloadable configuration. Replaced
/// wholesale on reload, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub port: u16,
    pub auth_enabled: bool,
    pub actions: ActionRegistry,
    pub tokens: TokenStore,
    pub timeout: Duration,
}

impl Snapshot {
    pub fn timeout_for(&self, action: &Action) -> Duration {
        action.timeout().unwrap_or(self.timeout)
    }
}

// ---------------------------------------------------------------------------
// ConfigSource
// ---------------------------------------------------------------------------

/// Where a running server re-reads its configuration from on reload.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings> {
        Settings::load(&self.path)
    }

    pub fn load_snapshot(&self) -> Result<Snapshot> {
        self.load()?.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"
port: 9000
auth-enabled: true
actions: |
  - name: restart
    cmd: systemctl restart foo
tokens: |
  abc123: alice
timeout-secs: 5
max-concurrent: 2
max-output-bytes: 1024
shell: /bin/bash
"#;

    #[test]
    fn defaults_apply_to_empty_file() {
        let s = Settings::from_yaml_str("").unwrap();
        assert_eq!(s.port, 8889);
        assert!(!s.auth_enabled);
        assert_eq!(s.timeout_secs, 60);
        assert_eq!(s.limits(), ExecLimits::default());
        let snap = s.snapshot().unwrap();
        assert!(snap.actions.is_empty());
        assert!(snap.tokens.is_empty());
    }

    #[test]
    fn full_file_builds_snapshot() {
        let s = Settings::from_yaml_str(FULL).unwrap();
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.port, 9000);
        assert!(snap.auth_enabled);
        assert_eq!(snap.timeout, Duration::from_secs(5));
        assert_eq!(
            snap.actions.get("restart").unwrap().command,
            "systemctl restart foo"
        );
        assert_eq!(snap.tokens.lookup("abc123"), Some("alice"));
        assert_eq!(s.limits().shell, "/bin/bash");
        assert_eq!(s.limits().max_concurrent, 2);
    }

    #[test]
    fn inline_action_sequence_matches_text_form() {
        let inline = "actions:\n  - name: restart\n    cmd: systemctl restart foo\n";
        let text = "actions: |\n  - name: restart\n    cmd: systemctl restart foo\n";
        let a = Settings::from_yaml_str(inline).unwrap().snapshot().unwrap();
        let b = Settings::from_yaml_str(text).unwrap().snapshot().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn per_action_timeout_overrides_default() {
        let s = Settings::from_yaml_str(
            "timeout-secs: 5\nactions:\n  - name: a\n    cmd: 'true'\n    timeout-secs: 30\n  - name: b\n    cmd: 'true'\n",
        )
        .unwrap();
        let snap = s.snapshot().unwrap();
        let a = snap.actions.get("a").unwrap();
        let b = snap.actions.get("b").unwrap();
        assert_eq!(snap.timeout_for(a), Duration::from_secs(30));
        assert_eq!(snap.timeout_for(b), Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::from_yaml_str("prot: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn zero_limits_are_rejected() {
        for text in [
            "timeout-secs: 0",
            "max-concurrent: 0",
            "max-output-bytes: 0",
            "shell: ''",
        ] {
            let err = Settings::from_yaml_str(text).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidSetting { .. }),
                "expected InvalidSetting for {text:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn bad_tokens_fail_the_snapshot() {
        let s = Settings::from_yaml_str("tokens: \"no-separator\"\n").unwrap();
        assert!(matches!(
            s.snapshot().unwrap_err(),
            ConfigError::MalformedTokenLine { line: 1 }
        ));
    }

    #[test]
    fn underscore_auth_key_and_token_mapping_are_accepted() {
        let s = Settings::from_yaml_str(
            "auth_enabled: true\nport: 8889\nactions:\n  - name: restart\n    cmd: 'true'\ntokens:\n  abc123: alice\n  def456: bob\n",
        )
        .unwrap();
        let snap = s.snapshot().unwrap();
        assert!(snap.auth_enabled);
        assert_eq!(snap.tokens.lookup("abc123"), Some("alice"));
        assert_eq!(snap.tokens.lookup("def456"), Some("bob"));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn token_mapping_matches_text_form() {
        let mapping = Settings::from_yaml_str("tokens:\n  abc123: alice\n").unwrap();
        let text = Settings::from_yaml_str("tokens: |\n  abc123: alice\n").unwrap();
        assert_eq!(mapping.snapshot().unwrap(), text.snapshot().unwrap());
    }

    #[test]
    fn bare_tokens_key_means_no_tokens() {
        let s = Settings::from_yaml_str("auth-enabled: false\ntokens:\n").unwrap();
        assert!(s.snapshot().unwrap().tokens.is_empty());
    }

    #[test]
    fn bad_token_mapping_fails_the_snapshot() {
        let s = Settings::from_yaml_str("tokens:\n  abc123: ''\n").unwrap();
        assert!(matches!(
            s.snapshot().unwrap_err(),
            ConfigError::MalformedTokenEntry { entry: 1 }
        ));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn source_reads_current_file_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-api.yaml");
        std::fs::write(&path, "actions: \"- name: one\\n  cmd: 'true'\\n\"\n").unwrap();
        let source = ConfigSource::new(&path);
        assert_eq!(source.load_snapshot().unwrap().actions.names(), vec!["one"]);

        std::fs::write(&path, "actions: \"- name: two\\n  cmd: 'true'\\n\"\n").unwrap();
        assert_eq!(source.load_snapshot().unwrap().actions.names(), vec!["two"]);
    }

    #[test]
    fn validate_flags_auth_without_tokens() {
        let s = Settings::from_yaml_str("auth-enabled: true\nactions: \"- {name: a, cmd: 'true'}\"\n")
            .unwrap();
        let warnings = s.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("no tokens"));
    }

    #[test]
    fn validate_reports_parse_errors_as_errors() {
        let s = Settings::from_yaml_str("actions: \"- name: 'bad name'\\n  cmd: x\\n\"\n").unwrap();
        let warnings = s.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Error);
    }

    #[test]
    fn validate_clean_config_has_no_warnings() {
        let s = Settings::from_yaml_str(FULL).unwrap();
        assert!(s.validate().is_empty());
    }
}
