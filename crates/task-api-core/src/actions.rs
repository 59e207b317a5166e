//! Action registry: the name → command table parsed from the `actions`
//! configuration value.
//!
//! The accepted text is a YAML sequence, one mapping per action:
//!
//! ```yaml
//! - name: restart
//!   cmd: systemctl restart foo
//! - name: rotate-logs
//!   cmd: logrotate -f /etc/logrotate.conf
//!   timeout-secs: 300
//! ```
//!
//! Commands are opaque strings fixed at load time. Nothing from an HTTP
//! request is ever spliced into them.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").unwrap())
}

/// Reject names that cannot be used verbatim as a single URL path segment.
pub fn validate_action_name(name: &str) -> Result<()> {
    if !name_re().is_match(name) {
        return Err(ConfigError::InvalidActionName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub name: String,
    pub command: String,
    /// Overrides the executor-wide timeout for this action only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Action {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    name: Option<String>,
    cmd: Option<String>,
    #[serde(default, rename = "timeout-secs")]
    timeout_secs: Option<u64>,
}

/// Immutable set of actions keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Action>,
}

impl ActionRegistry {
    /// Parse the raw `actions` text. Blank text yields an empty registry.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        Self::from_value(value)
    }

    /// Build from an already-decoded YAML value (a sequence, or null).
    pub fn from_value(value: serde_yaml::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let raw: Vec<RawAction> = serde_yaml::from_value(value)?;

        let mut actions = BTreeMap::new();
        for (index, entry) in raw.into_iter().enumerate() {
            let name = entry
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .ok_or(ConfigError::MissingField {
                    index,
                    field: "name",
                })?;
            validate_action_name(&name)?;

            let command = entry.cmd.ok_or(ConfigError::MissingField {
                index,
                field: "cmd",
            })?;
            if command.trim().is_empty() {
                return Err(ConfigError::EmptyCommand(name));
            }
            if entry.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidSetting {
                    key: "timeout-secs",
                    reason: format!("action '{name}' timeout must be at least 1 second"),
                });
            }
            if actions.contains_key(&name) {
                return Err(ConfigError::DuplicateAction(name));
            }
            actions.insert(
                name.clone(),
                Action {
                    name,
                    command,
                    timeout_secs: entry.timeout_secs,
                },
            );
        }
        Ok(Self { actions })
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Action names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
- name: restart
  cmd: systemctl restart foo
- name: rotate-logs
  cmd: logrotate -f /etc/logrotate.conf
  timeout-secs: 300
";

    #[test]
    fn parses_name_and_command() {
        let reg = ActionRegistry::parse(SAMPLE).unwrap();
        assert_eq!(reg.len(), 2);
        let restart = reg.get("restart").unwrap();
        assert_eq!(restart.command, "systemctl restart foo");
        assert_eq!(restart.timeout(), None);
        assert_eq!(
            reg.get("rotate-logs").unwrap().timeout(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(reg.names(), vec!["restart", "rotate-logs"]);
    }

    #[test]
    fn reparsing_is_idempotent() {
        let a = ActionRegistry::parse(SAMPLE).unwrap();
        let b = ActionRegistry::parse(SAMPLE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn blank_text_is_empty_registry() {
        assert!(ActionRegistry::parse("").unwrap().is_empty());
        assert!(ActionRegistry::parse("  \n").unwrap().is_empty());
        assert!(ActionRegistry::parse("# nothing yet\n").unwrap().is_empty());
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = ActionRegistry::parse("- cmd: uptime\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                index: 0,
                field: "name"
            }
        ));
    }

    #[test]
    fn missing_cmd_is_rejected() {
        let err = ActionRegistry::parse("- name: ok\n  cmd: uptime\n- name: broken\n  cmd: ''\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCommand(ref n) if n == "broken"));

        let err = ActionRegistry::parse("- name: x\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                index: 0,
                field: "cmd"
            }
        ));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let text = "- name: a\n  cmd: 'true'\n- name: a\n  cmd: 'false'\n";
        let err = ActionRegistry::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAction(ref n) if n == "a"));
    }

    #[test]
    fn url_unsafe_names_are_rejected() {
        for name in ["has space", "a/b", "-reserved", "q?x", "pct%20", ".hidden"] {
            let text = format!("- name: '{name}'\n  cmd: 'true'\n");
            let err = ActionRegistry::parse(&text).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidActionName(_)),
                "expected invalid: {name}"
            );
        }
    }

    #[test]
    fn valid_names() {
        for name in ["restart", "a", "Deploy_2", "v1.2", "x-y-z"] {
            validate_action_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
        assert!(validate_action_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ActionRegistry::parse("- name: a\n  cmd: 'true'\n  timeout-secs: 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn unknown_fields_and_bad_shapes_are_yaml_errors() {
        assert!(matches!(
            ActionRegistry::parse("- name: a\n  cmd: b\n  shell: zsh\n").unwrap_err(),
            ConfigError::Yaml(_)
        ));
        assert!(matches!(
            ActionRegistry::parse("name: a\n").unwrap_err(),
            ConfigError::Yaml(_)
        ));
    }
}
