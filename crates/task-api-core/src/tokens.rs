//! Token store: `token: user` pairs from the `tokens` configuration value,
//! given either as text (one pair per line) or as a YAML mapping.

use std::fmt;

use serde_yaml::Value;
use subtle::ConstantTimeEq;

use crate::error::{ConfigError, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    pub user: String,
}

impl fmt::Debug for TokenEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEntry")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    entries: Vec<TokenEntry>,
}

impl TokenStore {
    /// Parse one `token: user` pair per line. Blank lines and `#` comments
    /// are skipped. The token ends at the first colon.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries: Vec<TokenEntry> = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (token, user) = line
                .split_once(':')
                .ok_or(ConfigError::MalformedTokenLine { line: line_no })?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                return Err(ConfigError::MalformedTokenLine { line: line_no });
            }
            if entries.iter().any(|e| e.token == token) {
                return Err(ConfigError::DuplicateToken { line: line_no });
            }
            entries.push(TokenEntry {
                token: token.to_string(),
                user: user.to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Build from the `tokens` value as it appears in the config file: null
    /// (no tokens), the line text accepted by [`TokenStore::parse`], or a
    /// `token: user` mapping. Mapping entries get the same checks as lines,
    /// numbered from 1 in file order.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::String(text) => return Self::parse(text),
            Value::Mapping(map) => map,
            _ => {
                return Err(ConfigError::InvalidSetting {
                    key: "tokens",
                    reason: "expected 'token: user' text or a mapping".into(),
                })
            }
        };

        let mut entries: Vec<TokenEntry> = Vec::new();
        for (idx, (token, user)) in map.iter().enumerate() {
            let entry = idx + 1;
            let (Some(token), Some(user)) = (scalar_text(token), scalar_text(user)) else {
                return Err(ConfigError::MalformedTokenEntry { entry });
            };
            if token.is_empty() || user.is_empty() {
                return Err(ConfigError::MalformedTokenEntry { entry });
            }
            if entries.iter().any(|e| e.token == token) {
                return Err(ConfigError::DuplicateTokenEntry { entry });
            }
            entries.push(TokenEntry { token, user });
        }
        Ok(Self { entries })
    }

    /// Resolve a presented token to its user label.
    ///
    /// Every entry is compared, matched or not, so timing does not reveal
    /// which (or whether a) prefix matched.
    pub fn lookup(&self, token: &str) -> Option<&str> {
        let candidate = token.as_bytes();
        let mut found = None;
        for entry in &self.entries {
            if bool::from(entry.token.as_bytes().ct_eq(candidate)) {
                found = Some(entry.user.as_str());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct user labels, in configuration order.
    pub fn users(&self) -> Vec<&str> {
        let mut users: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !users.contains(&e.user.as_str()) {
                users.push(&e.user);
            }
        }
        users
    }
}

/// Strings and numbers are accepted as text; a numeric token such as
/// `12345` is common in hand-written files.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
