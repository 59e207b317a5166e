use std::path::Path;

use anyhow::Context;
use task_api_core::config::{Settings, WarnLevel};

use crate::output::{print_json, print_table};

pub fn run(config: &Path, json: bool) -> anyhow::Result<()> {
    let settings = Settings::load(config)
        .with_context(|| format!("failed to load config from {}", config.display()))?;
    let warnings = settings.validate();
    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);

    // Only describe the snapshot when it actually parses.
    let snapshot = if has_errors {
        None
    } else {
        Some(settings.snapshot()?)
    };

    if json {
        let actions: Vec<serde_json::Value> = snapshot
            .iter()
            .flat_map(|s| {
                s.actions.iter().map(move |a| {
                    serde_json::json!({
                        "name": a.name,
                        "command": a.command,
                        "timeout_secs": s.timeout_for(a).as_secs(),
                    })
                })
            })
            .collect();
        let value = serde_json::json!({
            "valid": !has_errors,
            "port": settings.port,
            "auth_enabled": settings.auth_enabled,
            "tokens": snapshot.as_ref().map(|s| s.tokens.len()),
            "actions": actions,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
        if let Some(snapshot) = &snapshot {
            let auth = if snapshot.auth_enabled {
                format!(
                    "enabled ({} tokens, users: {})",
                    snapshot.tokens.len(),
                    snapshot.tokens.users().join(", ")
                )
            } else {
                "disabled".to_string()
            };
            println!("port: {}", snapshot.port);
            println!("auth: {auth}");
            println!();
            if snapshot.actions.is_empty() {
                println!("No actions configured.");
            } else {
                let rows = snapshot
                    .actions
                    .iter()
                    .map(|a| {
                        vec![
                            a.name.clone(),
                            format!("{}s", snapshot.timeout_for(a).as_secs()),
                            a.command.clone(),
                        ]
                    })
                    .collect();
                print_table(&["NAME", "TIMEOUT", "COMMAND"], rows);
            }
        }
    }

    if has_errors {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
