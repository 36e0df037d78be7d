//! One-shot migration of pre-database JSON state.
//!
//! Earlier releases kept `config.json` and `conversations.json` next to
//! the lock file. On first start with a database, those files are copied
//! into `backup/<timestamp>/`, imported best-effort, and the `.migrated`
//! flag makes the whole pass a no-op forever after.

use std::path::Path;

use serde_json::Value;

use cd_domain::model::Role;
use cd_domain::Result;
use cd_store::Store;

use crate::lifecycle::{backup_dir, migrated_flag};

const LEGACY_FILES: &[&str] = &["config.json", "conversations.json"];

/// Import cap large enough for any legacy conversation; the legacy
/// format predates the configurable message cap.
const IMPORT_CAP: u32 = 10_000;

pub fn migrate(dir: &Path, store: &Store) -> Result<()> {
    let flag = migrated_flag(dir);
    if flag.exists() {
        return Ok(());
    }

    let present: Vec<&str> = LEGACY_FILES
        .iter()
        .copied()
        .filter(|name| dir.join(name).exists())
        .collect();

    if !present.is_empty() {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let backup = backup_dir(dir).join(stamp);
        std::fs::create_dir_all(&backup)?;

        for name in &present {
            let src = dir.join(name);
            std::fs::copy(&src, backup.join(name))?;
            tracing::info!(file = name, "legacy file backed up");

            let outcome = match *name {
                "config.json" => import_config(&src, store),
                "conversations.json" => import_conversations(&src, store),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::warn!(file = name, error = %e, "legacy import failed, continuing");
            }
        }
    }

    std::fs::write(&flag, chrono::Utc::now().to_rfc3339())?;
    tracing::info!("legacy migration complete");
    Ok(())
}

/// Legacy config was plaintext JSON with the same well-known keys.
/// Values are re-persisted through the config service's storage shape
/// (keys encrypted) by writing rows the composer understands.
fn import_config(path: &Path, store: &Store) -> Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Some(object) = value.as_object() else {
        return Ok(());
    };

    let mut entries: Vec<(String, String)> = Vec::new();
    for key in ["defaultModel", "maxMessages", "requestTimeout", "autoOpenWebUI"] {
        if let Some(v) = object.get(key) {
            entries.push((key.to_owned(), v.to_string()));
        }
    }
    if let Some(providers) = object.get("providers").and_then(|v| v.as_object()) {
        let mut sealed = providers.clone();
        for settings in sealed.values_mut() {
            if let Some(obj) = settings.as_object_mut() {
                if let Some(plain) = obj.get("apiKey").and_then(|v| v.as_str()) {
                    let encrypted = crate::services::crypto::encrypt_key(plain)?;
                    obj.insert("apiKey".to_owned(), Value::String(encrypted));
                }
            }
        }
        entries.push(("providers".to_owned(), Value::Object(sealed).to_string()));
    }

    if !entries.is_empty() {
        store.config_set_many(&entries)?;
        tracing::info!(keys = entries.len(), "legacy config imported");
    }
    Ok(())
}

/// Legacy conversations: an array of `{model, systemPrompt?, messages}`.
/// Malformed entries are skipped, not fatal.
fn import_conversations(path: &Path, store: &Store) -> Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Some(items) = value.as_array() else {
        return Ok(());
    };

    let mut imported = 0usize;
    for item in items {
        let Some(model) = item.get("model").and_then(|v| v.as_str()) else {
            continue;
        };
        let system_prompt = item.get("systemPrompt").and_then(|v| v.as_str());
        let conversation = store.create_conversation(model, system_prompt)?;

        if let Some(messages) = item.get("messages").and_then(|v| v.as_array()) {
            for message in messages {
                let role = message
                    .get("role")
                    .and_then(|v| v.as_str())
                    .and_then(Role::parse);
                let content = message.get("content").and_then(|v| v.as_str());
                if let (Some(role), Some(content)) = (role, content) {
                    if role != Role::System {
                        store.append_message(&conversation.id, role, content, IMPORT_CAP)?;
                    }
                }
            }
        }
        imported += 1;
    }
    tracing::info!(conversations = imported, "legacy conversations imported");
    Ok(())
}
