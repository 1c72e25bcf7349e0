use std::path::Path;

use crate::commands::ConfigAction;
use crate::models::settings::AppSettings;
use crate::storage::config;

pub fn run(path: &Path, effective: &AppSettings, action: ConfigAction) -> anyhow::Result<i32> {
    match action {
        ConfigAction::Show => println!("{}", serde_json::to_string_pretty(effective)?),
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Set { patch } => {
            let updated = update_settings(path, &patch)?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        ConfigAction::Reset => {
            config::save_settings(path, &AppSettings::default())?;
            tracing::info!("[config] reset {}", path.display());
        }
    }
    Ok(0)
}

/// Merges a partial JSON object into the stored settings and saves them.
pub fn update_settings(path: &Path, partial: &str) -> anyhow::Result<AppSettings> {
    let current = config::load_settings(path)?;
    let patch: serde_json::Value =
        serde_json::from_str(partial).map_err(|e| anyhow::anyhow!("Invalid JSON: {}", e))?;
    let mut current_val = serde_json::to_value(&current)?;
    merge_json(&mut current_val, &patch);
    let updated: AppSettings = serde_json::from_value(current_val)?;
    config::save_settings(path, &updated)?;
    Ok(updated)
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            match base_obj.get_mut(key) {
                Some(existing) if value.is_object() && existing.is_object() => {
                    merge_json(existing, value)
                }
                _ => {
                    base_obj.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
