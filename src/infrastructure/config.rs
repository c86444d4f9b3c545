use crate::domain::models::Settings;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";
const REMOTE_URL_KEYS: &[&str] = &["FOCUSDO_REMOTE_URL", "SUPABASE_URL"];
const REMOTE_ANON_KEY_KEYS: &[&str] = &["FOCUSDO_REMOTE_ANON_KEY", "SUPABASE_ANON_KEY"];

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub timer: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub anon_key: String,
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FocusDo",
                "timezone": "UTC",
                "remote": {
                    "baseUrl": null,
                    "anonKey": null
                }
            }),
        ),
        (TIMER_JSON, settings_document(&Settings::default())),
    ])
}

fn settings_document(settings: &Settings) -> serde_json::Value {
    let mut document = serde_json::json!({ "schema": 1 });
    if let (Some(object), Ok(serde_json::Value::Object(fields))) =
        (document.as_object_mut(), serde_json::to_value(settings))
    {
        object.extend(fields);
    }
    document
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        timer: read_config(&config_dir.join(TIMER_JSON))?,
    })
}

fn string_field(value: &serde_json::Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(string_field(&app, "/timezone"))
}

pub fn read_timer_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let mut timer = read_config(&config_dir.join(TIMER_JSON))?;
    if let Some(object) = timer.as_object_mut() {
        object.remove("schema");
    }
    let settings: Settings = serde_json::from_value(timer)?;
    settings.validate().map_err(InfraError::InvalidConfig)?;
    Ok(settings)
}

pub fn save_timer_settings(config_dir: &Path, settings: &Settings) -> Result<(), InfraError> {
    settings.validate().map_err(InfraError::InvalidConfig)?;
    let formatted = serde_json::to_string_pretty(&settings_document(settings))?;
    fs::write(config_dir.join(TIMER_JSON), format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_remote_config(config_dir: &Path) -> Result<RemoteConfig, InfraError> {
    load_remote_config_from_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_remote_config_from_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<RemoteConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let base_url = optional_lookup_value(&lookup, REMOTE_URL_KEYS)
        .or_else(|| string_field(&app, "/remote/baseUrl"))
        .unwrap_or_default();
    let anon_key = optional_lookup_value(&lookup, REMOTE_ANON_KEY_KEYS)
        .or_else(|| string_field(&app, "/remote/anonKey"))
        .unwrap_or_default();

    if !base_url.is_empty() {
        url::Url::parse(&base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote base url '{base_url}': {error}"))
        })?;
    }
    if base_url.is_empty() != anon_key.is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "remote store needs both a base url ({}) and an anon key ({})",
            REMOTE_URL_KEYS.join(", "),
            REMOTE_ANON_KEY_KEYS.join(", ")
        )));
    }

    Ok(RemoteConfig { base_url, anon_key })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
