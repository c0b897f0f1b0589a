//! Credential storage and resolution.
//!
//! All providers resolve secrets through [`resolve_api_key`], with a single
//! priority order: explicit argument, environment variable, the credential
//! store under the user data root, then the config file value.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{subgen_dir, write_private};
use crate::error::{Result, SubGenError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoredCredential {
    pub api_key: String,
    #[serde(default)]
    pub saved_at: String,
}

fn credentials_path() -> PathBuf {
    subgen_dir().join("credentials.json")
}

fn load_store() -> HashMap<String, StoredCredential> {
    let path = credentials_path();
    match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn save_store(store: &HashMap<String, StoredCredential>) -> Result<()> {
    let content = serde_json::to_string_pretty(store)?;
    write_private(&credentials_path(), content.as_bytes())
}

/// Save a credential for a provider. The store file is created with
/// owner-only permissions.
pub fn save_credential(provider: &str, api_key: &str) -> Result<()> {
    let mut store = load_store();
    store.insert(
        provider.to_string(),
        StoredCredential {
            api_key: api_key.to_string(),
            saved_at: Utc::now().to_rfc3339(),
        },
    );
    save_store(&store)
}

pub fn delete_credential(provider: &str) -> Result<bool> {
    let mut store = load_store();
    let removed = store.remove(provider).is_some();
    if removed {
        save_store(&store)?;
    }
    Ok(removed)
}

pub fn stored_credential(provider: &str) -> Option<String> {
    load_store().get(provider).map(|c| c.api_key.clone())
}

fn env_var_for(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" | "cloud-api" => Some("OPENAI_API_KEY"),
        "claude" => Some("ANTHROPIC_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        _ => None,
    }
}

/// Resolve the API key for a provider.
///
/// Priority: `explicit` argument > environment variable > credential store >
/// `config_value` from the config file. Returns a typed credential error
/// naming how to fix it when nothing resolves.
pub fn resolve_api_key(
    provider: &str,
    explicit: Option<&str>,
    config_value: Option<&str>,
) -> Result<String> {
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(var) = env_var_for(provider) {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                debug!("resolved {} credential from ${}", provider, var);
                return Ok(key);
            }
        }
    }
    if let Some(key) = stored_credential(provider).filter(|k| !k.is_empty()) {
        debug!("resolved {} credential from store", provider);
        return Ok(key);
    }
    if let Some(key) = config_value.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    let hint = env_var_for(provider)
        .map(|var| format!("set {} or add it under translation.api_key in config.yaml", var))
        .unwrap_or_else(|| "add it under translation.api_key in config.yaml".to_string());
    Err(SubGenError::Credential {
        provider: provider.to_string(),
        message: format!("no API key configured; {}", hint),
    })
}
