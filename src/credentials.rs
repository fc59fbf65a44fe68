//! Global credential store (`~/.ridgeline/credentials.json`), kept separate from the
//! per-project TOML config so API keys are never written into a file a user might
//! commit (spec §6.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

impl Credentials {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }
}

/// Resolves the effective API key for a model in priority order: the model config's
/// inline key, then the global credentials file, then an environment variable named
/// `<MODEL_ID>_API_KEY` (model id uppercased, `-` replaced with `_`).
pub fn resolve_api_key(model_id: &str, inline: Option<&str>, creds: &Credentials) -> Option<String> {
    if let Some(k) = inline {
        if !k.trim().is_empty() {
            return Some(k.to_string());
        }
    }
    if let Some(k) = creds.keys.get(model_id) {
        if !k.trim().is_empty() {
            return Some(k.clone());
        }
    }
    let env_name = format!("{}_API_KEY", model_id.to_uppercase().replace('-', "_"));
    std::env::var(env_name).ok().filter(|v| !v.trim().is_empty())
}

pub fn credentials_file() -> std::path::PathBuf {
    crate::paths::credentials_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_key_wins_over_everything() {
        let creds = Credentials {
            keys: HashMap::from([("m1".to_string(), "from-creds".to_string())]),
        };
        assert_eq!(
            resolve_api_key("m1", Some("inline-key"), &creds),
            Some("inline-key".to_string())
        );
    }

    #[test]
    fn falls_back_to_credentials_file() {
        let creds = Credentials {
            keys: HashMap::from([("m1".to_string(), "from-creds".to_string())]),
        };
        assert_eq!(resolve_api_key("m1", None, &creds), Some("from-creds".to_string()));
    }

    #[test]
    fn empty_inline_key_does_not_win() {
        let creds = Credentials {
            keys: HashMap::from([("m1".to_string(), "from-creds".to_string())]),
        };
        assert_eq!(resolve_api_key("m1", Some("  "), &creds), Some("from-creds".to_string()));
    }
}
