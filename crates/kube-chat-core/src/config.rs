//! Provider configurations: presets, stored entries and the active selection.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    ChatContext,
    clock::{Clock, SystemClock},
    traits::{DurableStore, StoreError, keys, read_json, write_json},
};

/// Built-in provider preset.
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    /// Key stored in `ApiConfig::provider`.
    pub key: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// Recommended models.
    pub models: &'static [&'static str],
    pub key_pattern: Option<Regex>,
    pub description: &'static str,
}

static PROVIDERS: LazyLock<Vec<ProviderPreset>> = LazyLock::new(|| {
    vec![
        ProviderPreset {
            key: "OpenAI",
            name: "OpenAI",
            base_url: "https://api.openai.com/v1",
            models: &["gpt-4", "gpt-3.5-turbo"],
            key_pattern: Regex::new(r"^sk-[A-Za-z0-9]{32,}$").ok(),
            description: "支持 GPT-4 和 GPT-3.5 系列模型",
        },
        ProviderPreset {
            key: "Anthropic",
            name: "Anthropic",
            base_url: "https://api.anthropic.com/v1",
            models: &["claude-3-opus", "claude-3-sonnet"],
            key_pattern: Regex::new(r"^sk-ant-[A-Za-z0-9]{32,}$").ok(),
            description: "支持 Claude 系列模型",
        },
        ProviderPreset {
            key: "Custom",
            name: "自定义",
            base_url: "http://localhost:8080",
            models: &[],
            key_pattern: None,
            description: "自定义 API 端点和模型",
        },
    ]
});

/// All provider presets.
#[must_use]
pub fn providers() -> &'static [ProviderPreset] {
    &PROVIDERS
}

/// Preset by key.
#[must_use]
pub fn provider(key: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS.iter().find(|p| p.key == key)
}

/// Stored provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    #[serde(default)]
    pub selected_models: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ApiConfig {
    /// Key for display: bullets plus the last four characters.
    #[must_use]
    pub fn masked_api_key(&self) -> Option<String> {
        mask_api_key(&self.api_key)
    }
}

/// Mask an API key, keeping only its last four characters.
#[must_use]
pub fn mask_api_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    Some(format!("••••••••{tail}"))
}

/// User-entered fields for adding or editing a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigForm {
    pub name: String,
    pub provider: String,
    /// Empty keeps the stored key when editing.
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    #[serde(default)]
    pub selected_models: Vec<String>,
}

impl ApiConfigForm {
    /// Form prefilled from a provider preset.
    #[must_use]
    pub fn for_provider(preset: &ProviderPreset) -> Self {
        Self {
            provider: preset.key.to_string(),
            base_url: preset.base_url.to_string(),
            ..Self::default()
        }
    }

    /// Validate the form.
    ///
    /// # Errors
    /// Returns the first failed rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        url::Url::parse(self.base_url.trim())
            .map_err(|_| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        if self.selected_models.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::NoModels);
        }
        if !self.api_key.is_empty() {
            let pattern = provider(&self.provider).and_then(|p| p.key_pattern.as_ref());
            if pattern.is_some_and(|re| !re.is_match(&self.api_key)) {
                return Err(ConfigError::InvalidApiKey);
            }
        }
        Ok(())
    }

    fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for model in &self.selected_models {
            let model = model.trim();
            if !model.is_empty() && !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        models
    }
}

/// Provider configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("请输入配置名称")]
    MissingName,
    #[error("请输入 API 地址")]
    MissingBaseUrl,
    #[error("请输入有效的 API 地址")]
    InvalidBaseUrl(String),
    #[error("请至少选择一个模型")]
    NoModels,
    #[error("API 密钥格式不正确")]
    InvalidApiKey,
    #[error("Configuration not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Model and cluster applied to newly created sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSettings {
    pub config_id: Option<String>,
    pub model: String,
    pub cluster: String,
}

impl ActiveSettings {
    /// Resolve settings from the active configuration, falling back to the context.
    #[must_use]
    pub fn resolve(ctx: &ChatContext, active: Option<&ApiConfig>) -> Self {
        let model = active
            .and_then(|c| c.selected_models.first())
            .filter(|m| !m.is_empty())
            .cloned()
            .unwrap_or_else(|| ctx.default_model.clone());
        Self {
            config_id: active.map(|c| c.id.clone()),
            model,
            cluster: ctx.default_cluster.clone(),
        }
    }
}

/// Read all stored configurations.
///
/// # Errors
/// Returns error if the store read fails or the document is corrupt.
pub fn stored_configs<S: DurableStore + ?Sized>(store: &S) -> Result<Vec<ApiConfig>, StoreError> {
    Ok(read_json(store, keys::API_CONFIGS)?.unwrap_or_default())
}

/// Read the configuration selected as active, if it still exists.
///
/// # Errors
/// Returns error if the store read fails or the document is corrupt.
pub fn active_config<S: DurableStore + ?Sized>(store: &S) -> Result<Option<ApiConfig>, StoreError> {
    let Some(id) = store.get(keys::CURRENT_CONFIG)?.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    Ok(stored_configs(store)?.into_iter().find(|c| c.id == id))
}

/// CRUD over stored provider configurations.
pub struct ConfigStore<S: DurableStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: DurableStore> ConfigStore<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// List configurations in insertion order.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn list(&self) -> Result<Vec<ApiConfig>, ConfigError> {
        Ok(stored_configs(&*self.store)?)
    }

    /// Currently active configuration.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn active(&self) -> Result<Option<ApiConfig>, ConfigError> {
        Ok(active_config(&*self.store)?)
    }

    /// Add a configuration. The first one added becomes active.
    ///
    /// # Errors
    /// Returns error if validation or the write fails.
    pub fn add(&self, form: &ApiConfigForm) -> Result<ApiConfig, ConfigError> {
        form.validate()?;
        let now = self.clock.now_millis();
        let config = ApiConfig {
            id: Uuid::new_v4().to_string(),
            name: form.name.trim().to_string(),
            provider: form.provider.clone(),
            api_key: form.api_key.clone(),
            base_url: form.base_url.trim().to_string(),
            selected_models: form.models(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut configs = stored_configs(&*self.store)?;
        configs.push(config.clone());
        write_json(&*self.store, keys::API_CONFIGS, &configs)?;
        if active_config(&*self.store)?.is_none() {
            self.store.set(keys::CURRENT_CONFIG, &config.id)?;
        }
        tracing::info!(config_id = %config.id, provider = %config.provider, "Added provider configuration");
        Ok(config)
    }

    /// Update a configuration. An empty key in the form keeps the stored one.
    ///
    /// # Errors
    /// Returns error if validation fails, the id is unknown or the write fails.
    pub fn update(&self, id: &str, form: &ApiConfigForm) -> Result<ApiConfig, ConfigError> {
        form.validate()?;
        let mut configs = stored_configs(&*self.store)?;
        let config = configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ConfigError::NotFound(id.to_string()))?;
        config.name = form.name.trim().to_string();
        config.provider.clone_from(&form.provider);
        config.base_url = form.base_url.trim().to_string();
        config.selected_models = form.models();
        if !form.api_key.is_empty() {
            config.api_key.clone_from(&form.api_key);
        }
        config.updated_at = self.clock.now_millis();
        let updated = config.clone();
        write_json(&*self.store, keys::API_CONFIGS, &configs)?;
        Ok(updated)
    }

    /// Make `id` the active configuration.
    ///
    /// # Errors
    /// Returns error if the id is unknown or the write fails.
    pub fn select(&self, id: &str) -> Result<(), ConfigError> {
        if !stored_configs(&*self.store)?.iter().any(|c| c.id == id) {
            return Err(ConfigError::NotFound(id.to_string()));
        }
        self.store.set(keys::CURRENT_CONFIG, id)?;
        Ok(())
    }

    /// Delete a configuration. Deleting the active one selects the first
    /// remaining configuration, or clears the selection.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub fn delete(&self, id: &str) -> Result<bool, ConfigError> {
        let mut configs = stored_configs(&*self.store)?;
        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            return Ok(false);
        }
        write_json(&*self.store, keys::API_CONFIGS, &configs)?;

        let current = self.store.get(keys::CURRENT_CONFIG)?;
        if current.as_deref() == Some(id) {
            let next = configs.first().map_or("", |c| c.id.as_str());
            self.store.set(keys::CURRENT_CONFIG, next)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use tokio::sync::broadcast;
    use tokio_test::assert_ok;

    use super::*;
    use crate::{clock::ManualClock, traits::ChangeFeed};

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, String>>);

    impl DurableStore for MapStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }

        fn subscribe(&self) -> ChangeFeed {
            ChangeFeed::new(0, broadcast::channel(1).1)
        }
    }

    fn configs() -> ConfigStore<MapStore> {
        ConfigStore::with_clock(Arc::new(MapStore::default()), Arc::new(ManualClock::new(10)))
    }

    fn form(name: &str, models: &[&str]) -> ApiConfigForm {
        ApiConfigForm {
            name: name.into(),
            selected_models: models.iter().map(ToString::to_string).collect(),
            ..ApiConfigForm::for_provider(provider("Custom").unwrap())
        }
    }

    #[test]
    fn validation_rules_in_order() {
        assert!(matches!(form(" ", &["m"]).validate(), Err(ConfigError::MissingName)));

        let mut missing_url = form("a", &["m"]);
        missing_url.base_url.clear();
        assert!(matches!(missing_url.validate(), Err(ConfigError::MissingBaseUrl)));

        let mut bad_url = form("a", &["m"]);
        bad_url.base_url = "not a url".into();
        assert!(matches!(bad_url.validate(), Err(ConfigError::InvalidBaseUrl(_))));

        assert!(matches!(form("a", &[]).validate(), Err(ConfigError::NoModels)));

        let mut bad_key = ApiConfigForm {
            name: "openai".into(),
            api_key: "sk-short".into(),
            selected_models: vec!["gpt-4".into()],
            ..ApiConfigForm::for_provider(provider("OpenAI").unwrap())
        };
        assert!(matches!(bad_key.validate(), Err(ConfigError::InvalidApiKey)));
        bad_key.api_key = format!("sk-{}", "a".repeat(32));
        assert_ok!(bad_key.validate());
    }

    #[test]
    fn first_added_config_becomes_active() {
        let store = configs();
        let first = store.add(&form("first", &["qwen-plus", "qwen-plus", " "])).unwrap();
        let second = store.add(&form("second", &["qwen-max"])).unwrap();

        assert_eq!(first.selected_models, vec!["qwen-plus".to_string()]);
        assert_eq!(store.active().unwrap().unwrap().id, first.id);

        assert_ok!(store.select(&second.id));
        assert_eq!(store.active().unwrap().unwrap().id, second.id);
        assert!(matches!(store.select("missing"), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn deleting_active_config_selects_first_remaining() {
        let store = configs();
        let first = store.add(&form("first", &["a"])).unwrap();
        let second = store.add(&form("second", &["b"])).unwrap();
        store.select(&second.id).unwrap();

        assert!(store.delete(&second.id).unwrap());
        assert_eq!(store.active().unwrap().unwrap().id, first.id);

        assert!(store.delete(&first.id).unwrap());
        assert!(store.active().unwrap().is_none());
        assert!(!store.delete(&first.id).unwrap());
    }

    #[test]
    fn update_keeps_key_when_form_leaves_it_empty() {
        let store = configs();
        let mut with_key = form("keyed", &["a"]);
        with_key.api_key = "secret-1234".into();
        let created = store.add(&with_key).unwrap();

        let updated = store.update(&created.id, &form("renamed", &["b"])).unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.api_key, "secret-1234");
        assert_eq!(updated.masked_api_key().as_deref(), Some("••••••••1234"));
    }

    #[test]
    fn active_settings_fall_back_to_context() {
        let ctx = ChatContext::default();
        let fallback = ActiveSettings::resolve(&ctx, None);
        assert_eq!(fallback.model, "qwen-max-latest");
        assert_eq!(fallback.cluster, "default");

        let store = configs();
        let config = store.add(&form("c", &["qwen-plus"])).unwrap();
        let resolved = ActiveSettings::resolve(&ctx, Some(&config));
        assert_eq!(resolved.model, "qwen-plus");
        assert_eq!(resolved.config_id.as_deref(), Some(config.id.as_str()));
    }
}
