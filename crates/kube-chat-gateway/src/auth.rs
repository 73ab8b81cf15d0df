//! Stored credentials attached to agent requests.

use kube_chat_core::{
    DurableStore, StoreError,
    config::active_config,
    traits::keys,
};

/// Header carrying the provider API key.
pub const API_KEY_HEADER: &str = "X-OpenAI-Key";

/// Credentials read fresh from the store for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Login token sent as a bearer credential.
    pub token: Option<String>,
    /// Provider API key.
    pub api_key: Option<String>,
}

impl Credentials {
    /// Load the login token and the active provider key.
    ///
    /// The key comes from the active provider configuration, falling back to
    /// a key saved by older clients.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn load<S: DurableStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let token = store.get(keys::CREDENTIAL)?.filter(|t| !t.is_empty());
        let configured = active_config(store)?
            .map(|config| config.api_key)
            .filter(|key| !key.is_empty());
        let api_key = match configured {
            Some(key) => Some(key),
            None => store.get(keys::LEGACY_API_KEY)?.filter(|k| !k.is_empty()),
        };
        Ok(Self { token, api_key })
    }

    /// Drop the stored login token.
    ///
    /// # Errors
    /// Returns error if the store write fails.
    pub fn clear<S: DurableStore + ?Sized>(store: &S) -> Result<(), StoreError> {
        tracing::info!("Clearing stored credential");
        store.remove(keys::CREDENTIAL)
    }
}
