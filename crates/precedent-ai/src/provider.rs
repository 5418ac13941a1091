//! Primary/fallback chat-model selection from `Settings`.

use std::sync::Arc;

use precedent_core::{ConfigError, ProviderName, Settings};
use tracing::{info, warn};

use crate::{ChatCompletionsClient, ChatModel};

/// The configured primary model and, when available, the one to fail over to.
#[derive(Clone)]
pub struct ModelPair {
    pub primary: Arc<dyn ChatModel>,
    pub fallback: Option<Arc<dyn ChatModel>>,
}

impl ModelPair {
    pub fn new(primary: Arc<dyn ChatModel>, fallback: Option<Arc<dyn ChatModel>>) -> Self {
        Self { primary, fallback }
    }

    /// Primary first, then the fallback if one exists.
    pub fn in_order(&self) -> impl Iterator<Item = &Arc<dyn ChatModel>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }
}

impl std::fmt::Debug for ModelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPair")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|m| m.name()))
            .finish()
    }
}

/// Builds chat clients for whichever backends the settings name.
pub struct ProviderSelector {
    settings: Settings,
}

impl ProviderSelector {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Parse a provider name, rejecting anything unrecognised.
    pub fn resolve(name: &str) -> Result<ProviderName, ConfigError> {
        name.parse()
    }

    /// Build a client for one backend. Fails if its API key is not configured.
    pub fn build(&self, provider: ProviderName) -> Result<Arc<dyn ChatModel>, ConfigError> {
        let key = self
            .settings
            .api_key(provider)
            .ok_or(ConfigError::MissingCredential {
                provider,
                var: provider.key_var(),
            })?;
        let client = ChatCompletionsClient::new(
            provider,
            key,
            self.settings.model_name(provider),
            self.settings.request_timeout,
            self.settings.retry,
        )
        .map_err(|e| ConfigError::Invalid(format!("cannot build {provider} client: {e}")))?;
        Ok(Arc::new(client))
    }

    /// The backend to fail over to, if any. Only an OpenAI primary gets a
    /// fallback, and only when a Mistral key is present.
    pub fn fallback_for(&self, primary: ProviderName) -> Option<ProviderName> {
        match primary {
            ProviderName::OpenAi if self.settings.api_key(ProviderName::Mistral).is_some() => {
                Some(ProviderName::Mistral)
            }
            _ => None,
        }
    }

    pub fn select(&self) -> Result<ModelPair, ConfigError> {
        let primary_name = self.settings.llm_provider;
        let primary = self.build(primary_name)?;

        let fallback = match self.fallback_for(primary_name) {
            Some(name) => match self.build(name) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(error = %e, "fallback model unavailable");
                    None
                }
            },
            None => None,
        };

        info!(
            primary = primary.name(),
            fallback = fallback.as_ref().map(|m| m.name()).unwrap_or("none"),
            "selected chat models"
        );
        Ok(ModelPair { primary, fallback })
    }
}
