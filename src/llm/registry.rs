use std::error::Error as StdError;
use std::sync::Arc;
use log::{ debug, info };
use thiserror::Error;

use super::ProviderFamily;
use super::chat::ChatClient;
use super::chat::anthropic::AnthropicChatClient;
use super::chat::gemini::GeminiChatClient;
use super::chat::openai::OpenAIChatClient;
use crate::config::RelayConfig;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("default model '{0}' matches no provider family")]
pub struct UnroutableDefaultModel(pub String);

/// A routed model: the family that serves it and the identifier to send upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub family: ProviderFamily,
    pub model: String,
}

/// Maps a model identifier to a provider client by prefix. Every identifier is
/// routable: anything unrecognised goes to the default model, served by the
/// family that default model belongs to.
#[derive(Clone)]
pub struct ProviderRegistry {
    openai: Arc<dyn ChatClient>,
    anthropic: Arc<dyn ChatClient>,
    gemini: Arc<dyn ChatClient>,
    default: ResolvedModel,
}

impl ProviderRegistry {
    pub fn new(
        openai: Arc<dyn ChatClient>,
        anthropic: Arc<dyn ChatClient>,
        gemini: Arc<dyn ChatClient>,
        default_model: &str
    ) -> Result<Self, UnroutableDefaultModel> {
        let family = Self::family_for(default_model).ok_or_else(||
            UnroutableDefaultModel(default_model.to_string())
        )?;
        Ok(Self {
            openai,
            anthropic,
            gemini,
            default: ResolvedModel {
                family,
                model: default_model.trim().to_string(),
            },
        })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let openai = OpenAIChatClient::from_config(&config.openai)?;
        let anthropic = AnthropicChatClient::from_config(&config.anthropic)?;
        let gemini = GeminiChatClient::from_config(&config.gemini)?;

        for family in [ProviderFamily::OpenAI, ProviderFamily::Anthropic, ProviderFamily::Gemini] {
            let llm = config.llm_config(family);
            info!(
                "Provider {} configured: key={}, BaseURL={:?}",
                family,
                if llm.api_key.is_some() { "set" } else { "missing" },
                llm.base_url.as_deref().unwrap_or("adapter default")
            );
        }

        let registry = Self::new(
            Arc::new(openai),
            Arc::new(anthropic),
            Arc::new(gemini),
            &config.default_model
        )?;
        info!("Unrecognised models fall back to {} / {}", registry.default.family, registry.default.model);
        Ok(registry)
    }

    /// Family whose naming convention `model` follows, if any.
    pub fn family_for(model: &str) -> Option<ProviderFamily> {
        let model = model.trim().to_lowercase();
        [ProviderFamily::OpenAI, ProviderFamily::Anthropic, ProviderFamily::Gemini]
            .into_iter()
            .find(|family| {
                family
                    .model_prefixes()
                    .iter()
                    .any(|prefix| model.starts_with(prefix))
            })
    }

    pub fn normalize(&self, model: &str) -> ResolvedModel {
        match Self::family_for(model) {
            Some(family) =>
                ResolvedModel {
                    family,
                    model: model.trim().to_string(),
                },
            None => {
                debug!(
                    "Model '{}' matches no provider family, using {} / {}",
                    model,
                    self.default.family,
                    self.default.model
                );
                self.default.clone()
            }
        }
    }

    pub fn client(&self, family: ProviderFamily) -> Arc<dyn ChatClient> {
        match family {
            ProviderFamily::OpenAI => Arc::clone(&self.openai),
            ProviderFamily::Anthropic => Arc::clone(&self.anthropic),
            ProviderFamily::Gemini => Arc::clone(&self.gemini),
        }
    }

    pub fn resolve(&self, model: &str) -> (Arc<dyn ChatClient>, ResolvedModel) {
        let resolved = self.normalize(model);
        (self.client(resolved.family), resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::{ ChatPrompt, ChunkStream };

    struct NamedClient(ProviderFamily);

    impl ChatClient for NamedClient {
        fn family(&self) -> ProviderFamily {
            self.0
        }

        fn send(&self, _prompt: ChatPrompt) -> ChunkStream {
            Box::pin(futures::stream::empty())
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            Arc::new(NamedClient(ProviderFamily::OpenAI)),
            Arc::new(NamedClient(ProviderFamily::Anthropic)),
            Arc::new(NamedClient(ProviderFamily::Gemini)),
            "gpt-4o"
        ).unwrap()
    }

    #[test]
    fn routes_by_prefix() {
        let registry = registry();
        for (model, family) in [
            ("gpt-4o-mini", ProviderFamily::OpenAI),
            ("o1-preview", ProviderFamily::OpenAI),
            ("o3-mini", ProviderFamily::OpenAI),
            ("o4-mini", ProviderFamily::OpenAI),
            ("claude-3-5-sonnet-20241022", ProviderFamily::Anthropic),
            ("gemini-2.0-flash-exp", ProviderFamily::Gemini),
        ] {
            let (client, resolved) = registry.resolve(model);
            assert_eq!(client.family(), family, "{}", model);
            assert_eq!(resolved.model, model);
        }
    }

    #[test]
    fn unknown_models_fall_back_to_default() {
        let registry = registry();
        for model in ["llama3", "", "  ", "mistral-large", "o2-ish"] {
            let (client, resolved) = registry.resolve(model);
            assert_eq!(client.family(), ProviderFamily::OpenAI);
            assert_eq!(resolved, ResolvedModel {
                family: ProviderFamily::OpenAI,
                model: "gpt-4o".to_string(),
            });
        }
    }

    #[test]
    fn prefix_match_ignores_case_and_padding() {
        assert_eq!(ProviderRegistry::family_for(" Claude-3-opus"), Some(ProviderFamily::Anthropic));
        assert_eq!(ProviderRegistry::family_for("GEMINI-1.5-pro"), Some(ProviderFamily::Gemini));
        assert_eq!(ProviderRegistry::family_for("deepseek-chat"), None);
    }

    #[test]
    fn fallback_follows_the_default_models_family() {
        let registry = ProviderRegistry::new(
            Arc::new(NamedClient(ProviderFamily::OpenAI)),
            Arc::new(NamedClient(ProviderFamily::Anthropic)),
            Arc::new(NamedClient(ProviderFamily::Gemini)),
            "claude-3-5-haiku-20241022"
        ).unwrap();
        let (client, resolved) = registry.resolve("llama3");
        assert_eq!(client.family(), ProviderFamily::Anthropic);
        assert_eq!(resolved, ResolvedModel {
            family: ProviderFamily::Anthropic,
            model: "claude-3-5-haiku-20241022".to_string(),
        });
    }

    #[test]
    fn unroutable_default_model_is_rejected() {
        let result = ProviderRegistry::new(
            Arc::new(NamedClient(ProviderFamily::OpenAI)),
            Arc::new(NamedClient(ProviderFamily::Anthropic)),
            Arc::new(NamedClient(ProviderFamily::Gemini)),
            "llama3"
        );
        assert_eq!(result.err(), Some(UnroutableDefaultModel("llama3".to_string())));
    }
}
