pub mod prompt;

use crate::cli::Args;
use crate::llm::{ LlmConfig, ProviderFamily };
use self::prompt::PromptConfig;
use log::info;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Settings resolved once at start-up and handed to the registry, clients,
/// store and dispatcher. Nothing downstream reads the process environment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub openai: LlmConfig,
    pub anthropic: LlmConfig,
    pub gemini: LlmConfig,
    pub default_model: String,
    pub provider_timeout: Duration,
    pub history_context_limit: usize,
    pub prompts: Arc<PromptConfig>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

impl RelayConfig {
    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompts = match &args.prompts_path {
            Some(path) => {
                info!("Loading system prompts from: {}", path);
                prompt::load_prompts(path)?
            }
            None => Arc::new(PromptConfig::default()),
        };

        let provider = |key: &str, base_url: &Option<String>| LlmConfig {
            api_key: non_empty(key),
            base_url: base_url.as_deref().and_then(non_empty),
            max_tokens: args.max_tokens,
        };

        Ok(Self {
            openai: provider(&args.openai_api_key, &args.openai_base_url),
            anthropic: provider(&args.anthropic_api_key, &args.anthropic_base_url),
            gemini: provider(&args.gemini_api_key, &args.gemini_base_url),
            default_model: non_empty(&args.default_model).unwrap_or_else(|| "gpt-4o".to_string()),
            provider_timeout: Duration::from_secs(args.provider_timeout_secs.max(1)),
            history_context_limit: args.history_context_limit,
            prompts,
        })
    }

    pub fn llm_config(&self, family: ProviderFamily) -> &LlmConfig {
        match family {
            ProviderFamily::OpenAI => &self.openai,
            ProviderFamily::Anthropic => &self.anthropic,
            ProviderFamily::Gemini => &self.gemini,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn blank_keys_become_none() {
        let args = Args::parse_from([
            "chat-relay",
            "--jwt-secret",
            "s",
            "--openai-api-key",
            "  ",
            "--anthropic-api-key",
            "ak",
            "--default-model",
            "",
        ]);
        let config = RelayConfig::from_args(&args).unwrap();
        assert!(config.openai.api_key.is_none());
        assert_eq!(config.anthropic.api_key.as_deref(), Some("ak"));
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.llm_config(ProviderFamily::Anthropic).api_key.as_deref(), Some("ak"));
    }
}
