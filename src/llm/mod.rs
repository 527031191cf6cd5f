pub mod chat;
pub mod registry;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    OpenAI,
    Anthropic,
    Gemini,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAI => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Gemini => "gemini",
        }
    }

    /// Identifier prefixes that route a model name to this family.
    pub fn model_prefixes(&self) -> &'static [&'static str] {
        match self {
            ProviderFamily::OpenAI => &["gpt", "o1", "o3", "o4"],
            ProviderFamily::Anthropic => &["claude"],
            ProviderFamily::Gemini => &["gemini"],
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
/// Connection settings for one provider family.
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}
