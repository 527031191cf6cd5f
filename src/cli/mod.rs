use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8001")]
    pub server_addr: String,

    /// Comma separated list of origins allowed by CORS ("*" allows any).
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Global request rate limit, in requests per second.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "20")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    // --- Auth Args ---
    /// HS256 secret used to verify bearer tokens.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    // --- Conversation Store Args ---
    /// Conversation store type (memory, redis)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    pub store_type: String,

    /// Conversation store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for Redis conversation keys.
    #[arg(long, env = "STORE_PREFIX", default_value = "relay:")]
    pub store_prefix: String,

    // --- Provider Args ---
    /// API key for OpenAI-class models (gpt-*, o1*, o3*, o4*).
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub openai_api_key: String,

    /// Base URL for the OpenAI API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "OPENAI_BASE_URL")] // No default, let adapters handle defaults if None
    pub openai_base_url: Option<String>,

    /// API key for Anthropic-class models (claude-*).
    #[arg(long, env = "ANTHROPIC_API_KEY", default_value = "")]
    pub anthropic_api_key: String,

    /// Base URL for the Anthropic API (e.g., https://api.anthropic.com)
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    /// API key for Gemini-class models (gemini-*).
    #[arg(long, env = "GEMINI_API_KEY", default_value = "")]
    pub gemini_api_key: String,

    /// Base URL for the Gemini API (e.g., https://generativelanguage.googleapis.com/v1beta)
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// Model used when a request names a model no provider family recognises.
    #[arg(long, env = "DEFAULT_MODEL", default_value = "gpt-4o")]
    pub default_model: String,

    /// Upper bound on completion tokens requested from providers.
    #[arg(long, env = "MAX_TOKENS", default_value = "4096")]
    pub max_tokens: u32,

    /// Seconds to wait for the next chunk from a provider before giving up.
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "120")]
    pub provider_timeout_secs: u64,

    // --- Dispatch Args ---
    /// Number of prior messages sent to the provider as context. 0 sends none.
    #[arg(long, env = "HISTORY_CONTEXT_LIMIT", default_value = "10")]
    pub history_context_limit: usize,

    /// Optional JSON file overriding the built-in task-type system prompts.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,
}
