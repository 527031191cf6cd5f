pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod guard;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use auth::JwtAuthenticator;
use cli::Args;
use config::RelayConfig;
use dispatcher::{ ChatDispatcher, DispatchSettings };
use history::initialize_conversation_store;
use llm::registry::ProviderRegistry;
use log::info;
use server::{ AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("CORS Origins: {}", args.cors_origins);
    info!("Rate Limit: {}/s", args.rate_limit_per_second);
    info!("Conversation Store Type: {}", args.store_type);
    info!("Conversation Store Host: {}", args.store_host);
    info!("Default Model: {}", args.default_model);
    info!("Max Tokens: {}", args.max_tokens);
    info!("Provider Timeout: {}s", args.provider_timeout_secs);
    info!("History Context Limit: {}", args.history_context_limit);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("-------------------------");

    if args.jwt_secret.trim().is_empty() {
        return Err("JWT_SECRET must not be empty".into());
    }

    let config = RelayConfig::from_args(&args)?;
    let store = initialize_conversation_store(&args)?;
    let registry = ProviderRegistry::from_config(&config)?;
    let dispatcher = ChatDispatcher::new(
        Arc::clone(&store),
        registry,
        DispatchSettings::from(&config)
    );

    let state = AppState {
        store,
        dispatcher,
        authenticator: Arc::new(JwtAuthenticator::new(args.jwt_secret.as_bytes())),
    };

    let server = Server::new(args, state);
    server.run().await?;

    Ok(())
}
