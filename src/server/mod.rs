pub mod api;
pub mod error;
mod extract;

use crate::auth::Authenticator;
use crate::cli::Args;
use crate::dispatcher::ChatDispatcher;
use crate::history::ConversationStore;
use self::error::ApiError;

use axum::{
    extract::{ Request, State },
    http::HeaderValue,
    middleware::{ self, Next },
    response::{ IntoResponse, Response },
    routing::{ get, patch, post },
    Router,
};
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ AllowOrigin, Any, CorsLayer };

type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub dispatcher: ChatDispatcher,
    pub authenticator: Arc<dyn Authenticator>,
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Comma separated origins, `*` for any.
    pub cors_origins: String,
    /// Requests per second across all callers; 0 disables the limiter.
    pub rate_limit_per_second: u32,
}

impl From<&Args> for RouterOptions {
    fn from(args: &Args) -> Self {
        Self {
            cors_origins: args.cors_origins.clone(),
            rate_limit_per_second: args.rate_limit_per_second,
        }
    }
}

fn cors_layer(origins: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.trim() == "*" {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

async fn rate_limit(State(limiter): State<Arc<GlobalLimiter>>, req: Request, next: Next) -> Response {
    if limiter.check().is_err() {
        warn!("Rate limit exceeded for {} {}", req.method(), req.uri().path());
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}

pub fn router(state: AppState, options: &RouterOptions) -> Router {
    let mut app = Router::new()
        .route("/api", get(api::root))
        .route("/api/", get(api::root))
        .route("/api/conversations", post(api::create_conversation).get(api::list_conversations))
        .route(
            "/api/conversations/{id}",
            patch(api::rename_conversation).delete(api::delete_conversation)
        )
        .route("/api/conversations/{id}/messages", get(api::list_messages))
        .route("/api/chat", post(api::chat))
        .with_state(state);

    if let Some(per_second) = NonZeroU32::new(options.rate_limit_per_second) {
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        app = app.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    app.layer(cors_layer(&options.cors_origins))
}

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Self {
        Self { args, state }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.args.server_addr.parse::<SocketAddr>()?;
        let app = router(self.state.clone(), &RouterOptions::from(&self.args));

        if self.args.enable_tls {
            let (Some(cert_path), Some(key_path)) = (
                self.args.tls_cert_path.as_ref(),
                self.args.tls_key_path.as_ref(),
            ) else {
                return Err("--enable-tls requires --tls-cert-path and --tls-key-path".into());
            };

            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            info!("Starting HTTPS server on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await
                .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
            info!("Starting HTTP server on: http://{}", addr);
            axum::serve(listener, app.into_make_service()).await?;
        }

        Ok(())
    }
}
