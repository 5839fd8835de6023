use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::env;
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing;

use crate::auth;
use crate::handlers;
use crate::state::ApiState;
use crate::websocket;

pub async fn run<S>(state: ApiState, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let gateway_port = state.ctx.config.server.gateway_port;
    let host = state.ctx.config.server.host.clone();

    // Explicit origins in production; permissive is for development only.
    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let origin_list: Vec<&str> = origins.split(',').map(|s| s.trim()).collect();
        let mut cors = CorsLayer::new();
        for origin in origin_list {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS");
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::websocket_handler))
        .route("/api/v1/auth/token", post(handlers::generate_token))
        .route(
            "/api/v1/messages",
            get(handlers::pull_messages).post(handlers::send_message),
        )
        .route("/api/v1/messages/ids", post(handlers::get_messages_by_ids))
        .route("/api/v1/messages/recall", post(handlers::recall_message))
        .route("/api/v1/conversations", get(handlers::list_conversations))
        .route("/api/v1/conversations/read", post(handlers::mark_read))
        .route(
            "/api/v1/conversations/settings",
            post(handlers::update_settings),
        )
        .route(
            "/api/v1/conversations/:conv_id",
            delete(handlers::delete_conversation),
        )
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware))
                .layer(cors_layer),
        );

    let addr: SocketAddr = format!("{host}:{gateway_port}").parse()?;
    tracing::info!("Starting gateway server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
