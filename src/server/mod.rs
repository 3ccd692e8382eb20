mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::pricing::PricingResolver;

pub fn build_router(resolver: PricingResolver) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/pricing", get(handlers::pricing))
        .route("/api/convert", get(handlers::convert))
        .route("/api/location", get(handlers::location))
        .route("/api/currencies", get(handlers::currencies))
        .route("/api/rates", get(handlers::rates))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, resolver: PricingResolver) -> std::io::Result<()> {
    let app = build_router(resolver);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "pricing server listening");
    eprintln!("  BodyVerse pricing server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
