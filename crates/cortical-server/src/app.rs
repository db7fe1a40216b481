//! Router assembly: hub routes, optional static files, compression and
//! request tracing.

use axum::Router;
use cortical::{Hub, build_router};
use cortical_core::ServerConfig;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full application for `hub`.
pub fn build_app(hub: Hub, config: &ServerConfig) -> Router {
    let mut router = build_router(hub, &config.ws_path);
    if let Some(dir) = &config.static_dir {
        info!(dir = %dir.display(), "Serving static files");
        router = router.fallback_service(ServeDir::new(dir));
    }
    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
