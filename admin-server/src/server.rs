use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tokio::{
    net::TcpListener,
    signal::{self, ctrl_c},
};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info};

use crate::routes;
use crate::state::AppState;
use crate::uploads::AssetKind;

pub fn build_router(state: AppState) -> Router {
    let images = ServeDir::new(state.uploads.dir(AssetKind::Image));
    let files = ServeDir::new(state.uploads.dir(AssetKind::Document));
    let admin_ui = ServeDir::new(&state.config.admin_ui_dir);

    Router::new()
        .route(
            "/api/data/:collection",
            get(routes::list_items).post(routes::insert_item),
        )
        .route(
            "/api/data/:collection/:id",
            put(routes::update_item).delete(routes::delete_item),
        )
        .route("/api/upload-image", post(routes::upload_image))
        .route("/api/upload-file", post(routes::upload_file))
        .route("/api/build", post(routes::trigger_build))
        .route("/api/purge-cdn", post(routes::purge_cdn))
        .route("/api/maintenance/orphans", get(routes::orphan_report))
        .nest_service("/images", images)
        .nest_service("/files", files)
        .fallback_service(admin_ui)
        .layer(DefaultBodyLimit::max(state.config.body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: AppState) -> std::io::Result<()> {
    let address = state.config.address();
    let app = build_router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Admin server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Admin server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
