// Módulos de la aplicación
mod api;
mod app_state;
mod category;
mod config;
mod error;
mod facet_query;
mod memory_store;
mod models;
mod neo4j_client;
mod neo4j_store;
mod refinement;
mod schema;
mod store;
mod tree;
mod worker;

use crate::app_state::{AppState, Status};
use crate::worker::{RefinementWorker, TemplateHooks};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar el almacenamiento (memoria o Neo4j) y asegurar esquemas
    let store = store::connect_from_config(&cfg)
        .await
        .expect("Error conectando el almacenamiento");

    let status = Arc::new(Mutex::new(Status::ready()));

    // 4. Arrancar el worker de refinamientos y registrar el hook de plantillas
    let (worker, _worker_handle) = RefinementWorker::spawn(
        store.clone(),
        cfg.taxonomy.clone(),
        cfg.refinement_task_timeout,
        status.clone(),
    );
    let mut hooks = TemplateHooks::new();
    worker::register_refinement_hook(&mut hooks, worker);
    info!("{} hook(s) de plantilla registrados", hooks.len());

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        hooks: Arc::new(hooks),
        status,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir la dirección de escucha");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error en el servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
