use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use crate::{config::AppConfig, store::SharedStore, worker::TemplateHooks};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SharedStore,
    pub hooks: Arc<TemplateHooks>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Estado del worker de refinamientos, tal y como lo ve `/api/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub pending_jobs: usize,
}

impl Status {
    pub fn ready() -> Self {
        Self {
            message: "Servidor listo.".to_string(),
            ..Default::default()
        }
    }
}

/// Bloquea el estado aunque otro hilo haya entrado en pánico con el lock.
pub fn lock_status(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    match status.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
