//! Hooks de plantilla y worker en segundo plano que inicializa los
//! refinamientos de cada plantilla nueva.
//!
//! La petición que guarda la plantilla sólo encola el id; el worker procesa
//! la cola de uno en uno, con un límite de tiempo por trabajo. Ningún error
//! sale del worker: todo acaba en el log y en el `Status` compartido.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    app_state::{lock_status, Status},
    config::TaxonomyOptions,
    error::RegistryError,
    models::Template,
    refinement::{self, InitSummary},
    store::{SharedStore, TaxonomyStore},
};

pub type PostSaveHook = Arc<dyn Fn(&Template) + Send + Sync>;

/// Callbacks que se disparan tras guardar una plantilla.
#[derive(Clone, Default)]
pub struct TemplateHooks {
    post_save: Vec<PostSaveHook>,
}

impl TemplateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_post_save<F>(&mut self, hook: F)
    where
        F: Fn(&Template) + Send + Sync + 'static,
    {
        self.post_save.push(Arc::new(hook));
    }

    pub fn fire_post_save(&self, template: &Template) {
        for hook in &self.post_save {
            hook(template);
        }
    }

    pub fn len(&self) -> usize {
        self.post_save.len()
    }
}

/// Resultado de un trabajo de refinamiento.
#[derive(Debug)]
pub enum JobOutcome {
    Done(InitSummary),
    Failed(RegistryError),
    TimedOut(Duration),
    /// La tarea del trabajo terminó con pánico o fue cancelada.
    Aborted(String),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Done(summary) => write!(f, "{summary}"),
            JobOutcome::Failed(err) => write!(f, "Error en la inicialización: {err}"),
            JobOutcome::TimedOut(limit) => write!(
                f,
                "La inicialización superó el límite de {limit:?} y se abandonó."
            ),
            JobOutcome::Aborted(reason) => {
                write!(f, "El trabajo terminó de forma anómala: {reason}")
            }
        }
    }
}

/// Carga la plantilla `template_id` e inicializa sus refinamientos bajo
/// `limit`.
pub async fn run_refinement_job(
    store: &dyn TaxonomyStore,
    template_id: &str,
    options: &TaxonomyOptions,
    limit: Duration,
) -> JobOutcome {
    let job = async {
        let template = store.template_by_id(template_id).await?;
        refinement::init_refinements(store, &template, options).await
    };

    match tokio::time::timeout(limit, job).await {
        Ok(Ok(summary)) => JobOutcome::Done(summary),
        Ok(Err(err)) => {
            error!("Trabajo de refinamiento para {} fallido: {}", template_id, err);
            JobOutcome::Failed(err)
        }
        Err(_) => {
            error!(
                "Trabajo de refinamiento para {} cancelado tras {:?}",
                template_id, limit
            );
            JobOutcome::TimedOut(limit)
        }
    }
}

/// Cola de trabajos de refinamiento servida por una única tarea tokio.
#[derive(Clone)]
pub struct RefinementWorker {
    sender: mpsc::UnboundedSender<String>,
    status: Arc<Mutex<Status>>,
}

impl RefinementWorker {
    pub fn spawn(
        store: SharedStore,
        options: TaxonomyOptions,
        limit: Duration,
        status: Arc<Mutex<Status>>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let worker_status = status.clone();

        let handle = tokio::spawn(async move {
            while let Some(template_id) = receiver.recv().await {
                {
                    let mut status = lock_status(&worker_status);
                    status.is_busy = true;
                    status.message = format!("Inicializando refinamientos de {template_id}...");
                }

                // cada trabajo en su propia tarea: un pánico no detiene la cola
                let job_store = store.clone();
                let job_options = options.clone();
                let job_id = template_id.clone();
                let job = tokio::spawn(async move {
                    run_refinement_job(job_store.as_ref(), &job_id, &job_options, limit).await
                });
                let outcome = match job.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(
                            "El trabajo de refinamiento para {} terminó de forma anómala: {}",
                            template_id, err
                        );
                        JobOutcome::Aborted(err.to_string())
                    }
                };

                let mut status = lock_status(&worker_status);
                status.pending_jobs = status.pending_jobs.saturating_sub(1);
                status.is_busy = status.pending_jobs > 0;
                status.message = format!("Plantilla {template_id}: {outcome}");
            }
            info!("Cola de refinamientos cerrada, worker detenido.");
        });

        (Self { sender, status }, handle)
    }

    /// Encola la plantilla; devuelve `false` si el worker ya no acepta
    /// trabajos.
    pub fn enqueue(&self, template_id: &str) -> bool {
        lock_status(&self.status).pending_jobs += 1;
        match self.sender.send(template_id.to_string()) {
            Ok(()) => true,
            Err(_) => {
                let mut status = lock_status(&self.status);
                status.pending_jobs = status.pending_jobs.saturating_sub(1);
                warn!(
                    "No se pudo encolar la plantilla {}: el worker está detenido",
                    template_id
                );
                false
            }
        }
    }
}

/// Engancha al guardado de plantillas el encolado de su inicialización.
pub fn register_refinement_hook(hooks: &mut TemplateHooks, worker: RefinementWorker) {
    hooks.on_post_save(move |template| {
        if worker.enqueue(&template.id) {
            info!("Plantilla {} encolada para refinamientos", template.id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryResult;
    use crate::memory_store::MemoryStore;
    use crate::models::{Category, NewCategory, NewRefinement, NewTemplate, Refinement};
    use crate::schema::tests::REGISTRY_XSD;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Almacén en memoria cuya lectura de plantillas puede tardar o entrar
    /// en pánico.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        delay: Duration,
        panic_on: Option<String>,
    }

    #[async_trait]
    impl TaxonomyStore for FlakyStore {
        async fn save_template(&self, new: NewTemplate) -> RegistryResult<Template> {
            self.inner.save_template(new).await
        }
        async fn template_by_id(&self, id: &str) -> RegistryResult<Template> {
            if self.panic_on.as_deref() == Some(id) {
                panic!("plantilla corrupta: {id}");
            }
            tokio::time::sleep(self.delay).await;
            self.inner.template_by_id(id).await
        }
        async fn active_template(&self, slot: &str) -> RegistryResult<Template> {
            self.inner.active_template(slot).await
        }
        async fn templates(&self) -> RegistryResult<Vec<Template>> {
            self.inner.templates().await
        }
        async fn create_refinement(&self, new: NewRefinement) -> RegistryResult<Refinement> {
            self.inner.create_refinement(new).await
        }
        async fn refinement_by_id(&self, id: &str) -> RegistryResult<Refinement> {
            self.inner.refinement_by_id(id).await
        }
        async fn refinements(&self) -> RegistryResult<Vec<Refinement>> {
            self.inner.refinements().await
        }
        async fn refinements_by_template_hash(&self, hash: &str) -> RegistryResult<Vec<Refinement>> {
            self.inner.refinements_by_template_hash(hash).await
        }
        async fn refinement_by_template_hash_and_slug(
            &self,
            hash: &str,
            slug: &str,
        ) -> RegistryResult<Refinement> {
            self.inner.refinement_by_template_hash_and_slug(hash, slug).await
        }
        async fn delete_refinements_by_template_hash(&self, hash: &str) -> RegistryResult<usize> {
            self.inner.delete_refinements_by_template_hash(hash).await
        }
        async fn create_category(&self, new: NewCategory) -> RegistryResult<Category> {
            self.inner.create_category(new).await
        }
        async fn category_by_id(&self, id: &str) -> RegistryResult<Category> {
            self.inner.category_by_id(id).await
        }
        async fn categories(&self) -> RegistryResult<Vec<Category>> {
            self.inner.categories().await
        }
        async fn categories_by_refinement(&self, refinement_id: &str) -> RegistryResult<Vec<Category>> {
            self.inner.categories_by_refinement(refinement_id).await
        }
    }

    async fn registry_template(store: &dyn TaxonomyStore) -> Template {
        store
            .save_template(NewTemplate {
                name: "res-md".into(),
                slot: "registry".into(),
                content: REGISTRY_XSD.into(),
            })
            .await
            .unwrap()
    }

    fn new_status() -> Arc<Mutex<Status>> {
        Arc::new(Mutex::new(Status::ready()))
    }

    async fn wait_idle(status: &Arc<Mutex<Status>>) {
        for _ in 0..200 {
            if lock_status(status).pending_jobs == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("el worker no terminó a tiempo");
    }

    #[test]
    fn hooks_fire_in_registration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut hooks = TemplateHooks::new();
        for expected in 0..2 {
            let calls = calls.clone();
            hooks.on_post_save(move |_| {
                assert_eq!(calls.fetch_add(1, Ordering::SeqCst), expected);
            });
        }
        let store = MemoryStore::new();
        let template = tokio_test::block_on(store.save_template(NewTemplate {
            name: "t".into(),
            slot: "registry".into(),
            content: "<xs:schema/>".into(),
        }))
        .unwrap();

        hooks.fire_post_save(&template);
        assert_eq!(hooks.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn saved_template_is_refined_in_background() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let status = new_status();
        let (worker, _handle) = RefinementWorker::spawn(
            store.clone(),
            TaxonomyOptions::default(),
            Duration::from_secs(5),
            status.clone(),
        );
        let mut hooks = TemplateHooks::new();
        register_refinement_hook(&mut hooks, worker);

        let template = store
            .save_template(NewTemplate {
                name: "res-md".into(),
                slot: "registry".into(),
                content: REGISTRY_XSD.into(),
            })
            .await
            .unwrap();
        hooks.fire_post_save(&template);
        wait_idle(&status).await;

        assert!(store.refinements_exist(&template.hash).await.unwrap());
        let status = lock_status(&status).clone();
        assert!(!status.is_busy);
        assert!(status.message.contains("3 refinamientos"), "{}", status.message);
    }

    #[tokio::test]
    async fn missing_template_is_logged_not_raised() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let status = new_status();
        let (worker, _handle) = RefinementWorker::spawn(
            store.clone(),
            TaxonomyOptions::default(),
            Duration::from_secs(5),
            status.clone(),
        );

        assert!(worker.enqueue("no-such-template"));
        wait_idle(&status).await;

        let message = lock_status(&status).message.clone();
        assert!(message.contains("no-such-template"), "{message}");
        assert!(message.contains("Error en la inicialización"), "{message}");
        assert!(store.refinements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_outcome_reports_failure() {
        let store = MemoryStore::new();
        let outcome = run_refinement_job(
            &store,
            "nope",
            &TaxonomyOptions::default(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(RegistryError::NotFound { kind: "Template", .. })
        ));
    }

    #[tokio::test]
    async fn slow_job_is_abandoned_after_limit() {
        let store = FlakyStore {
            delay: Duration::from_millis(500),
            ..Default::default()
        };
        let template = registry_template(&store).await;

        let outcome = run_refinement_job(
            &store,
            &template.id,
            &TaxonomyOptions::default(),
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(outcome, JobOutcome::TimedOut(limit) if limit == Duration::from_millis(10)));
        assert!(!store.refinements_exist(&template.hash).await.unwrap());
    }

    #[tokio::test]
    async fn worker_reports_timeout_in_status() {
        let store: SharedStore = Arc::new(FlakyStore {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        let template = registry_template(store.as_ref()).await;
        let status = new_status();
        let (worker, _handle) = RefinementWorker::spawn(
            store.clone(),
            TaxonomyOptions::default(),
            Duration::from_millis(10),
            status.clone(),
        );

        assert!(worker.enqueue(&template.id));
        wait_idle(&status).await;

        let status = lock_status(&status).clone();
        assert!(!status.is_busy);
        assert!(status.message.contains("superó el límite de 10ms"), "{}", status.message);
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_the_queue() {
        let store: SharedStore = Arc::new(FlakyStore {
            panic_on: Some("boom".into()),
            ..Default::default()
        });
        let template = registry_template(store.as_ref()).await;
        let status = new_status();
        let (worker, handle) = RefinementWorker::spawn(
            store.clone(),
            TaxonomyOptions::default(),
            Duration::from_secs(5),
            status.clone(),
        );

        assert!(worker.enqueue("boom"));
        assert!(worker.enqueue(&template.id));
        wait_idle(&status).await;

        assert!(!handle.is_finished());
        assert!(store.refinements_exist(&template.hash).await.unwrap());
        assert!(!lock_status(&status).is_busy);
    }

    #[test]
    fn aborted_outcome_is_described() {
        let outcome = JobOutcome::Aborted("task 7 panicked".into());
        assert_eq!(
            outcome.to_string(),
            "El trabajo terminó de forma anómala: task 7 panicked"
        );
    }
}
