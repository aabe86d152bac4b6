//! Capacidad de almacenamiento de plantillas, refinamientos y categorías.
//!
//! Hay dos implementaciones, elegidas por configuración al arrancar:
//!   - `MemoryStore` (`memory_store.rs`), usada en local y en los tests.
//!   - `Neo4jStore` (`neo4j_store.rs`), sobre `neo4rs`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    config::{AppConfig, StoreBackend},
    error::{RegistryError, RegistryResult},
    memory_store::MemoryStore,
    models::{Category, NewCategory, NewRefinement, NewTemplate, Refinement, Template},
    neo4j_store::Neo4jStore,
};

#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    // --- Plantillas ---

    /// Guarda una plantilla y la deja como activa para su `slot`.
    async fn save_template(&self, new: NewTemplate) -> RegistryResult<Template>;
    async fn template_by_id(&self, id: &str) -> RegistryResult<Template>;
    async fn active_template(&self, slot: &str) -> RegistryResult<Template>;
    async fn templates(&self) -> RegistryResult<Vec<Template>>;

    // --- Refinamientos ---

    /// Falla con `Conflict` si ya existe `(template_hash, schema_element_name)`.
    async fn create_refinement(&self, new: NewRefinement) -> RegistryResult<Refinement>;
    async fn refinement_by_id(&self, id: &str) -> RegistryResult<Refinement>;
    async fn refinements(&self) -> RegistryResult<Vec<Refinement>>;
    async fn refinements_by_template_hash(&self, hash: &str) -> RegistryResult<Vec<Refinement>>;
    async fn refinement_by_template_hash_and_slug(
        &self,
        hash: &str,
        slug: &str,
    ) -> RegistryResult<Refinement>;
    /// Borra los refinamientos de un hash y, en cascada, sus categorías.
    async fn delete_refinements_by_template_hash(&self, hash: &str) -> RegistryResult<usize>;

    async fn refinements_exist(&self, hash: &str) -> RegistryResult<bool> {
        Ok(!self.refinements_by_template_hash(hash).await?.is_empty())
    }

    // --- Categorías ---

    /// El padre debe existir; falla con `Conflict` si ya hay un hermano con
    /// el mismo `(name, slug)` en el mismo refinamiento.
    async fn create_category(&self, new: NewCategory) -> RegistryResult<Category>;
    async fn category_by_id(&self, id: &str) -> RegistryResult<Category>;
    async fn categories(&self) -> RegistryResult<Vec<Category>>;
    /// Categorías del refinamiento en preorden (orden de `tree_path`).
    async fn categories_by_refinement(&self, refinement_id: &str) -> RegistryResult<Vec<Category>>;
}

pub type SharedStore = Arc<dyn TaxonomyStore>;

/// Construye el backend configurado.
pub async fn connect_from_config(cfg: &AppConfig) -> anyhow::Result<SharedStore> {
    match cfg.store_backend {
        StoreBackend::Memory => {
            info!("Usando almacenamiento en memoria.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Neo4j => {
            let neo4j = cfg.neo4j.as_ref().ok_or_else(|| {
                RegistryError::MalformedConfig("Faltan las credenciales de Neo4j".into())
            })?;
            let store = Neo4jStore::connect(neo4j).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}
