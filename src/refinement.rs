//! Inicialización de los refinamientos de una plantilla: esquema → árbol →
//! nodos `:Refinement` y `:Category` persistidos.
//!
//! La operación es idempotente por hash de plantilla: si ya existe algún
//! refinamiento para el hash no se hace nada. Las filas se crean una a una
//! (sin transacción global), así que un fallo a mitad deja un conjunto
//! parcial que cuenta como "inicializado"; para reintentar hay que borrar
//! antes los refinamientos de ese hash.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::{
    config::TaxonomyOptions,
    error::{RegistryError, RegistryResult},
    models::{NewCategory, NewRefinement, Template},
    schema,
    store::TaxonomyStore,
    tree::{self, NodeId, TaxonomyTree},
};

/// Resumen de una inicialización de refinamientos.
#[derive(Debug, Default, Clone, Serialize)]
pub struct InitSummary {
    pub template_hash: String,
    pub skipped: bool,
    pub refinements_created: usize,
    pub categories_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for InitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return write!(
                f,
                "Refinamientos ya existentes para el hash {}, nada que hacer.",
                self.template_hash
            );
        }
        write!(
            f,
            "Resumen: {} refinamientos y {} categorías creadas para el hash {}.",
            self.refinements_created, self.categories_created, self.template_hash
        )
    }
}

/// Inicializa los refinamientos de `template`.
///
/// Cualquier error de extracción, construcción o persistencia se devuelve al
/// llamador envuelto en `RegistryError::Build`.
pub async fn init_refinements(
    store: &dyn TaxonomyStore,
    template: &Template,
    options: &TaxonomyOptions,
) -> RegistryResult<InitSummary> {
    if template.hash.trim().is_empty() {
        return Err(RegistryError::MalformedConfig(format!(
            "la plantilla {} no tiene hash de contenido",
            template.id
        )));
    }

    match build_refinements(store, template, options).await {
        Ok(summary) => {
            info!("Plantilla {}: {}", template.id, summary);
            Ok(summary)
        }
        Err(err) => {
            error!(
                "Imposible inicializar los refinamientos de la plantilla {} (hash {}): {}",
                template.id, template.hash, err
            );
            Err(RegistryError::Build {
                template_id: template.id.clone(),
                source: Box::new(err),
            })
        }
    }
}

async fn build_refinements(
    store: &dyn TaxonomyStore,
    template: &Template,
    options: &TaxonomyOptions,
) -> RegistryResult<InitSummary> {
    let mut summary = InitSummary {
        template_hash: template.hash.clone(),
        ..Default::default()
    };

    if store.refinements_exist(&template.hash).await? {
        summary.skipped = true;
        return Ok(summary);
    }

    // extracción y construcción del árbol fuera del runtime: son CPU puro y
    // así el límite de tiempo del worker también las cubre
    let content = template.content.clone();
    let build_options = options.clone();
    let template_id = template.id.clone();
    let taxonomy = tokio::task::spawn_blocking(move || -> RegistryResult<TaxonomyTree> {
        let facets = schema::extract_all_facets(&content, &build_options.targets)?;
        debug!("{} facetas encontradas en la plantilla {}", facets.len(), template_id);
        Ok(tree::build_taxonomy(&facets, &build_options))
    })
    .await
    .map_err(|err| RegistryError::Task(err.to_string()))??;
    if taxonomy.is_empty() {
        info!(
            "La plantilla {} no tiene enumeraciones en {:?}",
            template.id, options.targets
        );
    } else {
        debug!("Árbol de taxonomía con {} nodos", taxonomy.len());
    }

    for &root in taxonomy.roots() {
        let root_node = taxonomy.node(root);
        let refinement = store
            .create_refinement(NewRefinement {
                name: root_node.title.clone(),
                schema_element_name: root_node.schema_name.clone(),
                template_hash: template.hash.clone(),
            })
            .await?;
        summary.refinements_created += 1;
        summary.categories_created +=
            create_categories(store, &taxonomy, root, &refinement.id).await?;
    }

    Ok(summary)
}

/// Materializa en preorden el subárbol de `root` (sin la propia raíz).
///
/// Cada categoría se crea justo después de su padre; los hermanos siguen el
/// orden por título.
async fn create_categories(
    store: &dyn TaxonomyStore,
    taxonomy: &TaxonomyTree,
    root: NodeId,
    refinement_id: &str,
) -> RegistryResult<usize> {
    let mut pending: Vec<(NodeId, Option<String>)> = taxonomy
        .children(root)
        .map(|child| (child, None))
        .collect();
    pending.reverse();

    let mut created = 0;
    while let Some((id, parent_id)) = pending.pop() {
        let node = taxonomy.node(id);
        let category = store
            .create_category(NewCategory {
                name: node.title.clone(),
                dotted_path: node.dotted_path.clone().unwrap_or_default(),
                value: node.persisted_value(),
                parent_id,
                refinement_id: refinement_id.to_string(),
            })
            .await?;
        created += 1;

        let mut children: Vec<(NodeId, Option<String>)> = taxonomy
            .children(id)
            .map(|child| (child, Some(category.id.clone())))
            .collect();
        children.reverse();
        pending.extend(children);
    }
    Ok(created)
}
