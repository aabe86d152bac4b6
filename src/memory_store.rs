//! Implementación en memoria de `TaxonomyStore`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{RegistryError, RegistryResult},
    models::{
        content_hash, slugify, tree_path_segment, Category, NewCategory, NewRefinement,
        NewTemplate, Refinement, Template,
    },
    store::TaxonomyStore,
};

#[derive(Debug, Default)]
struct Inner {
    templates: Vec<Template>,
    active_templates: HashMap<String, String>,
    refinements: Vec<Refinement>,
    categories: Vec<Category>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Slug `base`, `base-2`, `base-3`... no presente en `taken`.
pub(crate) fn unique_slug(base: &str, taken: &HashSet<&str>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

pub(crate) fn slug_or(name: &str, fallback: &str) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

#[async_trait]
impl TaxonomyStore for MemoryStore {
    async fn save_template(&self, new: NewTemplate) -> RegistryResult<Template> {
        let template = Template {
            id: Uuid::new_v4().to_string(),
            hash: content_hash(&new.content),
            name: new.name,
            slot: new.slot,
            content: new.content,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        inner
            .active_templates
            .insert(template.slot.clone(), template.id.clone());
        inner.templates.push(template.clone());
        Ok(template)
    }

    async fn template_by_id(&self, id: &str) -> RegistryResult<Template> {
        let inner = self.inner.read().await;
        inner
            .templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("Template", id))
    }

    async fn active_template(&self, slot: &str) -> RegistryResult<Template> {
        let inner = self.inner.read().await;
        inner
            .active_templates
            .get(slot)
            .and_then(|id| inner.templates.iter().find(|t| &t.id == id))
            .cloned()
            .ok_or_else(|| RegistryError::not_found("Template activo", slot))
    }

    async fn templates(&self) -> RegistryResult<Vec<Template>> {
        Ok(self.inner.read().await.templates.clone())
    }

    async fn create_refinement(&self, new: NewRefinement) -> RegistryResult<Refinement> {
        let mut inner = self.inner.write().await;
        let same_hash: Vec<&Refinement> = inner
            .refinements
            .iter()
            .filter(|r| r.template_hash == new.template_hash)
            .collect();

        if same_hash
            .iter()
            .any(|r| r.schema_element_name == new.schema_element_name)
        {
            return Err(RegistryError::Conflict(format!(
                "ya existe el refinamiento '{}' para el hash {}",
                new.schema_element_name, new.template_hash
            )));
        }

        let taken: HashSet<&str> = same_hash.iter().map(|r| r.slug.as_str()).collect();
        let slug = unique_slug(&slug_or(&new.name, "refinement"), &taken);

        let refinement = Refinement {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            slug,
            schema_element_name: new.schema_element_name,
            template_hash: new.template_hash,
        };
        inner.refinements.push(refinement.clone());
        Ok(refinement)
    }

    async fn refinement_by_id(&self, id: &str) -> RegistryResult<Refinement> {
        let inner = self.inner.read().await;
        inner
            .refinements
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("Refinement", id))
    }

    async fn refinements(&self) -> RegistryResult<Vec<Refinement>> {
        Ok(self.inner.read().await.refinements.clone())
    }

    async fn refinements_by_template_hash(&self, hash: &str) -> RegistryResult<Vec<Refinement>> {
        let inner = self.inner.read().await;
        Ok(inner
            .refinements
            .iter()
            .filter(|r| r.template_hash == hash)
            .cloned()
            .collect())
    }

    async fn refinement_by_template_hash_and_slug(
        &self,
        hash: &str,
        slug: &str,
    ) -> RegistryResult<Refinement> {
        let inner = self.inner.read().await;
        inner
            .refinements
            .iter()
            .find(|r| r.template_hash == hash && r.slug == slug)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("Refinement", format!("{hash}/{slug}")))
    }

    async fn delete_refinements_by_template_hash(&self, hash: &str) -> RegistryResult<usize> {
        let mut inner = self.inner.write().await;
        let doomed: HashSet<String> = inner
            .refinements
            .iter()
            .filter(|r| r.template_hash == hash)
            .map(|r| r.id.clone())
            .collect();
        inner.refinements.retain(|r| !doomed.contains(&r.id));
        inner
            .categories
            .retain(|c| !doomed.contains(&c.refinement_id));
        Ok(doomed.len())
    }

    async fn create_category(&self, new: NewCategory) -> RegistryResult<Category> {
        let mut inner = self.inner.write().await;

        if !inner.refinements.iter().any(|r| r.id == new.refinement_id) {
            return Err(RegistryError::not_found("Refinement", &new.refinement_id));
        }

        let parent_path = match &new.parent_id {
            Some(parent_id) => {
                let parent = inner
                    .categories
                    .iter()
                    .find(|c| &c.id == parent_id && c.refinement_id == new.refinement_id)
                    .ok_or_else(|| RegistryError::not_found("Category", parent_id))?;
                Some(parent.tree_path.clone())
            }
            None => None,
        };

        let slug = slug_or(&new.name, "category");
        let siblings: Vec<&Category> = inner
            .categories
            .iter()
            .filter(|c| c.refinement_id == new.refinement_id && c.parent_id == new.parent_id)
            .collect();
        if siblings.iter().any(|c| c.name == new.name && c.slug == slug) {
            return Err(RegistryError::Conflict(format!(
                "la categoría '{}' ya existe bajo el mismo padre",
                new.name
            )));
        }

        let segment = tree_path_segment(siblings.len() + 1);
        let tree_path = match parent_path {
            Some(parent_path) => format!("{parent_path}.{segment}"),
            None => segment,
        };

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            slug,
            dotted_path: new.dotted_path,
            value: new.value,
            parent_id: new.parent_id,
            refinement_id: new.refinement_id,
            tree_path,
        };
        inner.categories.push(category.clone());
        Ok(category)
    }

    async fn category_by_id(&self, id: &str) -> RegistryResult<Category> {
        let inner = self.inner.read().await;
        inner
            .categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("Category", id))
    }

    async fn categories(&self) -> RegistryResult<Vec<Category>> {
        Ok(self.inner.read().await.categories.clone())
    }

    async fn categories_by_refinement(&self, refinement_id: &str) -> RegistryResult<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut categories: Vec<Category> = inner
            .categories
            .iter()
            .filter(|c| c.refinement_id == refinement_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.tree_path.cmp(&b.tree_path));
        Ok(categories)
    }
}
