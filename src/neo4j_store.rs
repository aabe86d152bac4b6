//! Implementación de `TaxonomyStore` sobre Neo4j.
//!
//! Grafo:
//!   (:Template {id, name, slot, content, hash, created_at, active})
//!   (:Refinement {id, name, slug, schema_element_name, template_hash})
//!     -[:HAS_CATEGORY]->(:Category {id, name, slug, dotted_path, value,
//!                                   parent_id, refinement_id, tree_path})
//!   (:Category)-[:HAS_CHILD]->(:Category)
//!
//! `parent_id` se guarda como cadena vacía en las categorías raíz.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Query, Row};
use uuid::Uuid;

use crate::{
    config::Neo4jConfig,
    error::{RegistryError, RegistryResult},
    memory_store::{slug_or, unique_slug},
    models::{
        content_hash, tree_path_segment, Category, NewCategory, NewRefinement, NewTemplate,
        Refinement, Template,
    },
    neo4j_client,
    store::TaxonomyStore,
};

const TEMPLATE_COLUMNS: &str = "t.id AS id, t.name AS name, t.slot AS slot, t.content AS content,
     t.hash AS hash, t.created_at AS created_at";

const REFINEMENT_COLUMNS: &str = "r.id AS id, r.name AS name, r.slug AS slug,
     r.schema_element_name AS schema_element_name, r.template_hash AS template_hash";

const CATEGORY_COLUMNS: &str = "c.id AS id, c.name AS name, c.slug AS slug,
     c.dotted_path AS dotted_path, c.value AS value, c.parent_id AS parent_id,
     c.refinement_id AS refinement_id, c.tree_path AS tree_path";

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub async fn connect(cfg: &Neo4jConfig) -> anyhow::Result<Self> {
        let graph = neo4j_client::connect_from_config(cfg).await?;
        Ok(Self { graph })
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        neo4j_client::ensure_schema(&self.graph).await
    }

    async fn rows(&self, q: Query) -> RegistryResult<Vec<Row>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn refinements_where(&self, q: Query) -> RegistryResult<Vec<Refinement>> {
        self.rows(q).await?.iter().map(refinement_from_row).collect()
    }

    async fn categories_where(&self, q: Query) -> RegistryResult<Vec<Category>> {
        self.rows(q).await?.iter().map(category_from_row).collect()
    }
}

fn text(row: &Row, key: &str) -> RegistryResult<String> {
    row.get::<String>(key)
        .ok_or_else(|| RegistryError::Storage(format!("Falta campo '{key}' en resultado de Neo4j")))
}

fn template_from_row(row: &Row) -> RegistryResult<Template> {
    let created_at = text(row, "created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RegistryError::Storage(format!("Fecha inválida en plantilla: {e}")))?;
    Ok(Template {
        id: text(row, "id")?,
        name: text(row, "name")?,
        slot: text(row, "slot")?,
        content: text(row, "content")?,
        hash: text(row, "hash")?,
        created_at,
    })
}

fn refinement_from_row(row: &Row) -> RegistryResult<Refinement> {
    Ok(Refinement {
        id: text(row, "id")?,
        name: text(row, "name")?,
        slug: text(row, "slug")?,
        schema_element_name: text(row, "schema_element_name")?,
        template_hash: text(row, "template_hash")?,
    })
}

fn category_from_row(row: &Row) -> RegistryResult<Category> {
    let parent_id = row.get::<String>("parent_id").filter(|p| !p.is_empty());
    Ok(Category {
        id: text(row, "id")?,
        name: text(row, "name")?,
        slug: text(row, "slug")?,
        dotted_path: text(row, "dotted_path")?,
        value: text(row, "value")?,
        parent_id,
        refinement_id: text(row, "refinement_id")?,
        tree_path: text(row, "tree_path")?,
    })
}

#[async_trait]
impl TaxonomyStore for Neo4jStore {
    async fn save_template(&self, new: NewTemplate) -> RegistryResult<Template> {
        let template = Template {
            id: Uuid::new_v4().to_string(),
            hash: content_hash(&new.content),
            name: new.name,
            slot: new.slot,
            content: new.content,
            created_at: Utc::now(),
        };

        let tx = self.graph.start_txn().await?;
        tx.run(
            query("MATCH (t:Template {slot: $slot, active: true}) SET t.active = false")
                .param("slot", template.slot.clone()),
        )
        .await?;
        tx.run(
            query(
                "CREATE (t:Template {id: $id, name: $name, slot: $slot, content: $content,
                                     hash: $hash, created_at: $created_at, active: true})",
            )
            .param("id", template.id.clone())
            .param("name", template.name.clone())
            .param("slot", template.slot.clone())
            .param("content", template.content.clone())
            .param("hash", template.hash.clone())
            .param("created_at", template.created_at.to_rfc3339()),
        )
        .await?;
        tx.commit().await?;

        Ok(template)
    }

    async fn template_by_id(&self, id: &str) -> RegistryResult<Template> {
        let cypher = format!("MATCH (t:Template {{id: $id}}) RETURN {TEMPLATE_COLUMNS}");
        let rows = self.rows(query(&cypher).param("id", id.to_string())).await?;
        rows.first()
            .map(template_from_row)
            .unwrap_or_else(|| Err(RegistryError::not_found("Template", id)))
    }

    async fn active_template(&self, slot: &str) -> RegistryResult<Template> {
        let cypher = format!(
            "MATCH (t:Template {{slot: $slot, active: true}}) RETURN {TEMPLATE_COLUMNS}
             ORDER BY t.created_at DESC LIMIT 1"
        );
        let rows = self.rows(query(&cypher).param("slot", slot.to_string())).await?;
        rows.first()
            .map(template_from_row)
            .unwrap_or_else(|| Err(RegistryError::not_found("Template activo", slot)))
    }

    async fn templates(&self) -> RegistryResult<Vec<Template>> {
        let cypher = format!("MATCH (t:Template) RETURN {TEMPLATE_COLUMNS} ORDER BY t.created_at");
        self.rows(query(&cypher))
            .await?
            .iter()
            .map(template_from_row)
            .collect()
    }

    async fn create_refinement(&self, new: NewRefinement) -> RegistryResult<Refinement> {
        let existing = self
            .refinements_by_template_hash(&new.template_hash)
            .await?;
        if existing
            .iter()
            .any(|r| r.schema_element_name == new.schema_element_name)
        {
            return Err(RegistryError::Conflict(format!(
                "ya existe el refinamiento '{}' para el hash {}",
                new.schema_element_name, new.template_hash
            )));
        }

        let taken: HashSet<&str> = existing.iter().map(|r| r.slug.as_str()).collect();
        let refinement = Refinement {
            id: Uuid::new_v4().to_string(),
            slug: unique_slug(&slug_or(&new.name, "refinement"), &taken),
            name: new.name,
            schema_element_name: new.schema_element_name,
            template_hash: new.template_hash,
        };

        self.graph
            .run(
                query(
                    "CREATE (r:Refinement {id: $id, name: $name, slug: $slug,
                                           schema_element_name: $element, template_hash: $hash})",
                )
                .param("id", refinement.id.clone())
                .param("name", refinement.name.clone())
                .param("slug", refinement.slug.clone())
                .param("element", refinement.schema_element_name.clone())
                .param("hash", refinement.template_hash.clone()),
            )
            .await?;

        Ok(refinement)
    }

    async fn refinement_by_id(&self, id: &str) -> RegistryResult<Refinement> {
        let cypher = format!("MATCH (r:Refinement {{id: $id}}) RETURN {REFINEMENT_COLUMNS}");
        let found = self
            .refinements_where(query(&cypher).param("id", id.to_string()))
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::not_found("Refinement", id))
    }

    async fn refinements(&self) -> RegistryResult<Vec<Refinement>> {
        let cypher = format!("MATCH (r:Refinement) RETURN {REFINEMENT_COLUMNS} ORDER BY r.name");
        self.refinements_where(query(&cypher)).await
    }

    async fn refinements_by_template_hash(&self, hash: &str) -> RegistryResult<Vec<Refinement>> {
        let cypher = format!(
            "MATCH (r:Refinement {{template_hash: $hash}}) RETURN {REFINEMENT_COLUMNS} ORDER BY r.name"
        );
        self.refinements_where(query(&cypher).param("hash", hash.to_string()))
            .await
    }

    async fn refinement_by_template_hash_and_slug(
        &self,
        hash: &str,
        slug: &str,
    ) -> RegistryResult<Refinement> {
        let cypher = format!(
            "MATCH (r:Refinement {{template_hash: $hash, slug: $slug}}) RETURN {REFINEMENT_COLUMNS}"
        );
        let found = self
            .refinements_where(
                query(&cypher)
                    .param("hash", hash.to_string())
                    .param("slug", slug.to_string()),
            )
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::not_found("Refinement", format!("{hash}/{slug}")))
    }

    async fn delete_refinements_by_template_hash(&self, hash: &str) -> RegistryResult<usize> {
        let count = self.refinements_by_template_hash(hash).await?.len();
        if count == 0 {
            return Ok(0);
        }
        let tx = self.graph.start_txn().await?;
        tx.run(
            query(
                "MATCH (r:Refinement {template_hash: $hash})
                 OPTIONAL MATCH (r)-[:HAS_CATEGORY]->(c:Category)
                 DETACH DELETE c, r",
            )
            .param("hash", hash.to_string()),
        )
        .await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn create_category(&self, new: NewCategory) -> RegistryResult<Category> {
        self.refinement_by_id(&new.refinement_id).await?;

        let parent_path = match &new.parent_id {
            Some(parent_id) => {
                let parent = self.category_by_id(parent_id).await?;
                if parent.refinement_id != new.refinement_id {
                    return Err(RegistryError::not_found("Category", parent_id));
                }
                Some(parent.tree_path)
            }
            None => None,
        };

        let slug = slug_or(&new.name, "category");
        let parent_key = new.parent_id.clone().unwrap_or_default();
        let sibling_cypher = format!(
            "MATCH (c:Category {{refinement_id: $rid, parent_id: $pid}}) RETURN {CATEGORY_COLUMNS}"
        );
        let siblings = self
            .categories_where(
                query(&sibling_cypher)
                    .param("rid", new.refinement_id.clone())
                    .param("pid", parent_key.clone()),
            )
            .await?;
        if siblings.iter().any(|c| c.name == new.name && c.slug == slug) {
            return Err(RegistryError::Conflict(format!(
                "la categoría '{}' ya existe bajo el mismo padre",
                new.name
            )));
        }

        let segment = tree_path_segment(siblings.len() + 1);
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            slug,
            dotted_path: new.dotted_path,
            value: new.value,
            tree_path: match parent_path {
                Some(parent_path) => format!("{parent_path}.{segment}"),
                None => segment,
            },
            parent_id: new.parent_id,
            refinement_id: new.refinement_id,
        };

        let tx = self.graph.start_txn().await?;
        tx.run(
            query(
                "MATCH (r:Refinement {id: $rid})
                 CREATE (c:Category {id: $id, name: $name, slug: $slug, dotted_path: $dotted_path,
                                     value: $value, parent_id: $pid, refinement_id: $rid,
                                     tree_path: $tree_path})
                 MERGE (r)-[:HAS_CATEGORY]->(c)",
            )
            .param("rid", category.refinement_id.clone())
            .param("id", category.id.clone())
            .param("name", category.name.clone())
            .param("slug", category.slug.clone())
            .param("dotted_path", category.dotted_path.clone())
            .param("value", category.value.clone())
            .param("pid", parent_key.clone())
            .param("tree_path", category.tree_path.clone()),
        )
        .await?;
        if category.parent_id.is_some() {
            tx.run(
                query("MATCH (p:Category {id: $pid}), (c:Category {id: $id}) MERGE (p)-[:HAS_CHILD]->(c)")
                    .param("pid", parent_key)
                    .param("id", category.id.clone()),
            )
            .await?;
        }
        tx.commit().await?;

        Ok(category)
    }

    async fn category_by_id(&self, id: &str) -> RegistryResult<Category> {
        let cypher = format!("MATCH (c:Category {{id: $id}}) RETURN {CATEGORY_COLUMNS}");
        let found = self
            .categories_where(query(&cypher).param("id", id.to_string()))
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::not_found("Category", id))
    }

    async fn categories(&self) -> RegistryResult<Vec<Category>> {
        let cypher = format!(
            "MATCH (c:Category) RETURN {CATEGORY_COLUMNS} ORDER BY c.refinement_id, c.tree_path"
        );
        self.categories_where(query(&cypher)).await
    }

    async fn categories_by_refinement(&self, refinement_id: &str) -> RegistryResult<Vec<Category>> {
        let cypher = format!(
            "MATCH (c:Category {{refinement_id: $rid}}) RETURN {CATEGORY_COLUMNS} ORDER BY c.tree_path"
        );
        self.categories_where(query(&cypher).param("rid", refinement_id.to_string()))
            .await
    }
}
