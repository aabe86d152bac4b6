//! Lecturas sobre el árbol de categorías de un refinamiento y su
//! representación para el widget de casillas de la página de búsqueda.

use std::collections::{HashMap, HashSet};

use crate::{
    error::{RegistryError, RegistryResult},
    models::{Category, FacetTreeNode},
    store::TaxonomyStore,
};

pub async fn get_by_id(store: &dyn TaxonomyStore, id: &str) -> RegistryResult<Category> {
    store.category_by_id(id).await
}

pub async fn all(store: &dyn TaxonomyStore) -> RegistryResult<Vec<Category>> {
    store.categories().await
}

pub async fn all_by_refinement(
    store: &dyn TaxonomyStore,
    refinement_id: &str,
) -> RegistryResult<Vec<Category>> {
    store.categories_by_refinement(refinement_id).await
}

/// Antepasados, la propia categoría y sus descendientes, en preorden.
fn family(categories: Vec<Category>, target: &Category) -> Vec<Category> {
    categories
        .into_iter()
        .filter(|c| c.id == target.id || c.is_ancestor_of(target) || target.is_ancestor_of(c))
        .collect()
}

/// Familia de la primera categoría (en preorden) cuyo slug empieza por
/// `parent_slug`.
pub async fn family_by_parent_slug(
    store: &dyn TaxonomyStore,
    parent_slug: &str,
    refinement_id: &str,
) -> RegistryResult<Vec<Category>> {
    let categories = store.categories_by_refinement(refinement_id).await?;
    let target = categories
        .iter()
        .find(|c| c.slug.starts_with(parent_slug))
        .cloned()
        .ok_or_else(|| RegistryError::not_found("Category", format!("{refinement_id}/{parent_slug}*")))?;
    Ok(family(categories, &target))
}

/// Familia de la primera categoría (en preorden) llamada `name`.
pub async fn family_by_name(
    store: &dyn TaxonomyStore,
    name: &str,
    refinement_id: &str,
) -> RegistryResult<Vec<Category>> {
    let categories = store.categories_by_refinement(refinement_id).await?;
    let target = categories
        .iter()
        .find(|c| c.name == name)
        .cloned()
        .ok_or_else(|| RegistryError::not_found("Category", format!("{refinement_id}/{name}")))?;
    Ok(family(categories, &target))
}

/// Árbol de facetas del refinamiento para el widget de casillas.
///
/// Con `count_mode` se añade junto a cada título el hueco donde la interfaz
/// pinta el número de resultados.
pub async fn category_tree(
    store: &dyn TaxonomyStore,
    refinement_id: &str,
    selected: &HashSet<String>,
    count_mode: bool,
) -> RegistryResult<Vec<FacetTreeNode>> {
    // el refinamiento debe existir aunque no tenga categorías
    store.refinement_by_id(refinement_id).await?;
    let categories = store.categories_by_refinement(refinement_id).await?;

    let mut children: HashMap<Option<&str>, Vec<&Category>> = HashMap::new();
    for category in &categories {
        children
            .entry(category.parent_id.as_deref())
            .or_default()
            .push(category);
    }

    Ok(children
        .get(&None)
        .map(|roots| {
            roots
                .iter()
                .map(|root| tree_node(root, &children, selected, count_mode))
                .collect()
        })
        .unwrap_or_default())
}

fn tree_node<'a>(
    category: &'a Category,
    children: &HashMap<Option<&'a str>, Vec<&'a Category>>,
    selected: &HashSet<String>,
    count_mode: bool,
) -> FacetTreeNode {
    let title = if count_mode {
        format!(
            "{} <em class='occurrences' id='{}'></em>",
            category.name, category.id
        )
    } else {
        category.name.clone()
    };

    let mut node = FacetTreeNode {
        title,
        key: category.id.clone(),
        ..Default::default()
    };
    if selected.contains(&category.id) {
        node.selected = Some(true);
        node.expand = Some(true);
    }

    let kids: Vec<FacetTreeNode> = children
        .get(&Some(category.id.as_str()))
        .map(|kids| {
            kids.iter()
                .map(|kid| tree_node(kid, children, selected, count_mode))
                .collect()
        })
        .unwrap_or_default();
    if !kids.is_empty() {
        if kids.iter().any(|k| k.selected == Some(true)) {
            node.expand = Some(true);
        }
        node.folder = Some(true);
        node.children = kids;
    }
    node
}
