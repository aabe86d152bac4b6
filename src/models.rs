//! Modelos de dominio (plantillas, refinamientos y categorías persistidos).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Plantilla (esquema XSD) registrada en el almacén de documentos.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub slot: String,
    #[serde(skip_serializing)]
    pub content: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub slot: String,
    pub content: String,
}

/// Representa un nodo (:Refinement): una dimensión de facetas por raíz de taxonomía.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub schema_element_name: String,
    pub template_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewRefinement {
    pub name: String,
    pub schema_element_name: String,
    pub template_hash: String,
}

/// Representa un nodo (:Category) dentro del árbol de un refinamiento.
///
/// `tree_path` es la ruta materializada (`0001.0003`) que ordena el árbol en
/// preorden y permite consultar subárboles por prefijo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub dotted_path: String,
    pub value: String,
    pub parent_id: Option<String>,
    pub refinement_id: String,
    pub tree_path: String,
}

impl Category {
    /// `true` si `other` cuelga (a cualquier profundidad) de esta categoría.
    pub fn is_ancestor_of(&self, other: &Category) -> bool {
        other.refinement_id == self.refinement_id
            && other.tree_path.len() > self.tree_path.len()
            && other.tree_path.starts_with(&self.tree_path)
            && other.tree_path.as_bytes()[self.tree_path.len()] == b'.'
    }
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub dotted_path: String,
    pub value: String,
    pub parent_id: Option<String>,
    pub refinement_id: String,
}

/// Nodo del árbol de facetas tal y como lo consume el widget de casillas.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacetTreeNode {
    pub title: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FacetTreeNode>,
}

/// Hash de contenido (SHA-256 en hexadecimal) de un esquema.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Identificador apto para URL derivado de un nombre.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Ordinal de hermano usado en la ruta materializada.
pub fn tree_path_segment(ordinal: usize) -> String {
    format!("{ordinal:04}")
}
