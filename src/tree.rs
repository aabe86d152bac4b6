//! Árbol de taxonomía construido a partir de las enumeraciones del esquema.
//!
//! Cada enumeración `Nivel1:Nivel2:...:NivelN` se convierte en un camino de
//! nodos bajo la raíz de su faceta; los prefijos compartidos se fusionan. Los
//! nodos viven en una arena y se referencian por `NodeId`: el título sólo se
//! usa como clave de fusión entre hermanos.

use std::collections::BTreeMap;

use crate::config::TaxonomyOptions;
use crate::schema::{Enumeration, Facet};

/// Sufijo que marca el valor de una categoría padre ("todo el grupo").
pub const CATEGORY_SUFFIX: &str = "__category";
/// Prefijo del título de los nodos sintéticos.
pub const UNSPECIFIED_LABEL: &str = "unspecified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub title: String,
    /// Token del nivel tal y como aparece en el esquema.
    pub schema_name: String,
    /// `None` en la raíz de la faceta, que sólo agrupa.
    pub dotted_path: Option<String>,
    pub value: Option<String>,
    pub unspecified: bool,
    children: BTreeMap<String, NodeId>,
}

impl TreeNode {
    fn root(schema_name: &str, title: &str) -> Self {
        Self {
            title: title.to_string(),
            schema_name: schema_name.to_string(),
            dotted_path: None,
            value: None,
            unspecified: false,
            children: BTreeMap::new(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn value_as_category(&self) -> String {
        format!("{}{}", self.value.as_deref().unwrap_or_default(), CATEGORY_SUFFIX)
    }

    /// Valor con el que se persiste la categoría: los nodos con hijos usan el
    /// valor con sufijo de categoría, salvo los nodos sintéticos.
    pub fn persisted_value(&self) -> String {
        if self.has_children() && !self.unspecified {
            self.value_as_category()
        } else {
            self.value.clone().unwrap_or_default()
        }
    }
}

/// Vista estructural del árbol, útil para comparar construcciones.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    pub title: String,
    pub value: Option<String>,
    pub children: Vec<Outline>,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
}

impl TaxonomyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raíces (una por faceta) en orden de inserción.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    /// Hijos de `id` ordenados por título.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].children.values().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn ensure_root(&mut self, schema_name: &str, title: &str) -> NodeId {
        let existing = self.roots.iter().copied().find(|id| {
            let node = &self.nodes[id.0];
            node.schema_name == schema_name && node.title == title
        });
        if let Some(id) = existing {
            return id;
        }
        let id = self.push(TreeNode::root(schema_name, title));
        self.roots.push(id);
        id
    }

    /// Inserta `node` bajo `parent` o reutiliza el hermano con el mismo título.
    fn merge_child(&mut self, parent: NodeId, node: TreeNode) -> NodeId {
        if let Some(existing) = self.nodes[parent.0].children.get(&node.title) {
            return *existing;
        }
        let title = node.title.clone();
        let id = self.push(node);
        self.nodes[parent.0].children.insert(title, id);
        id
    }

    /// Añade al árbol la faceta `element_name` con sus enumeraciones.
    ///
    /// El mismo árbol se reutiliza entre facetas, de modo que se acumula una
    /// raíz por faceta.
    pub fn build(
        &mut self,
        element_name: &str,
        element_display_name: &str,
        enumerations: &[Enumeration],
        dotted_path: &str,
        create_unspecified: bool,
    ) -> &mut Self {
        let root = self.ensure_root(element_name, element_display_name);
        let all_levels: Vec<Vec<&str>> = enumerations.iter().map(Enumeration::levels).collect();

        for (current, levels) in all_levels.iter().enumerate() {
            let mut cursor = root;
            for (index, level) in levels.iter().enumerate() {
                let node = TreeNode {
                    title: level.to_string(),
                    schema_name: level.to_string(),
                    dotted_path: Some(dotted_path.to_string()),
                    value: Some(levels[..=index].join(":")),
                    unspecified: false,
                    children: BTreeMap::new(),
                };
                cursor = self.merge_child(cursor, node);
            }

            if needs_unspecified(&all_levels, current) {
                let Some(level) = levels.last() else {
                    continue;
                };
                let title = if create_unspecified {
                    format!("{UNSPECIFIED_LABEL} {level}")
                } else {
                    level.to_string()
                };
                let placeholder = TreeNode {
                    title,
                    schema_name: level.to_string(),
                    dotted_path: Some(dotted_path.to_string()),
                    value: Some(levels.join(":")),
                    unspecified: true,
                    children: BTreeMap::new(),
                };
                self.merge_child(cursor, placeholder);
            }
        }
        self
    }

    pub fn build_facet(&mut self, facet: &Facet, options: &TaxonomyOptions) -> &mut Self {
        self.build(
            &facet.element_name,
            &facet.display_name,
            &facet.enumerations,
            &facet.dotted_path,
            options.create_unspecified,
        )
    }

    #[cfg(test)]
    pub fn outline(&self, id: NodeId) -> Outline {
        let node = self.node(id);
        Outline {
            title: node.title.clone(),
            value: node.value.clone(),
            children: self.children(id).map(|child| self.outline(child)).collect(),
        }
    }
}

/// Árbol fusionado de todas las facetas.
pub fn build_taxonomy(facets: &[Facet], options: &TaxonomyOptions) -> TaxonomyTree {
    let mut tree = TaxonomyTree::new();
    for facet in facets {
        tree.build_facet(facet, options);
    }
    tree
}

/// Una enumeración de 2+ niveles necesita nodo "unspecified" si otra
/// enumeración, con más niveles, tiene el mismo token en la posición de su
/// hoja.
///
/// La comparación recorre todo el conjunto, así que no depende del orden de
/// entrada.
fn needs_unspecified(all_levels: &[Vec<&str>], current: usize) -> bool {
    let levels = &all_levels[current];
    if levels.len() < 2 {
        return false;
    }
    let position = levels.len() - 1;
    all_levels.iter().enumerate().any(|(other, other_levels)| {
        other != current
            && other_levels.len() > levels.len()
            && other_levels.get(position) == levels.last()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enums(values: &[&str]) -> Vec<Enumeration> {
        values.iter().map(|v| Enumeration::new(*v)).collect()
    }

    fn build_one(values: &[&str]) -> TaxonomyTree {
        let mut tree = TaxonomyTree::new();
        tree.build("type", "Type", &enums(values), "Resource.type", true);
        tree
    }

    fn titles(tree: &TaxonomyTree, id: NodeId) -> Vec<String> {
        tree.children(id).map(|c| tree.node(c).title.clone()).collect()
    }

    #[test]
    fn shared_prefixes_are_merged() {
        let tree = build_one(&["A:B:C", "A:B:D", "A:E"]);
        let root = tree.roots()[0];
        assert_eq!(titles(&tree, root), vec!["A"]);
        let a = tree.children(root).next().unwrap();
        assert_eq!(titles(&tree, a), vec!["B", "E"]);
        let b = tree.children(a).next().unwrap();
        assert_eq!(titles(&tree, b), vec!["C", "D"]);
        // raíz + A + B + C + D + E
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn node_values_are_colon_joined_prefixes() {
        let tree = build_one(&["A:B:C"]);
        let root = tree.roots()[0];
        let a = tree.children(root).next().unwrap();
        let b = tree.children(a).next().unwrap();
        let c = tree.children(b).next().unwrap();
        assert_eq!(tree.node(a).value.as_deref(), Some("A"));
        assert_eq!(tree.node(b).value.as_deref(), Some("A:B"));
        assert_eq!(tree.node(c).value.as_deref(), Some("A:B:C"));
        assert_eq!(tree.node(c).dotted_path.as_deref(), Some("Resource.type"));
        assert!(tree.node(root).value.is_none());
        assert!(tree.node(root).dotted_path.is_none());
        assert_eq!(tree.node(root).schema_name, "type");
    }

    #[test]
    fn unspecified_leaf_is_synthesised_for_shorter_sibling() {
        let tree = build_one(&["A:B", "A:B:C"]);
        let root = tree.roots()[0];
        let a = tree.children(root).next().unwrap();
        let b = tree.children(a).next().unwrap();
        assert_eq!(titles(&tree, b), vec!["C", "unspecified B"]);

        let placeholder = tree
            .children(b)
            .find(|c| tree.node(*c).unspecified)
            .unwrap();
        assert_eq!(tree.node(placeholder).value.as_deref(), Some("A:B"));
        assert_eq!(tree.node(placeholder).persisted_value(), "A:B");
        assert_eq!(tree.node(b).persisted_value(), "A:B__category");
    }

    #[test]
    fn unspecified_synthesis_is_order_independent() {
        let forward = build_one(&["A:B", "A:B:C"]);
        let backward = build_one(&["A:B:C", "A:B"]);
        assert_eq!(
            forward.outline(forward.roots()[0]),
            backward.outline(backward.roots()[0])
        );
    }

    #[test]
    fn no_unspecified_without_longer_sibling() {
        let tree = build_one(&["A:B", "A:C"]);
        assert!((0..tree.len()).all(|i| !tree.node(NodeId(i)).unspecified));
    }

    #[test]
    fn same_token_at_leaf_position_synthesises() {
        // "X:B" comparte el token B en la posición 1 con "A:B:C"
        let tree = build_one(&["X:B", "A:B:C"]);
        let root = tree.roots()[0];
        let x = tree.children(root).find(|c| tree.node(*c).title == "X").unwrap();
        let b = tree.children(x).next().unwrap();
        assert_eq!(titles(&tree, b), vec!["unspecified B"]);
        assert_eq!(tree.node(b).persisted_value(), "X:B__category");

        let a = tree.children(root).find(|c| tree.node(*c).title == "A").unwrap();
        let ab = tree.children(a).next().unwrap();
        assert_eq!(titles(&tree, ab), vec!["C"]);
        let unspecified = (0..tree.len())
            .filter(|i| tree.node(NodeId(*i)).unspecified)
            .count();
        assert_eq!(unspecified, 1);
    }

    #[test]
    fn token_at_other_position_does_not_synthesise() {
        let tree = build_one(&["X:B", "B:A:C"]);
        assert!((0..tree.len()).all(|i| !tree.node(NodeId(i)).unspecified));
    }

    #[test]
    fn single_level_enumerations_never_synthesise() {
        let tree = build_one(&["Org", "Org:Dept"]);
        let root = tree.roots()[0];
        let org = tree.children(root).next().unwrap();
        assert_eq!(titles(&tree, org), vec!["Dept"]);
    }

    #[test]
    fn disabled_flag_uses_bare_level_title() {
        let mut tree = TaxonomyTree::new();
        tree.build("type", "Type", &enums(&["A:B", "A:B:C"]), "Resource.type", false);
        let root = tree.roots()[0];
        let a = tree.children(root).next().unwrap();
        let b = tree.children(a).next().unwrap();
        assert_eq!(titles(&tree, b), vec!["B", "C"]);
        let placeholder = tree.children(b).find(|c| tree.node(*c).unspecified).unwrap();
        assert_eq!(tree.node(placeholder).persisted_value(), "A:B");
    }

    #[test]
    fn registry_type_scenario() {
        let tree = build_one(&["Org", "Org:Dept", "Org:Dept:Team"]);
        let root = tree.roots()[0];
        assert_eq!(tree.node(root).title, "Type");
        let org = tree.children(root).next().unwrap();
        assert_eq!(tree.node(org).persisted_value(), "Org__category");
        let dept = tree.children(org).next().unwrap();
        assert_eq!(tree.node(dept).persisted_value(), "Org:Dept__category");
        let team = tree.children(dept).find(|c| tree.node(*c).title == "Team").unwrap();
        assert_eq!(tree.node(team).persisted_value(), "Org:Dept:Team");
        // "Org:Dept" queda cubierto por su nodo sintético
        assert_eq!(titles(&tree, dept), vec!["Team", "unspecified Dept"]);
    }

    #[test]
    fn facets_accumulate_roots_and_empty_facet_keeps_anchor() {
        let mut tree = TaxonomyTree::new();
        tree.build("type", "Type", &enums(&["A"]), "Resource.type", true)
            .build("status", "Status", &[], "Resource.@status", true)
            .build("type", "Type", &enums(&["B"]), "Resource.type", true);
        assert_eq!(tree.roots().len(), 2);
        assert_eq!(titles(&tree, tree.roots()[0]), vec!["A", "B"]);
        assert_eq!(tree.children(tree.roots()[1]).count(), 0);
    }
}
