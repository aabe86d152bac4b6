//! Codificación de facetas seleccionadas a filtro de búsqueda y vuelta.
//!
//! Forma del filtro (estilo MongoDB):
//!
//! ```text
//! {"$and": [ {"$or": [ {"<ruta>": {"$in": [v..]}}, {"<ruta>.#text": {"$in": [v..]}} ]} ]}
//! ```
//!
//! Un grupo `$or` por refinamiento con alguna categoría marcada; `{}` si no
//! hay ninguna. Los errores de esta capa nunca se propagan: un refinamiento
//! roto no debe impedir que la búsqueda se ejecute sin refinar.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::{
    error::{RegistryError, RegistryResult},
    models::{Category, Refinement, Template},
    store::TaxonomyStore,
    tree::CATEGORY_SUFFIX,
};

/// Variante de la ruta para nodos XML con atributos y texto.
pub const TEXT_SUFFIX: &str = ".#text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTest {
    pub path: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrGroup {
    pub tests: Vec<MembershipTest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FacetFilter {
    pub groups: Vec<OrGroup>,
}

impl FacetFilter {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn to_json(&self) -> Value {
        if self.is_empty() {
            return json!({});
        }
        let groups: Vec<Value> = self
            .groups
            .iter()
            .map(|group| {
                let tests: Vec<Value> = group
                    .tests
                    .iter()
                    .map(|test| {
                        let mut entry = Map::new();
                        entry.insert(test.path.clone(), json!({ "$in": test.values }));
                        Value::Object(entry)
                    })
                    .collect();
                json!({ "$or": tests })
            })
            .collect();
        json!({ "$and": groups })
    }

    /// Interpreta un filtro JSON. Devuelve `None` si no hay un `$and` de
    /// nivel superior; las entradas internas mal formadas se ignoran.
    pub fn from_json(value: &Value) -> Option<Self> {
        let groups = value.get("$and")?.as_array()?;
        let groups = groups
            .iter()
            .filter_map(|group| group.get("$or")?.as_array())
            .map(|tests| OrGroup {
                tests: tests.iter().filter_map(parse_membership).collect(),
            })
            .collect();
        Some(Self { groups })
    }
}

fn parse_membership(entry: &Value) -> Option<MembershipTest> {
    let object = entry.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (path, test) = object.iter().next()?;
    let values = test
        .get("$in")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Some(MembershipTest {
        path: path.clone(),
        values,
    })
}

/// Construye el filtro para las categorías marcadas, agrupadas por
/// refinamiento. Nunca falla: ante un error inesperado devuelve el filtro
/// vacío.
pub async fn build_filter(store: &dyn TaxonomyStore, selections: &[Vec<String>]) -> FacetFilter {
    match try_build_filter(store, selections).await {
        Ok(filter) => filter,
        Err(err) => {
            error!(
                "Error construyendo el filtro de refinamientos. La búsqueda no se refinará: {}",
                err
            );
            FacetFilter::default()
        }
    }
}

async fn try_build_filter(
    store: &dyn TaxonomyStore,
    selections: &[Vec<String>],
) -> RegistryResult<FacetFilter> {
    let mut filter = FacetFilter::default();

    for selection in selections {
        // ruta → valores, en orden de aparición
        let mut by_path: Vec<(String, Vec<String>)> = Vec::new();
        for category_id in selection {
            let category = match store.category_by_id(category_id).await {
                Ok(category) => category,
                Err(RegistryError::NotFound { .. }) => {
                    warn!("Imposible encontrar la categoría ({category_id}), se ignora.");
                    continue;
                }
                Err(err) => return Err(err),
            };
            match by_path.iter().position(|(path, _)| *path == category.dotted_path) {
                Some(index) => {
                    let values = &mut by_path[index].1;
                    if !values.contains(&category.value) {
                        values.push(category.value);
                    }
                }
                None => by_path.push((category.dotted_path, vec![category.value])),
            }
        }

        if by_path.is_empty() {
            continue;
        }
        let mut group = OrGroup::default();
        for (path, values) in by_path {
            let text_path = format!("{path}{TEXT_SUFFIX}");
            group.tests.push(MembershipTest {
                path,
                values: values.clone(),
            });
            group.tests.push(MembershipTest {
                path: text_path,
                values,
            });
        }
        filter.groups.push(group);
    }

    Ok(filter)
}

/// Categoría marcada tal y como la presenta la interfaz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedCategory {
    pub id: String,
    pub value: String,
}

/// slug del refinamiento → nombre del refinamiento → categorías marcadas.
pub type SelectedFacets = BTreeMap<String, BTreeMap<String, Vec<SelectedCategory>>>;

/// Reconstruye, a partir de un filtro ya construido, qué categorías de los
/// refinamientos de `template` están marcadas.
///
/// Las pruebas sobre rutas `#text` (duplicadas) y los valores con sufijo de
/// categoría padre se ignoran; los valores que ya no resuelven a ninguna
/// categoría se descartan en silencio.
pub async fn decode_selected_facets(
    store: &dyn TaxonomyStore,
    filter: &Value,
    template: &Template,
) -> SelectedFacets {
    let Some(filter) = FacetFilter::from_json(filter) else {
        return SelectedFacets::new();
    };

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut seen = HashSet::new();
    for group in &filter.groups {
        for test in &group.tests {
            if test.path.ends_with(TEXT_SUFFIX) {
                continue;
            }
            for value in &test.values {
                if value.ends_with(CATEGORY_SUFFIX) {
                    continue;
                }
                if seen.insert((test.path.as_str(), value.as_str())) {
                    pairs.push((test.path.clone(), value.clone()));
                }
            }
        }
    }
    if pairs.is_empty() {
        return SelectedFacets::new();
    }

    match resolve_pairs(store, &pairs, template).await {
        Ok(selected) => selected,
        Err(err) => {
            error!(
                "No se pudieron resolver las facetas seleccionadas de la plantilla {}: {}",
                template.id, err
            );
            SelectedFacets::new()
        }
    }
}

async fn resolve_pairs(
    store: &dyn TaxonomyStore,
    pairs: &[(String, String)],
    template: &Template,
) -> RegistryResult<SelectedFacets> {
    let refinements = store.refinements_by_template_hash(&template.hash).await?;

    let mut index: HashMap<(String, String), Vec<(Category, &Refinement)>> = HashMap::new();
    for refinement in &refinements {
        for category in store.categories_by_refinement(&refinement.id).await? {
            index
                .entry((category.dotted_path.clone(), category.value.clone()))
                .or_default()
                .push((category, refinement));
        }
    }

    let mut selected = SelectedFacets::new();
    for pair in pairs {
        let Some(matches) = index.get(pair) else {
            continue;
        };
        for (category, refinement) in matches {
            let group = selected
                .entry(refinement.slug.clone())
                .or_default()
                .entry(refinement.name.clone())
                .or_default();
            if group.iter().any(|s| s.id == category.id) {
                continue;
            }
            group.push(SelectedCategory {
                id: category.id.clone(),
                value: display_value(&category.value).to_string(),
            });
        }
    }
    Ok(selected)
}

/// Último nivel de un valor jerárquico (`Org:Dept:Team` → `Team`).
pub fn display_value(value: &str) -> &str {
    value.rsplit(':').next().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxonomyOptions;
    use crate::memory_store::MemoryStore;
    use crate::models::NewTemplate;
    use crate::refinement::init_refinements;
    use crate::schema::tests::REGISTRY_XSD;

    /// Almacén con los refinamientos del esquema de pruebas ya creados.
    async fn seeded() -> (MemoryStore, Template) {
        let store = MemoryStore::new();
        let template = store
            .save_template(NewTemplate {
                name: "res-md".into(),
                slot: "registry".into(),
                content: REGISTRY_XSD.into(),
            })
            .await
            .unwrap();
        init_refinements(&store, &template, &TaxonomyOptions::default())
            .await
            .unwrap();
        (store, template)
    }

    async fn category(store: &MemoryStore, template: &Template, slug: &str, name: &str) -> Category {
        let refinement = store
            .refinement_by_template_hash_and_slug(&template.hash, slug)
            .await
            .unwrap();
        store
            .categories_by_refinement(&refinement.id)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn single_value_produces_plain_and_text_tests() {
        let (store, template) = seeded().await;
        let team = category(&store, &template, "type", "Team").await;

        let filter = build_filter(&store, &[vec![team.id.clone()]]).await;
        assert_eq!(
            filter.to_json(),
            json!({"$and": [{"$or": [
                {"Resource.type": {"$in": ["Org:Dept:Team"]}},
                {"Resource.type.#text": {"$in": ["Org:Dept:Team"]}}
            ]}]})
        );

        let decoded = decode_selected_facets(&store, &filter.to_json(), &template).await;
        let types = &decoded["type"]["Type"];
        assert_eq!(
            types,
            &vec![SelectedCategory {
                id: team.id,
                value: "Team".into()
            }]
        );
    }

    #[tokio::test]
    async fn round_trip_across_two_refinements() {
        let (store, template) = seeded().await;
        let team = category(&store, &template, "type", "Team").await;
        let unspecified = category(&store, &template, "type", "unspecified Dept").await;
        let alloys = category(&store, &template, "material-type", "Alloys").await;
        let polymers = category(&store, &template, "material-type", "Polymers").await;

        let selections = vec![
            vec![team.id.clone(), unspecified.id.clone()],
            vec![polymers.id.clone(), alloys.id.clone()],
        ];
        let filter = build_filter(&store, &selections).await;
        assert_eq!(filter.groups.len(), 2);

        let decoded = decode_selected_facets(&store, &filter.to_json(), &template).await;
        let flattened: Vec<(String, String)> = decoded
            .iter()
            .flat_map(|(slug, by_name)| {
                by_name
                    .values()
                    .flatten()
                    .map(move |s| (slug.clone(), s.id.clone()))
            })
            .collect();
        assert_eq!(
            flattened,
            vec![
                ("material-type".to_string(), polymers.id.clone()),
                ("material-type".to_string(), alloys.id.clone()),
                ("type".to_string(), team.id.clone()),
                ("type".to_string(), unspecified.id.clone()),
            ]
        );
        assert_eq!(decoded["type"]["Type"][1].value, "Dept");
    }

    #[tokio::test]
    async fn parent_category_values_are_not_decoded() {
        let (store, template) = seeded().await;
        let org = category(&store, &template, "type", "Org").await;
        assert_eq!(org.value, "Org__category");

        let filter = build_filter(&store, &[vec![org.id.clone()]]).await;
        assert_eq!(filter.groups[0].tests[0].values, vec!["Org__category".to_string()]);

        let decoded = decode_selected_facets(&store, &filter.to_json(), &template).await;
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_skipped() {
        let (store, template) = seeded().await;
        let team = category(&store, &template, "type", "Team").await;

        let filter = build_filter(
            &store,
            &[vec!["missing".to_string()], vec!["gone".into(), team.id.clone()]],
        )
        .await;
        assert_eq!(filter.groups.len(), 1);
        assert_eq!(filter.groups[0].tests.len(), 2);
    }

    #[tokio::test]
    async fn empty_selection_gives_empty_filter() {
        let (store, template) = seeded().await;
        let filter = build_filter(&store, &[]).await;
        assert!(filter.is_empty());
        assert_eq!(filter.to_json(), json!({}));

        let filter = build_filter(&store, &[vec![], vec![]]).await;
        assert!(filter.is_empty());

        let decoded = decode_selected_facets(&store, &filter.to_json(), &template).await;
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn values_from_other_templates_are_dropped() {
        let (store, template) = seeded().await;
        let team = category(&store, &template, "type", "Team").await;
        let filter = build_filter(&store, &[vec![team.id]]).await;

        let newer = store
            .save_template(NewTemplate {
                name: "res-md".into(),
                slot: "registry".into(),
                content: format!("{REGISTRY_XSD}\n"),
            })
            .await
            .unwrap();
        let decoded = decode_selected_facets(&store, &filter.to_json(), &newer).await;
        assert!(decoded.is_empty());
    }

    #[test]
    fn from_json_requires_and_of_ors() {
        assert_eq!(FacetFilter::from_json(&json!({"$or": []})), None);
        assert_eq!(FacetFilter::from_json(&json!("text")), None);

        let parsed = FacetFilter::from_json(&json!({"$and": [
            {"$or": [{"a": {"$in": ["x"]}}, {"b": "not-a-test"}]},
            {"other": 1}
        ]}))
        .unwrap();
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(
            parsed.groups[0].tests,
            vec![MembershipTest {
                path: "a".into(),
                values: vec!["x".into()]
            }]
        );
    }

    #[test]
    fn display_value_keeps_last_level() {
        assert_eq!(display_value("Org:Dept:Team"), "Team");
        assert_eq!(display_value("Org"), "Org");
    }
}
