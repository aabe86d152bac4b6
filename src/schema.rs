//! Extracción de enumeraciones desde un esquema XSD.
//!
//! El esquema se lee con `quick-xml` a un árbol ligero de elementos (sólo
//! nombres locales, los prefijos de espacio de nombres se ignoran). A partir
//! del elemento objetivo se recorre su contenido en orden de documento y cada
//! elemento o atributo cuyo tipo declare `xs:enumeration` se convierte en una
//! faceta.
//!
//! La validez global del esquema la garantiza quien lo registra; aquí sólo se
//! lee.

use std::collections::{HashMap, HashSet};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{RegistryError, RegistryResult};

/// Literal de una `xs:enumeration` (niveles separados por `:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    pub value: String,
}

impl Enumeration {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn levels(&self) -> Vec<&str> {
        self.value.split(':').collect()
    }
}

/// Una dimensión de refinamiento encontrada en el esquema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub element_name: String,
    pub display_name: String,
    pub dotted_path: String,
    pub enumerations: Vec<Enumeration>,
}

#[derive(Debug, Default)]
struct XsdElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XsdElement>,
    text: String,
}

impl XsdElement {
    fn from_start(start: &BytesStart<'_>) -> RegistryResult<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&XsdElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XsdElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn parse_document(content: &str) -> RegistryResult<XsdElement> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XsdElement::default()];
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XsdElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XsdElement::from_start(&start)?;
                attach(&mut stack, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RegistryError::Schema("etiqueta de cierre huérfana".into()))?;
                attach(&mut stack, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(document), true) => Ok(document),
        _ => Err(RegistryError::Schema("documento XSD incompleto".into())),
    }
}

fn attach(stack: &mut [XsdElement], element: XsdElement) -> RegistryResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None => Err(RegistryError::Schema("estructura XML desbalanceada".into())),
    }
}

/// Quita el prefijo de espacio de nombres de una referencia de tipo (`xs:string`).
fn local(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

struct SchemaIndex<'a> {
    root: &'a XsdElement,
    simple_types: HashMap<&'a str, &'a XsdElement>,
    complex_types: HashMap<&'a str, &'a XsdElement>,
    global_elements: HashMap<&'a str, &'a XsdElement>,
}

impl<'a> SchemaIndex<'a> {
    fn new(document: &'a XsdElement) -> Self {
        let mut index = Self {
            root: document,
            simple_types: HashMap::new(),
            complex_types: HashMap::new(),
            global_elements: HashMap::new(),
        };
        index.collect_types(document);
        if let Some(schema) = document.child("schema") {
            for element in schema.children_named("element") {
                if let Some(name) = element.attr("name") {
                    index.global_elements.insert(name, element);
                }
            }
        }
        index
    }

    fn collect_types(&mut self, node: &'a XsdElement) {
        for child in &node.children {
            if let Some(name) = child.attr("name") {
                match child.name.as_str() {
                    "simpleType" => {
                        self.simple_types.entry(name).or_insert(child);
                    }
                    "complexType" => {
                        self.complex_types.entry(name).or_insert(child);
                    }
                    _ => {}
                }
            }
            self.collect_types(child);
        }
    }

    fn find_element(&self, node: &'a XsdElement, target: &str) -> Option<&'a XsdElement> {
        for child in &node.children {
            if child.name == "element" && child.attr("name") == Some(target) {
                return Some(child);
            }
            if let Some(found) = self.find_element(child, target) {
                return Some(found);
            }
        }
        None
    }

    /// Enumeraciones de un `simpleType`, siguiendo cadenas de `restriction/@base`.
    fn simple_type_enumerations(
        &self,
        simple_type: &'a XsdElement,
        seen: &mut HashSet<&'a str>,
    ) -> Vec<Enumeration> {
        let Some(restriction) = simple_type.child("restriction") else {
            return Vec::new();
        };
        let values: Vec<Enumeration> = restriction
            .children_named("enumeration")
            .filter_map(|e| e.attr("value"))
            .map(Enumeration::new)
            .collect();
        if !values.is_empty() {
            return values;
        }
        if let Some(inline) = restriction.child("simpleType") {
            return self.simple_type_enumerations(inline, seen);
        }
        let base = restriction
            .attr("base")
            .map(local)
            .and_then(|base| self.simple_types.get_key_value(base));
        match base {
            Some((name, base)) if seen.insert(*name) => self.simple_type_enumerations(*base, seen),
            _ => Vec::new(),
        }
    }

    /// Enumeraciones del tipo de un `element` o `attribute` (inline o por `@type`).
    fn enumerations_of(&self, node: &'a XsdElement) -> Vec<Enumeration> {
        let mut seen = HashSet::new();
        if let Some(inline) = node.child("simpleType") {
            return self.simple_type_enumerations(inline, &mut seen);
        }
        node.attr("type")
            .map(local)
            .and_then(|name| self.simple_types.get(name))
            .map(|simple| self.simple_type_enumerations(*simple, &mut seen))
            .unwrap_or_default()
    }

    fn complex_type_of(&self, element: &'a XsdElement) -> Option<(&'a XsdElement, Option<&'a str>)> {
        if let Some(inline) = element.child("complexType") {
            return Some((inline, None));
        }
        let (name, complex) = element
            .attr("type")
            .map(local)
            .and_then(|name| self.complex_types.get_key_value(name))?;
        Some((*complex, Some(*name)))
    }
}

fn display_name(node: &XsdElement, fallback: &str) -> String {
    node.child("annotation")
        .and_then(|a| a.child("appinfo"))
        .and_then(|a| a.child("label"))
        .map(|label| label.text.trim().to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

struct Collector<'i, 'a> {
    index: &'i SchemaIndex<'a>,
    expanding: HashSet<&'a str>,
    open_elements: Vec<&'a XsdElement>,
    facets: Vec<Facet>,
}

impl<'i, 'a> Collector<'i, 'a> {
    fn visit_element(&mut self, element: &'a XsdElement, parent_path: Option<&str>) {
        let index = self.index;
        let element = match element.attr("ref").map(local) {
            Some(reference) => match index.global_elements.get(reference) {
                Some(global) => *global,
                None => return,
            },
            None => element,
        };
        let Some(name) = element.attr("name") else {
            return;
        };
        let path = match parent_path {
            Some(parent) => format!("{parent}.{name}"),
            None => name.to_string(),
        };

        let enumerations = index.enumerations_of(element);
        if !enumerations.is_empty() {
            self.facets.push(Facet {
                element_name: name.to_string(),
                display_name: display_name(element, name),
                dotted_path: path,
                enumerations,
            });
            return;
        }

        // un elemento que se referencia a sí mismo (directa o indirectamente
        // vía `ref`) sólo se expande una vez por rama
        if self.open_elements.iter().any(|open| std::ptr::eq(*open, element)) {
            return;
        }
        if let Some((complex, type_name)) = index.complex_type_of(element) {
            self.open_elements.push(element);
            self.expand_named(complex, type_name, &path);
            self.open_elements.pop();
        }
    }

    fn visit_attribute(&mut self, attribute: &'a XsdElement, parent_path: &str) {
        let Some(name) = attribute.attr("name") else {
            return;
        };
        let enumerations = self.index.enumerations_of(attribute);
        if enumerations.is_empty() {
            return;
        }
        self.facets.push(Facet {
            element_name: name.to_string(),
            display_name: display_name(attribute, name),
            dotted_path: format!("{parent_path}.@{name}"),
            enumerations,
        });
    }

    fn expand_named(&mut self, complex: &'a XsdElement, type_name: Option<&'a str>, path: &str) {
        if let Some(type_name) = type_name {
            // tipos recursivos: no volver a entrar en un tipo que ya se está expandiendo
            if !self.expanding.insert(type_name) {
                return;
            }
        }
        self.visit_content(complex, path);
        if let Some(type_name) = type_name {
            self.expanding.remove(type_name);
        }
    }

    fn visit_content(&mut self, node: &'a XsdElement, path: &str) {
        let index = self.index;
        for child in &node.children {
            match child.name.as_str() {
                "element" => self.visit_element(child, Some(path)),
                "attribute" => self.visit_attribute(child, path),
                "extension" | "restriction" => {
                    let base = child
                        .attr("base")
                        .map(local)
                        .and_then(|base| index.complex_types.get_key_value(base));
                    if let Some((name, base)) = base {
                        self.expand_named(*base, Some(*name), path);
                    }
                    self.visit_content(child, path);
                }
                "sequence" | "choice" | "all" | "complexContent" | "simpleContent" => {
                    self.visit_content(child, path)
                }
                _ => {}
            }
        }
    }
}

/// Devuelve, en orden de documento, las facetas que cuelgan de `target`.
///
/// Si el elemento no existe se devuelve una lista vacía: no construir ningún
/// refinamiento es un resultado válido.
pub fn extract_facets(content: &str, target: &str) -> RegistryResult<Vec<Facet>> {
    let document = parse_document(content)?;
    let index = SchemaIndex::new(&document);

    let Some(anchor) = index.find_element(index.root, target) else {
        return Ok(Vec::new());
    };

    let mut collector = Collector {
        index: &index,
        expanding: HashSet::new(),
        open_elements: Vec::new(),
        facets: Vec::new(),
    };
    collector.visit_element(anchor, None);
    Ok(collector.facets)
}

/// Facetas de todos los objetivos configurados, en el orden de configuración.
pub fn extract_all_facets(content: &str, targets: &[String]) -> RegistryResult<Vec<Facet>> {
    let mut facets = Vec::new();
    for target in targets {
        facets.extend(extract_facets(content, target)?);
    }
    Ok(facets)
}
