use crate::config::Neo4jConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :Template, :Refinement y :Category
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Template.id único
        "CREATE CONSTRAINT template_id IF NOT EXISTS
         FOR (t:Template)
         REQUIRE t.id IS UNIQUE",
        // Refinement.id único
        "CREATE CONSTRAINT refinement_id IF NOT EXISTS
         FOR (r:Refinement)
         REQUIRE r.id IS UNIQUE",
        // Un refinamiento por (hash de plantilla, elemento del esquema): dos
        // inicializaciones concurrentes del mismo hash fallan en vez de duplicar.
        "CREATE CONSTRAINT refinement_hash_element IF NOT EXISTS
         FOR (r:Refinement)
         REQUIRE (r.template_hash, r.schema_element_name) IS UNIQUE",
        // Category.id único
        "CREATE CONSTRAINT category_id IF NOT EXISTS
         FOR (c:Category)
         REQUIRE c.id IS UNIQUE",
        "CREATE INDEX category_lookup IF NOT EXISTS
         FOR (c:Category)
         ON (c.dotted_path, c.value)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints básicos creados).");
    Ok(())
}
