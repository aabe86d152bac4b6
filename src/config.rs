//! Carga y gestión de configuración de la aplicación (almacenamiento + refinamientos).

use std::env;
use std::time::Duration;

use crate::error::RegistryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Neo4j,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self, RegistryError> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "neo4j" => Ok(Self::Neo4j),
            other => Err(RegistryError::MalformedConfig(format!(
                "Backend de almacenamiento no soportado: {other}"
            ))),
        }
    }
}

/// Credenciales de Neo4j, sólo presentes si el backend es `neo4j`.
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Opciones que gobiernan la construcción de los árboles de refinamiento.
#[derive(Clone, Debug)]
pub struct TaxonomyOptions {
    /// Elementos del esquema cuyas enumeraciones se convierten en facetas.
    pub targets: Vec<String>,
    /// Si es `false`, el nodo sintético se titula con el nivel a secas.
    pub create_unspecified: bool,
}

impl Default for TaxonomyOptions {
    fn default() -> Self {
        Self {
            targets: vec!["Resource".to_string()],
            create_unspecified: true,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub store_backend: StoreBackend,
    pub neo4j: Option<Neo4jConfig>,

    pub taxonomy: TaxonomyOptions,
    pub refinement_task_timeout: Duration,
    pub template_slot: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, RegistryError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let store_backend =
            StoreBackend::from_str(&lookup("STORE_BACKEND").unwrap_or_else(|| "memory".to_string()))?;

        let neo4j = match store_backend {
            StoreBackend::Memory => None,
            StoreBackend::Neo4j => {
                let required = |key: &str| {
                    lookup(key).ok_or_else(|| {
                        RegistryError::MalformedConfig(format!("Falta {key} en el entorno"))
                    })
                };
                Some(Neo4jConfig {
                    uri: required("NEO4J_URI")?,
                    user: required("NEO4J_USER")?,
                    password: required("NEO4J_PASSWORD")?,
                })
            }
        };

        let targets = match lookup("REFINEMENT_TARGETS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            None => TaxonomyOptions::default().targets,
        };

        let create_unspecified = match lookup("CREATE_UNSPECIFIED") {
            Some(raw) => parse_bool("CREATE_UNSPECIFIED", &raw)?,
            None => true,
        };

        let timeout_secs = match lookup("REFINEMENT_TASK_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                RegistryError::MalformedConfig(format!(
                    "REFINEMENT_TASK_TIMEOUT_SECS no es un entero válido: {raw}"
                ))
            })?,
            None => 300,
        };

        let template_slot =
            lookup("REGISTRY_TEMPLATE_SLOT").unwrap_or_else(|| "registry".to_string());

        Ok(Self {
            server_addr,
            store_backend,
            neo4j,
            taxonomy: TaxonomyOptions {
                targets,
                create_unspecified,
            },
            refinement_task_timeout: Duration::from_secs(timeout_secs),
            template_slot,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, RegistryError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RegistryError::MalformedConfig(format!(
            "{key} debe ser un booleano, se recibió: {raw}"
        ))),
    }
}
