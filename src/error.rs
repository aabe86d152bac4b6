//! Errores de dominio del registro de refinamientos.
//!
//! La capa de persistencia los propaga al llamador; la capa de consulta
//! (`facet_query`) los absorbe y los registra en el log.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} no encontrado: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Configuración inválida: {0}")]
    MalformedConfig(String),

    #[error("No se pudo leer el esquema XSD: {0}")]
    Schema(String),

    #[error("Conflicto de unicidad: {0}")]
    Conflict(String),

    #[error("Imposible inicializar los refinamientos de la plantilla {template_id}: {source}")]
    Build {
        template_id: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("Error del almacenamiento: {0}")]
    Storage(String),

    #[error("Tarea interrumpida: {0}")]
    Task(String),
}

impl RegistryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Código que devuelve Neo4j al violar un constraint de unicidad.
const CONSTRAINT_VIOLATION: &str = "Neo.ClientError.Schema.ConstraintValidationFailed";

impl RegistryError {
    /// Clasifica un fallo del almacenamiento: las violaciones de unicidad
    /// son `Conflict`, el resto `Storage`.
    pub fn from_storage_message(message: String) -> Self {
        if message.contains(CONSTRAINT_VIOLATION) {
            Self::Conflict(message)
        } else {
            Self::Storage(message)
        }
    }
}

impl From<neo4rs::Error> for RegistryError {
    fn from(err: neo4rs::Error) -> Self {
        Self::from_storage_message(err.to_string())
    }
}

impl From<quick_xml::Error> for RegistryError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Schema(err.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_is_a_conflict() {
        let err = RegistryError::from_storage_message(
            "unexpected response for RUN: Failure { code: \"Neo.ClientError.Schema.ConstraintValidationFailed\", \
             message: \"Node(12) already exists with label `Refinement`\" }"
                .to_string(),
        );
        assert!(matches!(err, RegistryError::Conflict(_)));

        let err = RegistryError::from_storage_message("connection reset by peer".to_string());
        assert!(matches!(err, RegistryError::Storage(_)));
    }
}
