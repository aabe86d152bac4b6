use std::collections::HashSet;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::{lock_status, AppState, Status},
    category,
    error::RegistryError,
    facet_query::{self, SelectedFacets},
    models::{Category, FacetTreeNode, NewTemplate, Refinement, Template},
    refinement::{self, InitSummary},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(err: RegistryError) -> ApiError {
    let status = match &err {
        RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::MalformedConfig(_) | RegistryError::Schema(_) => StatusCode::BAD_REQUEST,
        RegistryError::Conflict(_) => StatusCode::CONFLICT,
        RegistryError::Build { .. } | RegistryError::Storage(_) | RegistryError::Task(_) => {
            error!("Error interno: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct NewTemplatePayload {
    name: String,
    slot: Option<String>,
    content: String,
}

#[derive(Deserialize)]
pub struct TemplateHashQuery {
    template_hash: String,
}

#[derive(Deserialize)]
pub struct TreeQuery {
    /// Ids de categoría separados por comas.
    selected: Option<String>,
    count: Option<bool>,
}

#[derive(Deserialize)]
pub struct FamilyQuery {
    parent_slug: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
pub struct FilterPayload {
    selections: Vec<Vec<String>>,
}

#[derive(Deserialize)]
pub struct FacetsPayload {
    filter: serde_json::Value,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/templates",
            get(list_templates_handler).post(create_template_handler),
        )
        .route("/api/templates/:id", get(get_template_handler))
        .route("/api/templates/:id/refinements", post(init_refinements_handler))
        .route(
            "/api/refinements",
            get(list_refinements_handler).delete(delete_refinements_handler),
        )
        .route("/api/refinements/:id/tree", get(refinement_tree_handler))
        .route("/api/refinements/:id/family", get(family_handler))
        .route("/api/refinements/:id/categories", get(refinement_categories_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/categories/:id", get(category_handler))
        .route("/api/search/filter", post(search_filter_handler))
        .route("/api/search/facets", post(search_facets_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Plantillas ---

/// Guarda la plantilla y dispara los hooks; la inicialización de sus
/// refinamientos queda encolada.
#[axum::debug_handler]
async fn create_template_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewTemplatePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = payload
        .slot
        .unwrap_or_else(|| state.config.template_slot.clone());
    let template = state
        .store
        .save_template(NewTemplate {
            name: payload.name,
            slot,
            content: payload.content,
        })
        .await
        .map_err(api_error)?;

    state.hooks.fire_post_save(&template);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": template.id, "hash": template.hash })),
    ))
}

#[axum::debug_handler]
async fn list_templates_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Template>>, ApiError> {
    state.store.templates().await.map(Json).map_err(api_error)
}

#[axum::debug_handler]
async fn get_template_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>, ApiError> {
    state.store.template_by_id(&id).await.map(Json).map_err(api_error)
}

// --- Refinamientos ---

/// Re-lanzamiento manual y síncrono de la inicialización.
#[axum::debug_handler]
async fn init_refinements_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InitSummary>, ApiError> {
    let template = state.store.template_by_id(&id).await.map_err(api_error)?;
    refinement::init_refinements(state.store.as_ref(), &template, &state.config.taxonomy)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn delete_refinements_handler(
    State(state): State<AppState>,
    Query(query): Query<TemplateHashQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .store
        .delete_refinements_by_template_hash(&query.template_hash)
        .await
        .map_err(api_error)?;
    info!(
        "{} refinamientos borrados para el hash {}",
        deleted, query.template_hash
    );
    Ok(Json(json!({ "deleted": deleted })))
}

#[axum::debug_handler]
async fn list_refinements_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Refinement>>, ApiError> {
    let template = state
        .store
        .active_template(&state.config.template_slot)
        .await
        .map_err(api_error)?;
    state
        .store
        .refinements_by_template_hash(&template.hash)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn refinement_tree_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<FacetTreeNode>>, ApiError> {
    let selected: HashSet<String> = query
        .selected
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    category::category_tree(
        state.store.as_ref(),
        &id,
        &selected,
        query.count.unwrap_or(false),
    )
    .await
    .map(Json)
    .map_err(api_error)
}

#[axum::debug_handler]
async fn family_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FamilyQuery>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let store = state.store.as_ref();
    let family = match (query.parent_slug, query.name) {
        (Some(slug), _) => category::family_by_parent_slug(store, &slug, &id).await,
        (None, Some(name)) => category::family_by_name(store, &name, &id).await,
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Indique parent_slug o name."})),
            ))
        }
    };
    family.map(Json).map_err(api_error)
}

#[axum::debug_handler]
async fn refinement_categories_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Category>>, ApiError> {
    category::all_by_refinement(state.store.as_ref(), &id)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn categories_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, ApiError> {
    category::all(state.store.as_ref()).await.map(Json).map_err(api_error)
}

#[axum::debug_handler]
async fn category_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Category>, ApiError> {
    category::get_by_id(state.store.as_ref(), &id)
        .await
        .map(Json)
        .map_err(api_error)
}

// --- Búsqueda ---

/// Nunca falla: en el peor caso devuelve el filtro vacío.
#[axum::debug_handler]
async fn search_filter_handler(
    State(state): State<AppState>,
    Json(payload): Json<FilterPayload>,
) -> Json<serde_json::Value> {
    let filter = facet_query::build_filter(state.store.as_ref(), &payload.selections).await;
    Json(filter.to_json())
}

/// Como el filtro, nunca falla: sin plantilla activa no hay facetas.
#[axum::debug_handler]
async fn search_facets_handler(
    State(state): State<AppState>,
    Json(payload): Json<FacetsPayload>,
) -> Json<SelectedFacets> {
    let template = match state
        .store
        .active_template(&state.config.template_slot)
        .await
    {
        Ok(template) => template,
        Err(RegistryError::NotFound { .. }) => {
            warn!(
                "No hay plantilla activa en '{}', sin facetas seleccionadas.",
                state.config.template_slot
            );
            return Json(SelectedFacets::new());
        }
        Err(err) => {
            error!("Error leyendo la plantilla activa, sin facetas seleccionadas: {}", err);
            return Json(SelectedFacets::new());
        }
    };
    let selected =
        facet_query::decode_selected_facets(state.store.as_ref(), &payload.filter, &template)
            .await;
    Json(selected)
}

// --- Estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(lock_status(&state.status).clone())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .ok()
        .and_then(|mut sender| sender.take());
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
