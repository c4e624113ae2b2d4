use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::extractor::Submitted;
use crate::error::{ErrorList, ServiceError};
use crate::logic::{DefaultHooks, EntityService, GridResponse, SaveOutcome, ServiceHooks};
use crate::model::{EntityTypeDef, Id, KeyConvention, SchemaRegistry};
use crate::store::Repository;

/// Shared state behind every route: schema, repository and per-type hooks.
pub struct AppState<R: Repository + ?Sized> {
    pub registry: Arc<SchemaRegistry>,
    pub repository: Arc<R>,
    pub convention: KeyConvention,
    pub root_id_key: Option<String>,
    hooks: HashMap<String, Arc<dyn ServiceHooks>>,
}

impl<R: Repository + ?Sized> AppState<R> {
    pub fn new(registry: Arc<SchemaRegistry>, repository: Arc<R>) -> Self {
        Self {
            registry,
            repository,
            convention: KeyConvention::default(),
            root_id_key: None,
            hooks: HashMap::new(),
        }
    }

    pub fn with_hooks(mut self, entity_type: &str, hooks: Arc<dyn ServiceHooks>) -> Self {
        self.hooks.insert(entity_type.to_string(), hooks);
        self
    }

    pub fn with_convention(mut self, convention: KeyConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_root_id_key(mut self, root_id_key: Option<String>) -> Self {
        self.root_id_key = root_id_key;
        self
    }

    /// Service for `entity_type`, wired with its registered hooks.
    pub fn service(&self, entity_type: &str) -> Result<EntityService<R>, ServiceError> {
        let hooks = self
            .hooks
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultHooks));
        let mut service =
            EntityService::new(entity_type, self.registry.clone(), self.repository.clone())?
                .with_hooks(hooks)
                .with_convention(self.convention);
        if let Some(key) = &self.root_id_key {
            service = service.with_id_key(key);
        }
        Ok(service)
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorList>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            errors: None,
        }
    }

    pub fn with_errors(message: &str, errors: ErrorList) -> Self {
        Self {
            error: message.to_string(),
            errors: Some(errors),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Maps service failures onto HTTP responses.
///
/// Mapping errors never reach the client verbatim; they are logged and
/// answered with a generic 500.
pub fn error_response(err: ServiceError) -> ApiError {
    match err {
        ServiceError::UnknownType(_) | ServiceError::NotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(&err.to_string())),
        ),
        ServiceError::Forbidden { .. } => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(&err.to_string())),
        ),
        ServiceError::Mapping(e) => {
            log::error!("Request failed with a mapping error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "The submitted data does not match the entity schema",
                )),
            )
        }
        ServiceError::NotRemovable(e) => {
            let mut errors = ErrorList::new();
            errors.add("removal", e.to_string());
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse::with_errors(&e.to_string(), errors)),
            )
        }
        ServiceError::Unique(errors)
        | ServiceError::Validation(errors)
        | ServiceError::Verification(errors)
        | ServiceError::Upload(errors)
        | ServiceError::Entity(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::with_errors(&errors.joined(), errors)),
        ),
    }
}

pub async fn get_schema<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(entity_type): Path<String>,
) -> Result<Json<EntityTypeDef>, ApiError> {
    match state.registry.get(&entity_type) {
        Some(def) => Ok(Json(def.clone())),
        None => Err(error_response(ServiceError::UnknownType(entity_type))),
    }
}

pub async fn search_entities<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(entity_type): Path<String>,
    Submitted(source): Submitted,
) -> Result<Json<GridResponse>, ApiError> {
    let service = state.service(&entity_type).map_err(error_response)?;
    service.search(&source).map(Json).map_err(error_response)
}

pub async fn new_entity<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(entity_type): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = state.service(&entity_type).map_err(error_response)?;
    service.new_entity_data().map(Json).map_err(error_response)
}

pub async fn get_entity<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path((entity_type, id)): Path<(String, Id)>,
) -> Result<Json<Value>, ApiError> {
    let service = state.service(&entity_type).map_err(error_response)?;
    service.entity_data(id).map(Json).map_err(error_response)
}

pub async fn save_entity<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(entity_type): Path<String>,
    Submitted(source): Submitted,
) -> Result<(StatusCode, Json<SaveOutcome>), ApiError> {
    let service = state.service(&entity_type).map_err(error_response)?;
    let outcome = service.save(source).map_err(error_response)?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

pub async fn delete_entity<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path((entity_type, id)): Path<(String, Id)>,
) -> Result<StatusCode, ApiError> {
    let service = state.service(&entity_type).map_err(error_response)?;
    service.remove_entity(id).map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
