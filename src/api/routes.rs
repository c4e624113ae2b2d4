use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers::{self, AppState};
use crate::store::Repository;

pub fn create_router<R: Repository + 'static>() -> Router<Arc<AppState<R>>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Entity type metadata
        .route("/schema/:entity_type", get(handlers::get_schema::<R>))
        // Grid search
        .route("/entities/:entity_type", get(handlers::search_entities::<R>))
        // Blank form for a new root entity
        .route("/entities/:entity_type/new", get(handlers::new_entity::<R>))
        .route("/entities/:entity_type/save", post(handlers::save_entity::<R>))
        .route(
            "/entities/:entity_type/:id",
            get(handlers::get_entity::<R>).delete(handlers::delete_entity::<R>),
        )
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{demo_hooks, demo_registry, load_seed_data};
    use crate::store::MemoryRepository;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let registry = Arc::new(demo_registry().unwrap());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        load_seed_data(repository.as_ref()).unwrap();
        let state = demo_hooks()
            .into_iter()
            .fold(AppState::new(registry, repository), |state, (ty, hooks)| {
                state.with_hooks(ty, hooks)
            });
        create_router().with_state(Arc::new(state))
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_entity_routes() {
        let (status, body) = call(app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));

        let (status, body) = call(app(), get("/entities/Invoice/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["number"], json!("INV-0001"));

        let (status, body) = call(app(), get("/entities/Invoice/new")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"], json!([]));

        let (status, body) = call(app(), get("/schema/Customer")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], json!("Customer"));

        let (status, _) = call(app(), get("/entities/Nope/1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(app(), get("/entities/Invoice/77")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_save_and_delete_routes() {
        let app = app();

        let req = Request::builder()
            .method("POST")
            .uri("/entities/Customer/save")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Grace&email=grace%40example.com"))
            .unwrap();
        let (status, body) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], json!(3));

        let req = Request::builder()
            .method("DELETE")
            .uri("/entities/Customer/2")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["kind"], json!("removal"));

        let req = Request::builder()
            .method("DELETE")
            .uri("/entities/Customer/3")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(app, get("/entities/Customer?length=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recordsTotal"], json!(2));
        assert_eq!(body["pageLength"], json!(10));
    }
}
