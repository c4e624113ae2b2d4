use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Query, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    Form, Json,
};
use serde_json::Value;

use crate::api::handlers::ErrorResponse;
use crate::model::{SubmittedValue, ValueSource};

/// Query string and body of a request as submitted value trees.
///
/// The query string and `application/x-www-form-urlencoded` bodies are read
/// in bracket notation (`lines[0][qty]=2`). JSON bodies are taken as-is.
/// Any other body is ignored.
#[derive(Debug, Clone)]
pub struct Submitted(pub ValueSource);

#[async_trait]
impl<S> FromRequest<S> for Submitted
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
            .map_err(|e| bad_request(format!("Invalid query string: {}", e)))?;
        let query = SubmittedValue::from_pairs(pairs);

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let body = if content_type.starts_with("application/json") {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| bad_request(format!("Invalid JSON body: {}", e)))?;
            SubmittedValue::from_json(&value)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| bad_request(format!("Invalid form body: {}", e)))?;
            SubmittedValue::from_pairs(pairs)
        } else {
            SubmittedValue::empty_map()
        };

        Ok(Submitted(ValueSource::new(query, body)))
    }
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    async fn extract(req: Request) -> ValueSource {
        Submitted::from_request(req, &()).await.unwrap().0
    }

    #[tokio::test]
    async fn test_query_and_form_body_use_bracket_notation() {
        let req = Request::builder()
            .method("POST")
            .uri("/entities/Invoice/save?searchData%5B0%5D%5Bname%5D=number&draw=2")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("number=INV-7&lines%5B0%5D%5Bqty%5D=2"))
            .unwrap();
        let source = extract(req).await;

        assert_eq!(source.get_scalar_or("draw", ""), "2");
        assert_eq!(
            source.query.get("searchData").and_then(|d| d.get("0")).and_then(|p| p.get("name")),
            Some(&SubmittedValue::scalar("number"))
        );
        assert_eq!(source.get_scalar_or("number", ""), "INV-7");
        assert_eq!(
            source.get("lines").and_then(|l| l.get("0")).and_then(|l| l.get("qty")),
            Some(&SubmittedValue::scalar("2"))
        );
    }

    #[tokio::test]
    async fn test_json_body() {
        let req = Request::builder()
            .method("POST")
            .uri("/entities/Invoice/save")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"number": "INV-8", "paid": true}"#))
            .unwrap();
        let source = extract(req).await;

        assert_eq!(source.get_scalar_or("number", ""), "INV-8");
        assert_eq!(source.get_scalar_or("paid", ""), "1");
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let req = Request::builder()
            .method("POST")
            .uri("/entities/Invoice/save")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, _) = Submitted::from_request(req, &()).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
