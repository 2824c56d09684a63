//! HTTP surface tests, driving the router without a socket

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use image::{Rgba, RgbaImage};
use serde_json::{json, Value};
use tower::ServiceExt;

use signflow::compositor::encode_png;
use signflow::http::{create_router, AppState};
use signflow::{
    CaptionRenderer, MemoryDocumentStore, MemorySignerStore, SignatureCompositor, SigningWorkflow,
    TokenCache,
};

const API_KEY: &str = "test-key";
const BOUNDARY: &str = "signflow-test-boundary";

struct BoxCaption;

impl CaptionRenderer for BoxCaption {
    fn render(&self, _lines: &[String]) -> signflow::Result<RgbaImage> {
        Ok(RgbaImage::from_pixel(50, 20, Rgba([0, 0, 0, 255])))
    }
}

fn app(api_key: Option<&str>) -> Router {
    let workflow = SigningWorkflow::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemorySignerStore::new()),
        Arc::new(TokenCache::default()),
        Arc::new(SignatureCompositor::new(Arc::new(BoxCaption), "%d/%m/%Y")),
    );
    create_router(AppState::new(workflow, api_key, 1024 * 1024))
}

fn json_request(method: Method, uri: &str, body: Value, auth: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", API_KEY));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: Method, uri: &str, auth: bool) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", API_KEY));
    }
    builder.body(Body::empty()).unwrap()
}

fn multipart_request(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"signature.png\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    String::from_utf8(body_bytes(resp).await).unwrap()
}

fn signature_png() -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(30, 10, Rgba([0, 0, 200, 255]))).unwrap()
}

/// Create a document with one signer, returning (document id, signer id)
async fn seed(app: &Router) -> (String, String) {
    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/documents",
            json!({"title": "Contract-A", "filePath": "/files/a.pdf"}),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let doc = body_json(resp).await;
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/users",
            json!({"documentId": doc_id, "displayName": "Alice", "identifier": "alice@x.com"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let signer = body_json(resp).await;
    assert_eq!(signer["state"], "pending");
    (doc_id, signer["id"].as_str().unwrap().to_string())
}

async fn generate_token(app: &Router, doc_id: &str) -> String {
    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/users/generateSigningToken",
            json!({"email": "alice@x.com", "documentId": doc_id}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_text(resp).await
}

#[tokio::test]
async fn test_health() {
    let resp = app(None).oneshot(empty_request(Method::GET, "/health", false)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tokens"]["pairs"], 0);
}

#[tokio::test]
async fn test_document_lifecycle() {
    let app = app(None);
    let (doc_id, _) = seed(&app).await;

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/documents/{}", doc_id),
            json!({"filePath": "/files/a-v2.pdf", "preview": "/thumbs/a-v2.png"}),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = body_json(resp).await;
    assert_eq!(doc["versions"].as_array().unwrap().len(), 2);
    assert_eq!(doc["versions"][1]["filePath"], "/files/a-v2.pdf");

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::PUT,
            &format!("/documents/{}", doc_id),
            json!({"title": "Contract-B"}),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["fileName"], "Contract-B");

    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/documents/{}", doc_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/documents?archived=true", false))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/documents/{}", doc_id),
            json!({"filePath": "/files/a-v3.pdf"}),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app(None);

    let resp = app
        .clone()
        .oneshot(json_request(Method::POST, "/documents", json!({"title": "", "filePath": "/x.pdf"}), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/documents/missing", false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/users/signingData/nope", false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_, signer_id) = seed(&app).await;
    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/users/{}/archived", signer_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_auth_gate() {
    let app = app(Some(API_KEY));
    let (doc_id, _) = seed(&app).await;

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/users", false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/users")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/users", true))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Signing page routes stay open
    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, &format!("/users/{}", doc_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sign_over_http() {
    let app = app(Some(API_KEY));
    let (doc_id, signer_id) = seed(&app).await;
    let token = generate_token(&app, &doc_id).await;
    assert_eq!(token, generate_token(&app, &doc_id).await);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, &format!("/users/signingData/{}", token), false))
        .await
        .unwrap();
    let ctx = body_json(resp).await;
    assert_eq!(ctx["displayName"], "Alice");
    assert_eq!(ctx["documentName"], "Contract-A");

    let resp = app
        .clone()
        .oneshot(multipart_request(&format!("/users/sign/{}", token), "blob", &signature_png()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Contract-A\""
    );
    let image = image::load_from_memory(&body_bytes(resp).await).unwrap();
    assert_eq!((image.width(), image.height()), (50, 30));

    let resp = app
        .clone()
        .oneshot(multipart_request(&format!("/users/sign/{}", token), "blob", &signature_png()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GONE);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, &format!("/users/signedDocument/{}", signer_id), true))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("inline"));

    let resp = app
        .clone()
        .oneshot(empty_request(
            Method::DELETE,
            &format!("/users/{}/deleteAllSignatures/{}", signer_id, doc_id),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sign_rejects_bad_uploads() {
    let app = app(None);
    let (doc_id, _) = seed(&app).await;
    let token = generate_token(&app, &doc_id).await;

    let resp = app
        .clone()
        .oneshot(multipart_request(&format!("/users/sign/{}", token), "file", &signature_png()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(multipart_request(&format!("/users/sign/{}", token), "blob", b"garbage"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = body_text(resp).await;
    assert_eq!(message, "The signature image could not be processed");

    // Token survives both failures
    let resp = app
        .clone()
        .oneshot(multipart_request(&format!("/users/sign/{}", token), "blob", &signature_png()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_revoke_token_and_archive_signer() {
    let app = app(None);
    let (doc_id, signer_id) = seed(&app).await;
    let token = generate_token(&app, &doc_id).await;

    let resp = app
        .clone()
        .oneshot(empty_request(
            Method::DELETE,
            &format!("/users/{}/deleteSignaturesToken/{}", signer_id, token),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/users/{}", signer_id), false))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["state"], "archived");

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/users/archived", false))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/users/{}/archived", signer_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .clone()
        .oneshot(empty_request(Method::GET, "/users?email=alice@x.com", false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_archived_flag_forms() {
    let app = app(None);
    let (doc_id, signer_id) = seed(&app).await;

    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/users/{}", signer_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for uri in [
        format!("/users/{}?archived", doc_id),
        format!("/users/{}?archived=1", doc_id),
    ] {
        let resp = app.clone().oneshot(empty_request(Method::GET, &uri, false)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        let signers = body_json(resp).await;
        assert_eq!(signers[0]["id"], signer_id.as_str(), "{uri}");
    }

    let resp = app
        .clone()
        .oneshot(empty_request(Method::DELETE, &format!("/documents/{}", doc_id), false))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for uri in ["/documents?archived", "/documents?archived=1", "/documents?archived=true"] {
        let resp = app.clone().oneshot(empty_request(Method::GET, uri, false)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        let docs = body_json(resp).await;
        assert_eq!(docs.as_array().unwrap().len(), 1, "{uri}");
        assert_eq!(docs[0]["id"], doc_id.as_str());
    }

    for uri in ["/documents", "/documents?archived=false"] {
        let resp = app.clone().oneshot(empty_request(Method::GET, uri, false)).await.unwrap();
        assert!(body_json(resp).await.as_array().unwrap().is_empty(), "{uri}");
    }
}
