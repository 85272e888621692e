use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autogram::provider::{DriverChoice, KeyChoice};

use autogram::error::ErrorResponse;
use autogram::key::KeyDescription;
use autogram::mapper::DigestMethod;
use autogram::server::{InfoResponse, SignResponse};
use autogram::token::{Certificate, PrivateKeyHandle, Token, TokenDriver, TokenError};
use autogram::{
    AppState, AutoPicker, Autogram, AutogramConfig, EnvelopeEngine, KeyPicker, KeyPolicy,
    SigningKeyProvider, router,
};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower::ServiceExt;

struct StaticKey(Vec<Certificate>);

impl PrivateKeyHandle for StaticKey {
    fn algorithm(&self) -> &str {
        "static"
    }

    fn certificate(&self) -> &Certificate {
        &self.0[0]
    }

    fn certificate_chain(&self) -> &[Certificate] {
        &self.0
    }

    fn sign(&self, digest: &[u8], _: DigestMethod) -> Result<Vec<u8>, TokenError> {
        Ok(digest.iter().rev().copied().collect())
    }
}

struct StaticToken(Vec<Arc<dyn PrivateKeyHandle>>);

impl Token for StaticToken {
    fn label(&self) -> &str {
        "static token"
    }

    fn list_keys(&self) -> Result<Vec<Arc<dyn PrivateKeyHandle>>, TokenError> {
        Ok(self.0.clone())
    }
}

struct StaticDriver;

impl TokenDriver for StaticDriver {
    fn name(&self) -> &str {
        "static"
    }

    fn open(&self) -> Result<Arc<dyn Token>, TokenError> {
        let key = StaticKey(vec![Certificate {
            subject: "CN=Jana Novakova".into(),
            issuer: "CN=Test CA".into(),
            serial_number: "2a".into(),
        }]);
        Ok(Arc::new(StaticToken(vec![Arc::new(key)])))
    }
}

/// Sets `dropped` when the future holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Key prompt that never gets an answer.
#[derive(Default)]
struct HangingPicker {
    prompting: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl KeyPicker for HangingPicker {
    async fn pick_driver(&self, _: &[DriverChoice]) -> Option<usize> {
        Some(0)
    }

    async fn pick_key(&self, _: &str, _: &[KeyChoice]) -> Option<usize> {
        let _flag = DropFlag(self.dropped.clone());
        self.prompting.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

fn test_state(key_policy: KeyPolicy, max_body_bytes: usize) -> AppState {
    state_with_picker(key_policy, max_body_bytes, Arc::new(AutoPicker))
}

fn state_with_picker(
    key_policy: KeyPolicy,
    max_body_bytes: usize,
    picker: Arc<dyn KeyPicker>,
) -> AppState {
    let provider = SigningKeyProvider::new(vec![Arc::new(StaticDriver)], picker);
    AppState {
        autogram: Arc::new(Autogram::new(
            provider,
            Arc::new(EnvelopeEngine),
            AutogramConfig::default(),
        )),
        key_policy,
        max_body_bytes,
    }
}

fn app() -> axum::Router {
    router(test_state(KeyPolicy::RequireActive, 1024 * 1024))
}

fn sign_body() -> Value {
    json!({
        "document": {
            "id": "order-1",
            "title": "Order",
            "content": "<order><item>1</item></order>"
        },
        "parameters": {
            "format": "XAdES",
            "level": "BASELINE_B",
            "container": "ASiC_E",
            "packaging": "ENVELOPING",
            "digestAlgorithm": "SHA256",
            "infoCanonicalization": "INCLUSIVE",
            "propertiesCanonicalization": "INCLUSIVE",
            "payloadMimeType": "application/xml"
        }
    })
}

fn request(method: &str, uri: &str, body: Option<&Value>) -> Request<axum::body::Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    }
}

async fn json_body<T: DeserializeOwned>(response: Response) -> T {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

async fn error_code(response: Response) -> String {
    json_body::<ErrorResponse>(response).await.code
}

#[tokio::test]
async fn healthcheck_returns_200() {
    let response = app()
        .oneshot(request("GET", "/healthcheck", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Ok");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let response = app()
        .oneshot(request("GET", "/nonexistent", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sign_without_key_is_not_ready() {
    let response = app()
        .oneshot(request("POST", "/sign", Some(&sign_body())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "NOT_READY");
}

#[tokio::test]
async fn sign_after_picking_key() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request("POST", "/key", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let key: KeyDescription = json_body(response).await;
    assert_eq!(key.subject, "CN=Jana Novakova");

    let response = app
        .oneshot(request("POST", "/sign", Some(&sign_body())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let signed: SignResponse = json_body(response).await;
    assert_eq!(signed.signed_by, "CN=Jana Novakova");
    assert_eq!(signed.issued_by, "CN=Test CA");

    let envelope: Value = serde_json::from_slice(&STANDARD.decode(signed.content).unwrap()).unwrap();
    assert_eq!(envelope["signedInfo"]["documentId"], "order-1");
    assert_eq!(envelope["payload"], STANDARD.encode("<order><item>1</item></order>"));
}

#[tokio::test]
async fn prompting_policy_signs_without_prior_key() {
    let app = router(test_state(KeyPolicy::PromptIfMissing, 1024 * 1024));

    let response = app
        .clone()
        .oneshot(request("POST", "/sign", Some(&sign_body())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("GET", "/info", None)).await.unwrap();
    let info: InfoResponse = json_body(response).await;
    assert_eq!(info.status, "READY");
}

#[tokio::test]
async fn key_lifecycle() {
    let app = app();

    let response = app.clone().oneshot(request("GET", "/key", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "NOT_READY");

    let response = app.clone().oneshot(request("GET", "/info", None)).await.unwrap();
    let info: InfoResponse = json_body(response).await;
    assert_eq!(info.status, "NO_KEY");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));

    app.clone().oneshot(request("POST", "/key", None)).await.unwrap();
    let response = app.clone().oneshot(request("GET", "/key", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let key: KeyDescription = json_body(response).await;
    assert_eq!(key.token, "static token");

    let response = app.clone().oneshot(request("DELETE", "/key", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(request("POST", "/sign", Some(&sign_body())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sign")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{\"document\":"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "MALFORMED_INPUT");
}

#[tokio::test]
async fn unknown_enum_value_is_400() {
    let mut body = sign_body();
    body["parameters"]["format"] = json!("CAdES");

    let response = app()
        .oneshot(request("POST", "/sign", Some(&body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "MALFORMED_INPUT");
}

#[tokio::test]
async fn validation_errors_map_to_wire_codes() {
    let cases = [
        ("payloadMimeType", json!("application/json"), StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MIMETYPE"),
        ("payloadMimeType", json!("xml"), StatusCode::BAD_REQUEST, "MALFORMED_MIMETYPE"),
        ("level", json!("BASELINE_LTA"), StatusCode::UNPROCESSABLE_ENTITY, "UNSUPPORTED_SIGNATURE_LEVEL"),
        ("packaging", json!("INTERNALLY_DETACHED"), StatusCode::UNPROCESSABLE_ENTITY, "UNSUPPORTED_SIGNATURE_PARAMETER"),
    ];

    for (field, value, status, code) in cases {
        let mut body = sign_body();
        body["parameters"][field] = value;

        let response = app()
            .oneshot(request("POST", "/sign", Some(&body)))
            .await
            .unwrap();

        assert_eq!(response.status(), status, "{field}");
        assert_eq!(error_code(response).await, code, "{field}");
    }
}

#[tokio::test]
async fn undecodable_base64_is_400() {
    let mut body = sign_body();
    body["parameters"]["payloadMimeType"] = json!("application/xml;base64");
    body["document"]["content"] = json!("not base64!");

    let response = app()
        .oneshot(request("POST", "/sign", Some(&body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DECODING_FAILED");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = router(test_state(KeyPolicy::RequireActive, 64));

    let response = app
        .oneshot(request("POST", "/sign", Some(&sign_body())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.code, "PAYLOAD_TOO_LARGE");
    assert_eq!(error.details.as_deref(), Some("limit: 64 bytes"));
}

#[tokio::test]
async fn client_disconnect_cancels_key_prompt() {
    let picker = Arc::new(HangingPicker::default());
    let state = state_with_picker(KeyPolicy::PromptIfMissing, 1024 * 1024, picker.clone());
    let autogram = state.autogram.clone();

    let in_flight = tokio::spawn(router(state).oneshot(request("POST", "/sign", Some(&sign_body()))));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !picker.prompting.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("key prompt never started");

    in_flight.abort();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !picker.dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("key prompt outlived the disconnected request");
    assert!(!autogram.is_ready());
}
