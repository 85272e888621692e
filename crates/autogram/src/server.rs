use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::autogram::Autogram;
use crate::config::ServerConfig;
use crate::document::Document;
use crate::error::SigningError;
use crate::job::{KeyPolicy, Responder, SignedDocument, SigningJob};
use crate::parameters::SignatureParameters;

#[derive(Clone)]
pub struct AppState {
    pub autogram: Arc<Autogram>,
    /// Policy given to every job submitted over HTTP.
    pub key_policy: KeyPolicy,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub document: Document,
    pub parameters: SignatureParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub content: String,
    pub signed_by: String,
    pub issued_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub status: String,
}

/// Serializes the job outcome onto the HTTP response of the request that created it.
struct HttpResponder(oneshot::Sender<Response>);

impl Responder for HttpResponder {
    fn on_document_signed(self: Box<Self>, document: SignedDocument) {
        let body = SignResponse {
            content: STANDARD.encode(&document.content),
            signed_by: document.certificate.subject,
            issued_by: document.certificate.issuer,
        };
        // The receiver is gone when the client disconnected.
        let _ = self.0.send((StatusCode::OK, Json(body)).into_response());
    }

    fn on_document_sign_failed(self: Box<Self>, error: SigningError) {
        let _ = self.0.send(error.into_response());
    }
}

pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route(
            "/healthcheck",
            get(|| async move { (StatusCode::OK, "Ok").into_response() }),
        )
        .route("/info", get(info_handler))
        .route("/sign", post(sign_handler))
        .route(
            "/key",
            get(get_key_handler)
                .post(pick_key_handler)
                .delete(reset_key_handler),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

pub async fn run(config: ServerConfig, autogram: Arc<Autogram>) -> Result<()> {
    let state = AppState {
        autogram,
        key_policy: config.key_policy,
        max_body_bytes: config.max_body_bytes,
    };

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    info!(address = %listener.local_addr()?, key_policy = ?config.key_policy, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}

async fn info_handler(State(state): State<AppState>) -> Json<InfoResponse> {
    let status = if state.autogram.is_ready() {
        "READY"
    } else {
        "NO_KEY"
    };
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
    })
}

async fn sign_handler(
    State(state): State<AppState>,
    request: Result<Json<SignRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return SigningError::PayloadTooLarge {
                limit: state.max_body_bytes,
            }
            .into_response();
        }
        Err(rejection) => return SigningError::MalformedBody(rejection.body_text()).into_response(),
    };

    // Dropping this handler's future (client gone) cancels the job.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let (tx, rx) = oneshot::channel();
    let job = SigningJob::new(request.document, request.parameters, HttpResponder(tx))
        .with_key_policy(state.key_policy)
        .with_cancellation(cancel);
    debug!(job = job.id(), "submitting job");
    state.autogram.submit(job);

    let response = rx.await;
    guard.disarm();
    response.unwrap_or_else(|_| {
        SigningError::Internal(anyhow!("job finished without a response")).into_response()
    })
}

async fn get_key_handler(State(state): State<AppState>) -> Response {
    match state.autogram.active_signing_key() {
        Some(key) => Json(key.describe()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(SigningError::NotReady.to_error_response()),
        )
            .into_response(),
    }
}

async fn pick_key_handler(State(state): State<AppState>) -> Response {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let picked = state.autogram.pick_signing_key(&cancel).await;
    guard.disarm();

    match picked {
        Ok(key) => Json(key.describe()).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn reset_key_handler(State(state): State<AppState>) -> StatusCode {
    state.autogram.reset_signing_key();
    StatusCode::NO_CONTENT
}
