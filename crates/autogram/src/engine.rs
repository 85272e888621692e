//! Signature engine collaborator.
//!
//! Signing is two-phase: the engine first computes the digest that the key has to
//! sign, then assembles the signed document around the signature value. Engines
//! are sync (CPU-bound); the orchestrator drives them through `spawn_blocking`.

use std::error::Error;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::document::TypedDocument;
use crate::mapper::{DigestMethod, SigningConfiguration};
use crate::token::Certificate;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine understood the request and refused it.
    #[error("{0}")]
    Rejected(String),
    /// Anything the engine raised that it could not classify itself.
    #[error(transparent)]
    Unrecognized(Box<dyn Error + Send + Sync>),
}

/// Everything the engine needs besides the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineParameters {
    pub configuration: SigningConfiguration,
    pub signing_certificate: Certificate,
    pub certificate_chain: Vec<Certificate>,
    /// Unix seconds; fixed once per job so both phases see the same value.
    pub signing_time: u64,
}

pub trait SignatureEngine: Send + Sync {
    fn name(&self) -> &str;

    fn compute_digest_to_sign(
        &self,
        document: &TypedDocument,
        parameters: &EngineParameters,
    ) -> Result<Vec<u8>, EngineError>;

    fn finalize_signature(
        &self,
        document: &TypedDocument,
        parameters: &EngineParameters,
        signature_value: &[u8],
    ) -> Result<Vec<u8>, EngineError>;
}

pub fn digest(method: DigestMethod, data: &[u8]) -> Vec<u8> {
    match method {
        DigestMethod::Sha256 => Sha256::digest(data).to_vec(),
        DigestMethod::Sha384 => Sha384::digest(data).to_vec(),
        DigestMethod::Sha512 => Sha512::digest(data).to_vec(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedInfo<'a> {
    document_id: Option<&'a str>,
    mime_type: &'a str,
    document_digest: String,
    digest_method: &'static str,
    #[serde(flatten)]
    parameters: &'a EngineParameters,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    signed_info: SignedInfo<'a>,
    signature_value: String,
    title: Option<&'a str>,
    payload: String,
}

/// Engine that wraps the payload and its signature in a JSON envelope.
///
/// It binds the document digest, the mapped configuration and the signer into
/// the signed bytes, but it does not emit XAdES or PAdES structures.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeEngine;

impl EnvelopeEngine {
    fn signed_info<'a>(
        document: &'a TypedDocument,
        parameters: &'a EngineParameters,
    ) -> Result<SignedInfo<'a>, EngineError> {
        if parameters.configuration.level().requires_timestamp() {
            return Err(EngineError::Rejected(format!(
                "{:?} requires a timestamping authority and none is configured",
                parameters.configuration.level()
            )));
        }

        let method = parameters.configuration.digest();
        Ok(SignedInfo {
            document_id: document.info().id.as_deref(),
            mime_type: &document.info().mime_type,
            document_digest: hex::encode(digest(method, document.content())),
            digest_method: method.uri(),
            parameters,
        })
    }
}

impl SignatureEngine for EnvelopeEngine {
    fn name(&self) -> &str {
        "envelope"
    }

    fn compute_digest_to_sign(
        &self,
        document: &TypedDocument,
        parameters: &EngineParameters,
    ) -> Result<Vec<u8>, EngineError> {
        let signed_info = Self::signed_info(document, parameters)?;
        let bytes =
            serde_json::to_vec(&signed_info).map_err(|e| EngineError::Unrecognized(Box::new(e)))?;
        Ok(digest(parameters.configuration.digest(), &bytes))
    }

    fn finalize_signature(
        &self,
        document: &TypedDocument,
        parameters: &EngineParameters,
        signature_value: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        if signature_value.is_empty() {
            return Err(EngineError::Rejected("signature value is empty".into()));
        }

        let envelope = Envelope {
            signed_info: Self::signed_info(document, parameters)?,
            signature_value: STANDARD.encode(signature_value),
            title: document.info().title.as_deref(),
            payload: STANDARD.encode(document.content()),
        };
        serde_json::to_vec_pretty(&envelope).map_err(|e| EngineError::Unrecognized(Box::new(e)))
    }
}
